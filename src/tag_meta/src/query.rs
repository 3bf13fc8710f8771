use rusqlite::{params_from_iter, types::Value, Connection};

use tagfs_lib::{split_id_prefix, Item, ItemId, TagFsResult};

use crate::map_db_err;
use crate::store::{self, item_from_row};

/// Plans the single SELECT answering "which files and directories live at
/// this point of the browse tree". Each row's tag-name set is materialized
/// by a correlated `tags` CTE; positive names compile to membership
/// predicates and negative names to non-membership predicates against it.
#[derive(Debug, Clone)]
pub struct FileQuery {
    pub dir_id: ItemId,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub exact_name: Option<String>,
    pub with_tags: bool,
}

impl FileQuery {
    pub fn new(dir_id: ItemId, positive: Vec<String>, negative: Vec<String>) -> Self {
        Self {
            dir_id,
            positive,
            negative,
            exact_name: None,
            with_tags: false,
        }
    }

    pub fn exact_name(mut self, name: &str) -> Self {
        self.exact_name = Some(name.to_string());
        self
    }

    pub fn with_tags(mut self, with_tags: bool) -> Self {
        self.with_tags = with_tags;
        self
    }

    /// Membership predicate for one path component. A group-tag name
    /// expands one level into its members, acting as an "or" group.
    fn tag_predicate(conn: &Connection, name: &str, negate: bool) -> TagFsResult<(String, Vec<Value>)> {
        let names = match store::group_members(conn, name)? {
            Some(members) if !members.is_empty() => members,
            _ => vec![name.to_string()],
        };
        let single = if negate { "? NOT IN tags" } else { "? IN tags" };
        let values: Vec<Value> = names.into_iter().map(Value::Text).collect();
        if values.len() == 1 {
            return Ok((single.to_string(), values));
        }
        let joiner = if negate { " AND " } else { " OR " };
        let clause = format!(
            "({})",
            vec![single; values.len()].join(joiner)
        );
        Ok((clause, values))
    }

    pub fn build(&self, conn: &Connection) -> TagFsResult<(String, Vec<Value>)> {
        let mut predicates: Vec<(String, Vec<Value>)> = Vec::new();
        // inside a concrete sub-directory the path filter has already
        // selected the subtree; only the parent and type predicates apply
        if self.dir_id == 0 {
            for name in &self.positive {
                predicates.push(Self::tag_predicate(conn, name, false)?);
            }
            for name in &self.negative {
                predicates.push(Self::tag_predicate(conn, name, true)?);
            }
            // latter tags usually match far fewer files; run the negative
            // predicates first when any are present
            if !self.negative.is_empty() {
                predicates.reverse();
            }
        }

        if let Some(raw) = self.exact_name.as_deref() {
            let mut name = raw;
            if let Some((id, rest)) = split_id_prefix(raw) {
                predicates.push(("i.id = ?".to_string(), vec![Value::Integer(id)]));
                name = rest;
            }
            predicates.push(("i.name = ?".to_string(), vec![Value::Text(name.to_string())]));
        }
        predicates.push((
            "i.parent_id = ?".to_string(),
            vec![Value::Integer(self.dir_id)],
        ));
        predicates.push(("i.type IN (0, 1)".to_string(), Vec::new()));

        let projection = if self.with_tags {
            "SELECT i.id, i.name, i.type, i.parent_id, t.name AS tag FROM items i \
             LEFT JOIN item_tags it ON i.id = it.item_id \
             LEFT JOIN items t ON t.id = it.other_id"
        } else {
            "SELECT i.id, i.name, i.type, i.parent_id FROM items i"
        };

        let mut clauses = Vec::with_capacity(predicates.len());
        let mut values = Vec::new();
        for (clause, mut vals) in predicates {
            clauses.push(clause);
            values.append(&mut vals);
        }
        let sql = format!(
            "WITH tags AS (SELECT name FROM item_tags LEFT JOIN items ON id = other_id \
             WHERE item_id = i.id) {} WHERE {}",
            projection,
            clauses.join(" AND ")
        );
        Ok((sql, values))
    }

    pub fn run(&self, conn: &Connection) -> TagFsResult<Vec<Item>> {
        let (sql, values) = self.build(conn)?;
        let mut stmt = conn.prepare(&sql).map_err(map_db_err)?;
        let with_tags = self.with_tags;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let mut item = item_from_row(row)?;
                if with_tags {
                    item.tag = row.get(4)?;
                }
                Ok(item)
            })
            .map_err(map_db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
    }
}
