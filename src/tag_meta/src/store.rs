use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tagfs_lib::{Item, ItemId, ItemType, TagFsError, TagFsResult};

use crate::map_db_err;

/// Handle to the metadata database. The connection is process-wide and
/// serialized behind a mutex; transactions are scoped through `with_tx`.
#[derive(Clone)]
pub struct MetaStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetaStore {
    pub fn open(path: &Path) -> TagFsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(map_db_err)?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> TagFsResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_db_err)?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn bootstrap(conn: &Connection) -> TagFsResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(map_db_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                name      TEXT NOT NULL,
                type      INTEGER NOT NULL,
                parent_id INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_items_name   ON items(name);
            CREATE INDEX IF NOT EXISTS idx_items_type   ON items(type);
            CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id);

            CREATE TABLE IF NOT EXISTS item_tags (
                item_id  INTEGER NOT NULL,
                other_id INTEGER NOT NULL,
                PRIMARY KEY (item_id, other_id)
            );

            CREATE INDEX IF NOT EXISTS idx_item_tags_other ON item_tags(other_id);",
        )
        .map_err(map_db_err)?;
        Ok(())
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> TagFsResult<T>) -> TagFsResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TagFsError::Internal(format!("connection lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Runs `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> TagFsResult<T>) -> TagFsResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| TagFsError::Internal(format!("connection lock poisoned: {}", e)))?;
        let tx = conn.transaction().map_err(map_db_err)?;
        let result = f(&tx)?;
        tx.commit().map_err(map_db_err)?;
        Ok(result)
    }
}

pub fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let raw_type: i64 = row.get(2)?;
    let item_type = ItemType::from_i64(raw_type).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        item_type,
        parent_id: row.get(3)?,
        tag: None,
    })
}

const ITEM_COLUMNS: &str = "id, name, type, parent_id";

fn placeholders(n: usize) -> String {
    let mut s = String::new();
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

pub fn get_by_id(conn: &Connection, id: ItemId) -> TagFsResult<Option<Item>> {
    conn.query_row(
        &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
        params![id],
        item_from_row,
    )
    .optional()
    .map_err(map_db_err)
}

/// First item carrying the name, regardless of type; tag and group-tag
/// names are unique forest-wide so this is the browse-side resolver.
pub fn get_by_name(conn: &Connection, name: &str) -> TagFsResult<Option<Item>> {
    conn.query_row(
        &format!("SELECT {} FROM items WHERE name = ?1 LIMIT 1", ITEM_COLUMNS),
        params![name],
        item_from_row,
    )
    .optional()
    .map_err(map_db_err)
}

pub fn get_by_parent_and_name(
    conn: &Connection,
    parent_id: ItemId,
    name: &str,
) -> TagFsResult<Option<Item>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM items WHERE parent_id = ?1 AND name = ?2 LIMIT 1",
            ITEM_COLUMNS
        ),
        params![parent_id, name],
        item_from_row,
    )
    .optional()
    .map_err(map_db_err)
}

pub fn list_children(
    conn: &Connection,
    parent_id: ItemId,
    types: &[ItemType],
) -> TagFsResult<Vec<Item>> {
    list_children_excluding(conn, &[parent_id], types, &[])
}

/// Children of any of `parent_ids`, optionally restricted by type and with
/// a name-exclusion list (the browse listing's already-selected tags).
pub fn list_children_excluding(
    conn: &Connection,
    parent_ids: &[ItemId],
    types: &[ItemType],
    exclude: &[String],
) -> TagFsResult<Vec<Item>> {
    if parent_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {} FROM items WHERE parent_id IN ({})",
        ITEM_COLUMNS,
        placeholders(parent_ids.len())
    );
    let mut values: Vec<rusqlite::types::Value> = parent_ids
        .iter()
        .map(|id| rusqlite::types::Value::Integer(*id))
        .collect();
    if !types.is_empty() {
        sql.push_str(&format!(" AND type IN ({})", placeholders(types.len())));
        values.extend(
            types
                .iter()
                .map(|t| rusqlite::types::Value::Integer(t.as_i64())),
        );
    }
    if !exclude.is_empty() {
        sql.push_str(&format!(" AND name NOT IN ({})", placeholders(exclude.len())));
        values.extend(
            exclude
                .iter()
                .map(|n| rusqlite::types::Value::Text(n.clone())),
        );
    }
    sql.push_str(" ORDER BY id");
    let mut stmt = conn.prepare(&sql).map_err(map_db_err)?;
    let rows = stmt
        .query_map(params_from_iter(values), item_from_row)
        .map_err(map_db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
}

/// Other endpoints of the relations owned by `item_id`, optionally
/// restricted by type and name-exclusion list.
pub fn list_related(
    conn: &Connection,
    item_id: ItemId,
    type_filter: Option<ItemType>,
    exclude: &[String],
) -> TagFsResult<Vec<Item>> {
    let mut sql = "SELECT o.id, o.name, o.type, o.parent_id FROM item_tags r \
                   JOIN items o ON o.id = r.other_id WHERE r.item_id = ?"
        .to_string();
    let mut values: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Integer(item_id)];
    if let Some(ty) = type_filter {
        sql.push_str(" AND o.type = ?");
        values.push(rusqlite::types::Value::Integer(ty.as_i64()));
    }
    if !exclude.is_empty() {
        sql.push_str(&format!(" AND o.name NOT IN ({})", placeholders(exclude.len())));
        values.extend(
            exclude
                .iter()
                .map(|n| rusqlite::types::Value::Text(n.clone())),
        );
    }
    sql.push_str(" ORDER BY r.rowid");
    let mut stmt = conn.prepare(&sql).map_err(map_db_err)?;
    let rows = stmt
        .query_map(params_from_iter(values), item_from_row)
        .map_err(map_db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
}

/// Items of one type matching any of `names`; silently drops names with no
/// match, preserving the caller's order of the found ones.
pub fn items_by_names(
    conn: &Connection,
    names: &[String],
    ty: ItemType,
) -> TagFsResult<Vec<Item>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM items WHERE name IN ({}) AND type = ?",
        ITEM_COLUMNS,
        placeholders(names.len())
    );
    let mut values: Vec<rusqlite::types::Value> = names
        .iter()
        .map(|n| rusqlite::types::Value::Text(n.clone()))
        .collect();
    values.push(rusqlite::types::Value::Integer(ty.as_i64()));
    let mut stmt = conn.prepare(&sql).map_err(map_db_err)?;
    let rows = stmt
        .query_map(params_from_iter(values), item_from_row)
        .map_err(map_db_err)?;
    let mut found = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_db_err)?;
    found.sort_by_key(|item| names.iter().position(|n| *n == item.name));
    Ok(found)
}

/// Whether a tag or group-tag anywhere in the forest already carries the
/// name; the planner's `WHERE name = ?` lookups require forest-wide
/// uniqueness.
pub fn tag_name_exists(conn: &Connection, name: &str) -> TagFsResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM items WHERE name = ?1 AND type IN (?2, ?3)",
            params![
                name,
                ItemType::Tag.as_i64(),
                ItemType::GroupTag.as_i64()
            ],
            |row| row.get(0),
        )
        .map_err(map_db_err)?;
    Ok(count > 0)
}

pub fn has_children(conn: &Connection, parent_id: ItemId) -> TagFsResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM items WHERE parent_id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
        .map_err(map_db_err)?;
    Ok(count > 0)
}

/// Whether any relation points at `id` from its other side; blocks tag
/// removal while files (or member tags) still reference it.
pub fn relations_referencing(conn: &Connection, id: ItemId) -> TagFsResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM item_tags WHERE other_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(map_db_err)?;
    Ok(count > 0)
}

pub fn create_item(conn: &Connection, item: &Item) -> TagFsResult<ItemId> {
    conn.execute(
        "INSERT INTO items (name, type, parent_id) VALUES (?1, ?2, ?3)",
        params![item.name, item.item_type.as_i64(), item.parent_id],
    )
    .map_err(map_db_err)?;
    Ok(conn.last_insert_rowid())
}

pub fn save_item(conn: &Connection, item: &Item) -> TagFsResult<()> {
    let updated = conn
        .execute(
            "UPDATE items SET name = ?1, type = ?2, parent_id = ?3 WHERE id = ?4",
            params![item.name, item.item_type.as_i64(), item.parent_id, item.id],
        )
        .map_err(map_db_err)?;
    if updated == 0 {
        return Err(TagFsError::NotFound(format!("item {} not found", item.id)));
    }
    Ok(())
}

pub fn delete_item(conn: &Connection, id: ItemId) -> TagFsResult<()> {
    conn.execute("DELETE FROM items WHERE id = ?1", params![id])
        .map_err(map_db_err)?;
    Ok(())
}

pub fn append_relations(conn: &Connection, item_id: ItemId, others: &[ItemId]) -> TagFsResult<()> {
    let mut stmt = conn
        .prepare("INSERT OR IGNORE INTO item_tags (item_id, other_id) VALUES (?1, ?2)")
        .map_err(map_db_err)?;
    for other in others {
        stmt.execute(params![item_id, other]).map_err(map_db_err)?;
    }
    Ok(())
}

pub fn clear_relations(conn: &Connection, item_id: ItemId) -> TagFsResult<()> {
    conn.execute("DELETE FROM item_tags WHERE item_id = ?1", params![item_id])
        .map_err(map_db_err)?;
    Ok(())
}

pub fn replace_relations(
    conn: &Connection,
    item_id: ItemId,
    others: &[ItemId],
) -> TagFsResult<()> {
    clear_relations(conn, item_id)?;
    append_relations(conn, item_id, others)
}

/// Drops every relation touching `id` on either side; used when the item
/// itself is about to be deleted.
pub fn purge_relations(conn: &Connection, id: ItemId) -> TagFsResult<()> {
    conn.execute(
        "DELETE FROM item_tags WHERE item_id = ?1 OR other_id = ?1",
        params![id],
    )
    .map_err(map_db_err)?;
    Ok(())
}

/// Member names of the group-tag called `name`, reading the relation pair
/// from both sides; `None` when no group-tag carries the name.
pub fn group_members(conn: &Connection, name: &str) -> TagFsResult<Option<Vec<String>>> {
    let group: Option<ItemId> = conn
        .query_row(
            "SELECT id FROM items WHERE name = ?1 AND type = ?2",
            params![name, ItemType::GroupTag.as_i64()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_db_err)?;
    let Some(group_id) = group else {
        return Ok(None);
    };
    let mut stmt = conn
        .prepare(
            "SELECT m.name FROM item_tags r JOIN items m ON m.id = \
             CASE WHEN r.item_id = ?1 THEN r.other_id ELSE r.item_id END \
             WHERE r.item_id = ?1 OR r.other_id = ?1",
        )
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![group_id], |row| row.get::<_, String>(0))
        .map_err(map_db_err)?;
    let members = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_db_err)?;
    Ok(Some(members))
}
