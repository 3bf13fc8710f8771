use fuser::FileType;
use rusqlite::Connection;

use tag_meta::store;
use tagfs_lib::{base_name, parse_control_name, Item, ItemId, ItemType, TagFsError, TagFsResult};

use crate::daemon::Ctx;
use crate::node::{DirEntry, Node};

/// Group-tag members are tags; a tag's related list names group-tags. The
/// ` |csv|` suffix always resolves against the complementary type.
fn related_type(item_type: ItemType) -> ItemType {
    match item_type {
        ItemType::GroupTag => ItemType::Tag,
        _ => ItemType::GroupTag,
    }
}

fn display_name(conn: &Connection, item: &Item) -> TagFsResult<String> {
    let mut name = if item.item_type == ItemType::GroupTag {
        format!("!{}", item.name)
    } else {
        item.name.clone()
    };
    let related = store::list_related(conn, item.id, None, &[])?;
    if !related.is_empty() {
        let names: Vec<&str> = related.iter().map(|r| r.name.as_str()).collect();
        name.push_str(&format!(" |{}|", names.join(", ")));
    }
    Ok(name)
}

pub(crate) fn readdir(ctx: &Ctx, dir_id: ItemId) -> TagFsResult<Vec<DirEntry>> {
    ctx.meta.with_conn(|conn| {
        let children =
            store::list_children(conn, dir_id, &[ItemType::Tag, ItemType::GroupTag])?;
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            entries.push(DirEntry {
                ino: child.id as u64,
                kind: FileType::Directory,
                name: display_name(conn, &child)?,
            });
        }
        Ok(entries)
    })
}

/// Resolves a displayed name back to its item. The decorations must agree
/// with the stored state: type and (sorted) related list alike.
pub(crate) fn lookup(ctx: &Ctx, dir_id: ItemId, name: &str) -> TagFsResult<Node> {
    let parsed = parse_control_name(name)?;
    ctx.meta.with_conn(|conn| {
        let found = store::get_by_parent_and_name(conn, dir_id, &parsed.name)?
            .ok_or_else(|| TagFsError::NotFound(name.to_string()))?;
        if found.item_type != parsed.item_type {
            return Err(TagFsError::NotFound(name.to_string()));
        }
        let mut existing: Vec<String> = store::list_related(conn, found.id, None, &[])?
            .into_iter()
            .map(|item| item.name)
            .collect();
        existing.sort();
        let mut requested = parsed.related.clone();
        requested.sort();
        if existing != requested {
            return Err(TagFsError::NotFound(name.to_string()));
        }
        Ok(Node::Control { id: found.id })
    })
}

pub(crate) fn mkdir(ctx: &Ctx, dir_id: ItemId, name: &str) -> TagFsResult<Node> {
    let parsed = parse_control_name(name)?;
    let node = ctx.meta.with_tx(|tx| {
        // tag and group-tag names are unique across the whole forest; the
        // query engine resolves them by bare name
        if store::tag_name_exists(tx, &parsed.name)? {
            return Err(TagFsError::AlreadyExists(parsed.name.clone()));
        }
        let id = store::create_item(
            tx,
            &Item::new(parsed.name.clone(), parsed.item_type, dir_id),
        )?;
        let related = store::items_by_names(tx, &parsed.related, related_type(parsed.item_type))?;
        let related_ids: Vec<ItemId> = related.iter().map(|item| item.id).collect();
        store::replace_relations(tx, id, &related_ids)?;
        Ok(Node::Control { id })
    })?;
    ctx.invalidate();
    Ok(node)
}

pub(crate) fn remove(ctx: &Ctx, dir_id: ItemId, name: &str) -> TagFsResult<()> {
    let (base, implied_type) = base_name(name);
    ctx.meta.with_tx(|tx| {
        let target = store::get_by_parent_and_name(tx, dir_id, &base)?
            .filter(|item| item.item_type == implied_type)
            .ok_or_else(|| TagFsError::NotFound(name.to_string()))?;
        if store::has_children(tx, target.id)? {
            return Err(TagFsError::NotEmpty(format!("{} has child tags", base)));
        }
        if store::relations_referencing(tx, target.id)? {
            return Err(TagFsError::NotEmpty(format!("{} is still related", base)));
        }
        store::clear_relations(tx, target.id)?;
        store::delete_item(tx, target.id)
    })?;
    ctx.invalidate();
    Ok(())
}

pub(crate) fn rename(
    ctx: &Ctx,
    dir_id: ItemId,
    old_name: &str,
    target_id: ItemId,
    new_name: &str,
) -> TagFsResult<()> {
    let (base, implied_type) = base_name(old_name);
    let parsed = parse_control_name(new_name)?;
    ctx.meta.with_tx(|tx| {
        let mut src = store::get_by_parent_and_name(tx, dir_id, &base)?
            .filter(|item| item.item_type == implied_type)
            .ok_or_else(|| TagFsError::NotFound(old_name.to_string()))?;
        let related = store::items_by_names(tx, &parsed.related, related_type(parsed.item_type))?;
        let related_ids: Vec<ItemId> = related.iter().map(|item| item.id).collect();
        src.name = parsed.name.clone();
        src.item_type = parsed.item_type;
        src.parent_id = target_id;
        store::replace_relations(tx, src.id, &related_ids)?;
        store::save_item(tx, &src)
    })?;
    ctx.invalidate();
    Ok(())
}
