use fuser::FileType;
use std::collections::BTreeMap;
use std::sync::Mutex;

use tag_meta::{store, ListingCache};
use tagfs_lib::{
    Item, ItemId, ItemType, TagFsError, TagFsResult, TagPath, CONTENT_DIR, NEGATION_DIR,
    RENAME_RECEIVER_DIR,
};

use crate::daemon::{lock, Ctx};
use crate::node::{DirEntry, FilesVariant, Node};

/// Sub-tags reachable from this point of the browse tree: the top-level
/// forest when no tag is selected yet, otherwise one level of child tags
/// plus one level of group-tag expansion per active positive tag. Already
/// selected names are excluded; within the listing the last writer wins.
pub(crate) fn readdir(
    ctx: &Ctx,
    cache: &Mutex<ListingCache>,
    path: &TagPath,
    self_ino: u64,
) -> TagFsResult<Vec<DirEntry>> {
    let (positive, negative) = path.split();
    let mut exclude = positive.clone();
    exclude.extend(negative.iter().cloned());

    ctx.meta.with_conn(|conn| {
        let mut items: BTreeMap<String, Item> = BTreeMap::new();
        if path.is_empty() {
            for item in store::list_children(conn, 0, &[ItemType::Tag])? {
                items.insert(item.name.clone(), item);
            }
        }
        for name in &positive {
            let Some(active) = store::get_by_name(conn, name)? else {
                continue;
            };
            for item in
                store::list_children_excluding(conn, &[active.id], &[ItemType::Tag], &exclude)?
            {
                items.insert(item.name.clone(), item);
            }
            let groups =
                store::list_related(conn, active.id, Some(ItemType::GroupTag), &exclude)?;
            let group_ids: Vec<ItemId> = groups.iter().map(|g| g.id).collect();
            for item in store::list_children_excluding(conn, &group_ids, &[], &exclude)? {
                items.insert(item.name.clone(), item);
            }
        }

        let mut listing = lock(cache)?;
        let mut entries = Vec::with_capacity(items.len() + 3);
        for (name, item) in items {
            listing.put(&ctx.stamp, &name, item.clone());
            entries.push(DirEntry {
                ino: item.id as u64,
                kind: FileType::Directory,
                name,
            });
        }
        // no reserved children directly behind a negation marker, a bare
        // `_/_` would toggle negation twice
        if path.last_component() != Some(NEGATION_DIR) {
            for reserved in [CONTENT_DIR, RENAME_RECEIVER_DIR, NEGATION_DIR] {
                entries.push(DirEntry {
                    ino: self_ino,
                    kind: FileType::Directory,
                    name: reserved.to_string(),
                });
            }
        }
        Ok(entries)
    })
}

pub(crate) fn lookup(
    ctx: &Ctx,
    cache: &Mutex<ListingCache>,
    path: &TagPath,
    name: &str,
) -> TagFsResult<Node> {
    match name {
        CONTENT_DIR => {
            return Ok(Node::Files {
                path: path.clone(),
                dir_id: 0,
                variant: FilesVariant::Plain,
            })
        }
        RENAME_RECEIVER_DIR => {
            let variant = if ctx.all_tags {
                FilesVariant::AllTags
            } else {
                FilesVariant::RenameReceiver
            };
            return Ok(Node::Files {
                path: path.clone(),
                dir_id: 0,
                variant,
            });
        }
        NEGATION_DIR => {
            return Ok(Node::Browse {
                path: path.join(NEGATION_DIR),
            })
        }
        _ => {}
    }

    if let Some(cached) = lock(cache)?.get(&ctx.stamp, name) {
        return match cached {
            Some(item) => Ok(Node::Browse {
                path: path.join(&item.name),
            }),
            None => Err(TagFsError::NotFound(name.to_string())),
        };
    }
    let found = ctx.meta.with_conn(|conn| store::get_by_name(conn, name))?;
    let mut listing = lock(cache)?;
    match found {
        Some(item) => {
            let child = path.join(&item.name);
            listing.put(&ctx.stamp, name, item);
            Ok(Node::Browse { path: child })
        }
        None => {
            listing.put_missing(&ctx.stamp, name);
            Err(TagFsError::NotFound(name.to_string()))
        }
    }
}
