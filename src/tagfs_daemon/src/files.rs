use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::Mutex;

use tag_meta::{store, FileQuery, ListingCache};
use tagfs_lib::{clean_name, Item, ItemId, ItemType, TagFsError, TagFsResult, TagPath};

use crate::daemon::{lock, Ctx};
use crate::node::{kind_of, DirEntry, FilesVariant, Node};

/// One `@`/`@@` directory: the accumulated tag path, the id of the
/// containing directory-item (0 at the namespace root for this path) and
/// the variant deciding listing shape and name grammar.
pub(crate) struct FilesDir<'a> {
    pub ctx: &'a Ctx,
    pub cache: &'a Mutex<ListingCache>,
    pub path: &'a TagPath,
    pub dir_id: ItemId,
    pub variant: FilesVariant,
}

impl FilesDir<'_> {
    fn all_tags(&self) -> bool {
        self.variant == FilesVariant::AllTags
    }

    fn clean(&self, name: &str, keep_id: bool) -> TagFsResult<String> {
        clean_name(name, self.all_tags(), keep_id)
    }

    fn query(&self) -> FileQuery {
        let (positive, negative) = self.path.split();
        FileQuery::new(self.dir_id, positive, negative)
    }

    /// Resolves one name through the listing cache, falling back to an
    /// exact-name query. Zero or several matches cache the missing
    /// sentinel; a lookup is only ever allowed to mean one item.
    fn find(&self, conn: &Connection, name: &str) -> TagFsResult<Item> {
        if let Some(cached) = lock(self.cache)?.get(&self.ctx.stamp, name) {
            return cached.ok_or_else(|| TagFsError::NotFound(name.to_string()));
        }
        let clean = self.clean(name, true)?;
        let rows = match self.query().exact_name(&clean).run(conn) {
            Ok(rows) => rows,
            Err(err) => {
                lock(self.cache)?.put_missing(&self.ctx.stamp, name);
                return Err(err);
            }
        };
        let mut listing = lock(self.cache)?;
        if rows.len() == 1 {
            let item = rows.into_iter().next().ok_or_else(|| {
                TagFsError::Internal("exact-name row vanished".to_string())
            })?;
            listing.put(&self.ctx.stamp, name, item.clone());
            Ok(item)
        } else {
            listing.put_missing(&self.ctx.stamp, name);
            Err(TagFsError::NotFound(name.to_string()))
        }
    }

    pub(crate) fn readdir(&self) -> TagFsResult<Vec<DirEntry>> {
        if self.variant == FilesVariant::RenameReceiver {
            return Ok(Vec::new());
        }
        let with_tags = self.all_tags();
        self.ctx.meta.with_conn(|conn| {
            let rows = self.query().with_tags(with_tags).run(conn)?;
            let mut listing = lock(self.cache)?;
            if with_tags {
                let mut tagged: BTreeMap<ItemId, (Item, Vec<String>)> = BTreeMap::new();
                for row in rows {
                    let tag = row.tag.clone().unwrap_or_default();
                    tagged
                        .entry(row.id)
                        .or_insert_with(|| (row, Vec::new()))
                        .1
                        .push(tag);
                }
                let mut entries = Vec::with_capacity(tagged.len());
                for (id, (item, tags)) in tagged {
                    let name = format!("|{}|{}|{}", id, tags.join("|"), item.name);
                    listing.put(&self.ctx.stamp, &name, item.clone());
                    entries.push(DirEntry {
                        ino: id as u64,
                        kind: kind_of(item.item_type),
                        name,
                    });
                }
                return Ok(entries);
            }

            let mut by_name: BTreeMap<String, Vec<Item>> = BTreeMap::new();
            for row in rows {
                by_name.entry(row.name.clone()).or_default().push(row);
            }
            let mut entries = Vec::new();
            for (name, group) in by_name {
                if group.len() == 1 {
                    let item = &group[0];
                    listing.put(&self.ctx.stamp, &name, item.clone());
                    entries.push(DirEntry {
                        ino: item.id as u64,
                        kind: kind_of(item.item_type),
                        name,
                    });
                } else {
                    // same display name, distinct items: expose each under
                    // its |id| prefix instead
                    for item in group {
                        let prefixed = format!("|{}|{}", item.id, item.name);
                        listing.put(&self.ctx.stamp, &prefixed, item.clone());
                        entries.push(DirEntry {
                            ino: item.id as u64,
                            kind: kind_of(item.item_type),
                            name: prefixed,
                        });
                    }
                }
            }
            Ok(entries)
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> TagFsResult<Node> {
        if self.variant == FilesVariant::RenameReceiver {
            return Err(TagFsError::NotFound(name.to_string()));
        }
        let item = self.ctx.meta.with_conn(|conn| self.find(conn, name))?;
        if item.item_type == ItemType::Dir {
            return Ok(Node::Files {
                path: self.path.clone(),
                dir_id: item.id,
                variant: FilesVariant::Plain,
            });
        }
        let id = item.id;
        self.ctx.content_cache_put(id, item)?;
        Ok(Node::Content { id })
    }

    pub(crate) fn create(&self, name: &str) -> TagFsResult<(ItemId, tokio::fs::File)> {
        if self.variant == FilesVariant::RenameReceiver {
            return Err(TagFsError::AccessDenied(format!("create {:?}", name)));
        }
        let clean = self.clean(name, false)?;
        let positive = self.path.positive();
        let dir_id = self.dir_id;
        let created = self.ctx.meta.with_tx(|tx| {
            let tags = store::items_by_names(tx, &positive, ItemType::Tag)?;
            let id = store::create_item(tx, &Item::new(clean.clone(), ItemType::File, dir_id))?;
            let tag_ids: Vec<ItemId> = tags.iter().map(|t| t.id).collect();
            store::append_relations(tx, id, &tag_ids)?;
            // the blob must exist before the row becomes visible
            let file = self.ctx.runtime.block_on(self.ctx.blobs.create(id, &clean))?;
            Ok((id, file))
        })?;
        self.ctx.invalidate();
        Ok(created)
    }

    pub(crate) fn mkdir(&self, name: &str) -> TagFsResult<Node> {
        if self.variant == FilesVariant::RenameReceiver {
            return Err(TagFsError::NotPermitted(format!("mkdir {:?}", name)));
        }
        let clean = self.clean(name, false)?;
        let positive = self.path.positive();
        let dir_id = self.dir_id;
        let id = self.ctx.meta.with_tx(|tx| {
            let parent_id = match store::get_by_id(tx, dir_id)? {
                Some(parent) => parent.id,
                None => 0,
            };
            let tags = store::items_by_names(tx, &positive, ItemType::Tag)?;
            let id = store::create_item(tx, &Item::new(clean.clone(), ItemType::Dir, parent_id))?;
            let tag_ids: Vec<ItemId> = tags.iter().map(|t| t.id).collect();
            store::replace_relations(tx, id, &tag_ids)?;
            Ok(id)
        })?;
        self.ctx.invalidate();
        Ok(Node::Files {
            path: self.path.clone(),
            dir_id: id,
            variant: FilesVariant::Plain,
        })
    }

    /// Deletes one resolved entry: files lose their blob inside the same
    /// transaction as their rows, directory-items must be empty.
    fn delete_entry(&self, name: &str) -> TagFsResult<()> {
        let item = self.ctx.meta.with_conn(|conn| self.find(conn, name))?;
        if item.item_type == ItemType::File {
            self.ctx.meta.with_tx(|tx| {
                store::purge_relations(tx, item.id)?;
                store::delete_item(tx, item.id)?;
                self.ctx
                    .runtime
                    .block_on(self.ctx.blobs.remove(item.id, &item.name))?;
                Ok(())
            })?;
        } else {
            let occupied = self
                .ctx
                .meta
                .with_conn(|conn| store::has_children(conn, item.id))?;
            if occupied {
                return Err(TagFsError::NotEmpty(item.name));
            }
            self.ctx.meta.with_tx(|tx| {
                store::purge_relations(tx, item.id)?;
                store::delete_item(tx, item.id)
            })?;
        }
        self.ctx.invalidate();
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> TagFsResult<()> {
        if self.variant == FilesVariant::RenameReceiver {
            return Err(TagFsError::NotPermitted(format!("remove {:?}", name)));
        }
        self.delete_entry(name)
    }

    /// Moving between files directories re-homes the item under the
    /// target's tag set. A name-changing move also moves the blob to its
    /// new deterministic path; a same-name move replaces the tag relations
    /// instead.
    pub(crate) fn rename(
        &self,
        old_name: &str,
        target: &FilesDir<'_>,
        new_name: &str,
    ) -> TagFsResult<()> {
        let new_clean = target.clean(new_name, false)?;
        let src = self.ctx.meta.with_conn(|conn| self.find(conn, old_name))?;
        self.ctx.invalidate();
        let existing = self
            .ctx
            .meta
            .with_conn(|conn| target.find(conn, &new_clean));
        if let Ok(existing) = existing {
            // clients behind inode-mangling transports (sshfs) cannot see
            // that source and target are the same file; only delete a
            // genuinely different target
            if existing.id != src.id {
                target.delete_entry(&new_clean)?;
            }
        }
        let renamed = src.name != new_clean;
        let positive = target.path.positive();
        self.ctx.meta.with_tx(|tx| {
            let mut updated = src.clone();
            updated.name = new_clean.clone();
            updated.parent_id = target.dir_id;
            store::save_item(tx, &updated)?;
            if renamed {
                if src.item_type == ItemType::File {
                    self.ctx.runtime.block_on(self.ctx.blobs.rename(
                        src.id,
                        &src.name,
                        src.id,
                        &new_clean,
                    ))?;
                }
            } else {
                let tags = store::items_by_names(tx, &positive, ItemType::Tag)?;
                let tag_ids: Vec<ItemId> = tags.iter().map(|t| t.id).collect();
                store::replace_relations(tx, src.id, &tag_ids)?;
            }
            Ok(())
        })?;
        self.ctx.invalidate();
        Ok(())
    }
}
