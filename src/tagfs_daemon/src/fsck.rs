use log::{info, warn};
use rusqlite::params;
use std::path::{Path, PathBuf};

use blob_store::{BlobStore, BLOB_FILENAME, VERSION_FILE};
use tag_meta::{store, MetaStore};
use tagfs_lib::{Item, ItemId, ItemType, TagFsError, TagFsResult};

pub(crate) const LOST_AND_FOUND: &str = "lost+found";

#[derive(Debug, Default, PartialEq)]
pub(crate) struct FsckReport {
    pub errors: usize,
    pub fixed: usize,
}

fn walk_files(dir: &Path, visit: &mut impl FnMut(&Path) -> TagFsResult<()>) -> TagFsResult<()> {
    for entry in std::fs::read_dir(dir)
        .map_err(|e| TagFsError::IoError(format!("read dir {} failed: {}", dir.display(), e)))?
    {
        let entry = entry.map_err(|e| TagFsError::IoError(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, visit)?;
        } else {
            visit(&path)?;
        }
    }
    Ok(())
}

fn join_ids(ids: &[ItemId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows whose derived blob path does not exist on disk.
fn missing_blobs(meta: &MetaStore, blobs: &BlobStore) -> TagFsResult<Vec<ItemId>> {
    let rows: Vec<(ItemId, String)> = meta.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT id, name FROM items WHERE type = ?1")
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        let rows = stmt
            .query_map(params![ItemType::File.as_i64()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TagFsError::DbError(e.to_string()))
    })?;
    let mut bad = Vec::new();
    for (id, name) in rows {
        let path = blobs.blob_path(id, &name)?;
        if !path.exists() {
            warn!(
                "file {} doesn't exist but is present in the database",
                path.display()
            );
            bad.push(id);
        }
    }
    Ok(bad)
}

fn delete_rows(meta: &MetaStore, ids: &[ItemId]) -> TagFsResult<()> {
    let id_list = join_ids(ids);
    meta.with_tx(|tx| {
        tx.execute(
            &format!(
                "DELETE FROM item_tags WHERE item_id IN ({0}) OR other_id IN ({0})",
                id_list
            ),
            [],
        )
        .map_err(|e| TagFsError::DbError(e.to_string()))?;
        tx.execute(&format!("DELETE FROM items WHERE id IN ({})", id_list), [])
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        Ok(())
    })
}

/// Relation pairs where either endpoint no longer resolves to a live item.
fn dangling_relations(meta: &MetaStore) -> TagFsResult<usize> {
    meta.with_conn(|conn| {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM item_tags WHERE \
                 item_id NOT IN (SELECT id FROM items) OR \
                 other_id NOT IN (SELECT id FROM items)",
                [],
                |row| row.get(0),
            )
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        Ok(count as usize)
    })
}

fn delete_dangling_relations(meta: &MetaStore) -> TagFsResult<()> {
    meta.with_tx(|tx| {
        tx.execute(
            "DELETE FROM item_tags WHERE \
             item_id NOT IN (SELECT id FROM items) OR \
             other_id NOT IN (SELECT id FROM items)",
            [],
        )
        .map_err(|e| TagFsError::DbError(e.to_string()))?;
        Ok(())
    })
}

/// Blobs whose filename, bucket digits or database row do not check out.
fn orphan_blobs(meta: &MetaStore, blobs: &BlobStore) -> TagFsResult<Vec<PathBuf>> {
    let mut bad = Vec::new();
    let root = blobs.root().to_path_buf();
    walk_files(&root, &mut |path| {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => {
                warn!("bad filename {}", path.display());
                bad.push(path.to_path_buf());
                return Ok(());
            }
        };
        if path.parent() == Some(root.as_path()) && file_name == VERSION_FILE {
            return Ok(());
        }
        let caps = match BLOB_FILENAME.captures(file_name) {
            Some(caps) => caps,
            None => {
                warn!("bad filename {}", path.display());
                bad.push(path.to_path_buf());
                return Ok(());
            }
        };
        let second = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");
        let first = path
            .parent()
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");
        if first.len() != 6 || second.len() != 3 || format!("{}{}", first, second) != caps[1] {
            warn!("invalid path {}/{} != {}", first, second, &caps[1]);
            bad.push(path.to_path_buf());
            return Ok(());
        }
        let id: ItemId = caps[1]
            .parse()
            .map_err(|e| TagFsError::Internal(format!("bad blob id: {}", e)))?;
        let name = caps[2].to_string();
        let known = meta.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM items WHERE id = ?1 AND name = ?2",
                    params![id, name],
                    |row| row.get(0),
                )
                .map_err(|e| TagFsError::DbError(e.to_string()))?;
            Ok(count > 0)
        })?;
        if !known {
            warn!("file {} is in storage but not in database", path.display());
            bad.push(path.to_path_buf());
        }
        Ok(())
    })?;
    Ok(bad)
}

fn ensure_lost_and_found(meta: &MetaStore) -> TagFsResult<ItemId> {
    meta.with_tx(|tx| {
        if let Some(item) = store::get_by_parent_and_name(tx, 0, LOST_AND_FOUND)? {
            if item.item_type == ItemType::Tag {
                return Ok(item.id);
            }
        }
        info!("{} tag doesn't exist, creating", LOST_AND_FOUND);
        store::create_item(tx, &Item::new(LOST_AND_FOUND, ItemType::Tag, 0))
    })
}

/// Re-homes one orphan blob: a fresh file row related to the recovery tag,
/// with the blob moved to its new deterministic path before commit.
fn recover_orphan(
    meta: &MetaStore,
    blobs: &BlobStore,
    lf_tag: ItemId,
    orphan: &Path,
) -> TagFsResult<()> {
    let base = orphan
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TagFsError::Internal(format!("non-UTF-8 orphan {}", orphan.display())))?
        .to_string();
    meta.with_tx(|tx| {
        let id = store::create_item(tx, &Item::new(base.clone(), ItemType::File, 0))?;
        store::append_relations(tx, id, &[lf_tag])?;
        let target = blobs.blob_path(id, &base)?;
        std::fs::rename(orphan, &target).map_err(|e| {
            TagFsError::IoError(format!(
                "recover {} -> {} failed: {}",
                orphan.display(),
                target.display(),
                e
            ))
        })?;
        info!("recovered {} to {}", orphan.display(), target.display());
        Ok(())
    })
}

fn names_with_bars(meta: &MetaStore) -> TagFsResult<Vec<Item>> {
    meta.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT id, name, type, parent_id FROM items WHERE name LIKE '%|%'")
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        let rows = stmt
            .query_map([], store::item_from_row)
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TagFsError::DbError(e.to_string()))
    })
}

/// Rewrites `|` in one stored name to U+00A6 in the row and, for files, on
/// disk, inside a single transaction.
fn rewrite_bar_name(meta: &MetaStore, blobs: &BlobStore, item: &Item) -> TagFsResult<()> {
    let fixed = item.name.replace('|', "\u{00A6}");
    meta.with_tx(|tx| {
        tx.execute(
            "UPDATE items SET name = ?1 WHERE id = ?2",
            params![fixed, item.id],
        )
        .map_err(|e| TagFsError::DbError(e.to_string()))?;
        if item.item_type == ItemType::File {
            let old = blobs.blob_path(item.id, &item.name)?;
            let new = blobs.blob_path(item.id, &fixed)?;
            if old.exists() {
                std::fs::rename(&old, &new).map_err(|e| {
                    TagFsError::IoError(format!(
                        "rename {} -> {} failed: {}",
                        old.display(),
                        new.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    })
}

/// Reconciles the metadata store against the blob store. Reports every
/// inconsistency; with `fix` set, missing-blob rows are deleted, dangling
/// relations dropped, orphan blobs re-homed under the recovery tag and
/// reserved characters rewritten.
pub(crate) fn run_fsck(meta: &MetaStore, blobs: &BlobStore, fix: bool) -> TagFsResult<FsckReport> {
    let mut report = FsckReport::default();

    let bad_ids = missing_blobs(meta, blobs)?;
    report.errors += bad_ids.len();
    if fix && !bad_ids.is_empty() {
        info!("deleting {} file records from the database", bad_ids.len());
        delete_rows(meta, &bad_ids)?;
        report.fixed += bad_ids.len();
    }

    let dangling = dangling_relations(meta)?;
    report.errors += dangling;
    if fix && dangling > 0 {
        info!("deleting {} dangling relations", dangling);
        delete_dangling_relations(meta)?;
        report.fixed += dangling;
    }

    let orphans = orphan_blobs(meta, blobs)?;
    report.errors += orphans.len();
    if fix && !orphans.is_empty() {
        let lf_tag = ensure_lost_and_found(meta)?;
        for orphan in &orphans {
            match recover_orphan(meta, blobs, lf_tag, orphan) {
                Ok(()) => report.fixed += 1,
                Err(err) => warn!("error recovering {}: {}", orphan.display(), err),
            }
        }
    }

    let barred = names_with_bars(meta)?;
    report.errors += barred.len();
    if fix {
        for item in &barred {
            rewrite_bar_name(meta, blobs, item)?;
            report.fixed += 1;
        }
    }

    if report.errors > 0 {
        warn!("found {} errors, {} fixed", report.errors, report.fixed);
    } else {
        info!("no errors found");
    }
    Ok(report)
}
