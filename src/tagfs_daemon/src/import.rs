use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::params;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use blob_store::BlobStore;
use tag_meta::MetaStore;
use tagfs_lib::{ItemType, TagFsError, TagFsResult};

static INSERT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"INSERT INTO PUBLIC\.TAG\(.*\) VALUES\((\d+), (.+), (NULL|\d+)\);").unwrap()
});
static INSERT_FILE_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"INSERT INTO PUBLIC\.FILERECORD\(.*\) VALUES\((\d+), (.+)\);").unwrap());
static INSERT_FILE_RECORD_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"INSERT INTO PUBLIC\.FILERECORD_TAG\(.*\) VALUES\((\d+), (\d+)\);").unwrap()
});
static STRING_DECODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"STRINGDECODE\('(.*)'\)").unwrap());

/// Unquotes one H2 SQL literal: `STRINGDECODE('...')` payloads carry JSON
/// string escapes, plain literals double their quotes.
fn maybe_decode(raw: &str) -> String {
    if let Some(caps) = STRING_DECODE.captures(raw) {
        if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{}\"", &caps[1])) {
            return decoded;
        }
        return raw.to_string();
    }
    if raw.len() > 1 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].replace("''", "'");
    }
    raw.to_string()
}

fn import_tags(meta: &MetaStore, tags_path: &Path) -> TagFsResult<()> {
    let file = std::fs::File::open(tags_path)
        .map_err(|e| TagFsError::IoError(format!("open {} failed: {}", tags_path.display(), e)))?;
    meta.with_tx(|tx| {
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| TagFsError::IoError(e.to_string()))?;
            let Some(caps) = INSERT_TAG.captures(&line) else {
                continue;
            };
            let id: i64 = caps[1]
                .parse()
                .map_err(|e| TagFsError::Internal(format!("bad tag id: {}", e)))?;
            let parent: i64 = if &caps[3] == "NULL" {
                0
            } else {
                caps[3]
                    .parse()
                    .map_err(|e| TagFsError::Internal(format!("bad tag parent: {}", e)))?
            };
            tx.execute(
                "INSERT INTO items(id, name, type, parent_id) VALUES (?1, ?2, ?3, ?4)",
                params![id, maybe_decode(&caps[2]), ItemType::Tag.as_i64(), parent],
            )
            .map_err(|e| TagFsError::DbError(e.to_string()))?;
        }
        Ok(())
    })
}

/// Legacy blobs live at `<storage>/<id%1000>/<id>|_|<name>`.
fn copy_storage_file(
    blobs: &BlobStore,
    src_storage: &Path,
    src_id: &str,
    name: &str,
    id: i64,
) -> TagFsResult<()> {
    let src_id: i64 = src_id
        .parse()
        .map_err(|e| TagFsError::Internal(format!("bad legacy id: {}", e)))?;
    let src = src_storage
        .join((src_id % 1000).to_string())
        .join(format!("{}|_|{}", src_id, name));
    let dst = blobs.blob_path(id, name)?;
    std::fs::copy(&src, &dst).map_err(|e| {
        TagFsError::IoError(format!(
            "copy {} -> {} failed: {}",
            src.display(),
            dst.display(),
            e
        ))
    })?;
    Ok(())
}

fn import_data(
    meta: &MetaStore,
    blobs: &BlobStore,
    data_path: &Path,
    src_storage: &Path,
) -> TagFsResult<()> {
    let file = std::fs::File::open(data_path)
        .map_err(|e| TagFsError::IoError(format!("open {} failed: {}", data_path.display(), e)))?;
    let mut mapping: HashMap<String, i64> = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| TagFsError::IoError(e.to_string()))?;
        if let Some(caps) = INSERT_FILE_RECORD.captures(&line) {
            let name = maybe_decode(&caps[2]);
            let id = meta.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO items(name, type, parent_id) VALUES (?1, ?2, 0)",
                    params![name, ItemType::File.as_i64()],
                )
                .map_err(|e| TagFsError::DbError(e.to_string()))?;
                Ok(conn.last_insert_rowid())
            })?;
            mapping.insert(caps[1].to_string(), id);
            if let Err(err) = copy_storage_file(blobs, src_storage, &caps[1], &name, id) {
                warn!("error migrating file {} [id {}]: {}", name, &caps[1], err);
            }
            continue;
        }
        if let Some(caps) = INSERT_FILE_RECORD_TAG.captures(&line) {
            let Some(mapped) = mapping.get(&caps[1]) else {
                return Err(TagFsError::Internal(format!("key {} not found", &caps[1])));
            };
            let tag_id: i64 = caps[2]
                .parse()
                .map_err(|e| TagFsError::Internal(format!("bad relation tag id: {}", e)))?;
            meta.with_conn(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO item_tags(item_id, other_id) VALUES (?1, ?2)",
                    params![mapped, tag_id],
                )
                .map_err(|e| TagFsError::DbError(e.to_string()))?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// One-shot import of a legacy H2 dump: tag INSERTs, file records with
/// their blobs, then the file-tag relation pairs.
pub(crate) fn run_import(
    meta: &MetaStore,
    blobs: &BlobStore,
    tags_path: &Path,
    data_path: &Path,
    src_storage: &Path,
) -> TagFsResult<()> {
    info!("importing tags from {}", tags_path.display());
    import_tags(meta, tags_path)?;
    info!("importing data from {}", data_path.display());
    import_data(meta, blobs, data_path, src_storage)?;
    info!("import finished");
    Ok(())
}
