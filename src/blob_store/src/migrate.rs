use log::{info, warn};
use std::path::{Path, PathBuf};

use tagfs_lib::{TagFsError, TagFsResult};

use crate::BLOB_FILENAME;

pub const VERSION_FILE: &str = "version.txt";
pub const CURRENT_LAYOUT_VERSION: u32 = 2;

fn read_version(root: &Path) -> u32 {
    match std::fs::read_to_string(root.join(VERSION_FILE)) {
        Ok(s) => s.trim().parse().unwrap_or(1),
        Err(_) => 1,
    }
}

fn make_old_dir(root: &Path, version: u32) -> TagFsResult<PathBuf> {
    let old_dir = PathBuf::from(format!("{}_v{}", root.display(), version));
    if old_dir.exists() && !old_dir.is_dir() {
        return Err(TagFsError::Internal(format!(
            "{} already exists and is not a directory, can't migrate the storage",
            old_dir.display()
        )));
    }
    std::fs::rename(root, &old_dir)
        .map_err(|e| TagFsError::IoError(format!("move old storage aside failed: {}", e)))?;
    std::fs::create_dir_all(root)
        .map_err(|e| TagFsError::IoError(format!("recreate store root failed: {}", e)))?;
    Ok(old_dir)
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

/// Upgrades the storage root to the current layout generation. Each pass
/// moves the root aside as `<root>_v<old>` and re-derives every blob path
/// from its `<id>_<name>` filename. Running on a current store is a no-op.
pub fn upgrade_storage(root: &Path) -> TagFsResult<()> {
    let mut version = read_version(root);
    while version < CURRENT_LAYOUT_VERSION {
        info!("migrating storage from layout v{} to v{}", version, version + 1);
        let old_dir = make_old_dir(root, version)?;
        walk_files(&old_dir, &mut |path| {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    TagFsError::Internal(format!("non-UTF-8 filename {}", path.display()))
                })?;
            if file_name == VERSION_FILE {
                return Ok(());
            }
            let caps = BLOB_FILENAME.captures(file_name).ok_or_else(|| {
                TagFsError::Internal(format!("bad filename {}", path.display()))
            })?;
            let id: i64 = caps[1]
                .parse()
                .map_err(|e| TagFsError::Internal(format!("bad blob id: {}", e)))?;
            let new_path = crate::derived_path(root, id, &caps[2])?;
            std::fs::rename(path, &new_path).map_err(|e| {
                TagFsError::IoError(format!(
                    "move {} -> {} failed: {}",
                    path.display(),
                    new_path.display(),
                    e
                ))
            })?;
            Ok(())
        })?;
        info!("successfully migrated storage to layout v{}", version + 1);
        version += 1;
    }
    if let Err(e) = std::fs::write(root.join(VERSION_FILE), version.to_string()) {
        warn!("writing {} failed: {}", VERSION_FILE, e);
    }
    Ok(())
}
