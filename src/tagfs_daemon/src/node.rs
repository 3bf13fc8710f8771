use fuser::{FileAttr, FileType};
use std::time::SystemTime;

use tagfs_lib::{ItemId, ItemType, TagFsResult, TagPath};

use crate::daemon::Ctx;

/// Role of a files directory. `@` is the plain result set; `@@` is either
/// the write-only rename receiver or, when the mount opted in, the
/// tag-annotated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilesVariant {
    Plain,
    RenameReceiver,
    AllTags,
}

/// Tagged node kind; each variant implements the capability subset it
/// supports and the dispatcher answers the taxonomy errno for the rest.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Root,
    Control {
        id: ItemId,
    },
    Browse {
        path: TagPath,
    },
    Files {
        path: TagPath,
        dir_id: ItemId,
        variant: FilesVariant,
    },
    Content {
        id: ItemId,
    },
}

impl Node {
    /// Stable identity used to intern nodes into the inode table.
    pub(crate) fn key(&self) -> String {
        match self {
            Node::Root => "root".to_string(),
            Node::Control { id } => format!("control:{}", id),
            Node::Browse { path } => format!("browse:{}", path),
            Node::Files {
                path,
                dir_id,
                variant,
            } => format!("files:{}:{}:{:?}", path, dir_id, variant),
            Node::Content { id } => format!("content:{}", id),
        }
    }

}

#[derive(Debug, Clone)]
pub(crate) struct DirEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: String,
}

pub(crate) fn kind_of(item_type: ItemType) -> FileType {
    if item_type.is_dir_like() {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

pub(crate) fn dir_attr(ctx: &Ctx, ino: u64) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: 4096,
        blocks: 1,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: FileType::Directory,
        perm: 0o755,
        nlink: 2,
        uid: ctx.uid,
        gid: ctx.gid,
        rdev: 0,
        flags: 0,
        blksize: 4096,
    }
}

/// File attributes delegate to the blob's stat; access time is refreshed
/// on every call, ctime/mtime reflect the blob.
pub(crate) fn content_attr(ctx: &Ctx, ino: u64, id: ItemId) -> TagFsResult<FileAttr> {
    use std::os::unix::fs::PermissionsExt;

    let name = ctx.meta.with_conn(|conn| ctx.name_by_id(conn, id))?;
    let meta = ctx.runtime.block_on(ctx.blobs.metadata(id, &name))?;
    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(FileAttr {
        ino,
        size: meta.len(),
        blocks: (meta.len() + 511) / 512,
        atime: SystemTime::now(),
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind: FileType::RegularFile,
        perm: (meta.permissions().mode() & 0o7777) as u16,
        nlink: 1,
        uid: ctx.uid,
        gid: ctx.gid,
        rdev: 0,
        flags: 0,
        blksize: 4096,
    })
}
