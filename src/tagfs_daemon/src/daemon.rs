use fuser::{
    FileAttr, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::runtime::{Handle, Runtime};
use tokio::signal::unix::{signal, SignalKind};

use blob_store::BlobStore;
use tag_meta::{store, CacheStamp, ListingCache, MetaStore};
use tagfs_lib::{Item, ItemId, TagFsError, TagFsResult, TagPath};

use crate::browse;
use crate::content;
use crate::control;
use crate::files::FilesDir;
use crate::node::{content_attr, dir_attr, DirEntry, FilesVariant, Node};
use crate::profile;

const TTL: Duration = Duration::from_secs(1);

pub(crate) const CONTROL_NAME: &str = "tags";
pub(crate) const BROWSE_NAME: &str = "browse";

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub mountpoint: PathBuf,
    pub storage: PathBuf,
    pub database: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub log_cache: bool,
    pub log_fuse: Option<String>,
    pub all_tags: bool,
    pub profile_port: Option<u16>,
}

/// Process-wide collaborators handed to every node operation: the metadata
/// store, the blob store, the ownership triple and the invalidation stamp.
pub(crate) struct Ctx {
    pub runtime: Handle,
    pub meta: MetaStore,
    pub blobs: BlobStore,
    pub stamp: CacheStamp,
    pub uid: u32,
    pub gid: u32,
    pub log_cache: bool,
    pub all_tags: bool,
    content_cache: Mutex<ListingCache>,
}

impl Ctx {
    pub(crate) fn new(
        runtime: Handle,
        meta: MetaStore,
        blobs: BlobStore,
        uid: u32,
        gid: u32,
        log_cache: bool,
        all_tags: bool,
    ) -> Self {
        let stamp = CacheStamp::new();
        let content_cache = Mutex::new(ListingCache::new(&stamp, log_cache));
        Self {
            runtime,
            meta,
            blobs,
            stamp,
            uid,
            gid,
            log_cache,
            all_tags,
            content_cache,
        }
    }

    pub(crate) fn invalidate(&self) {
        self.stamp.bump();
        if self.log_cache {
            debug!("cache invalidated");
        }
    }

    pub(crate) fn content_cache_put(&self, id: ItemId, item: Item) -> TagFsResult<()> {
        lock(&self.content_cache)?.put_by_id(&self.stamp, id, item);
        Ok(())
    }

    /// Current stored name of an item, cached by id.
    pub(crate) fn name_by_id(&self, conn: &Connection, id: ItemId) -> TagFsResult<String> {
        let mut cache = lock(&self.content_cache)?;
        if let Some(cached) = cache.get_by_id(&self.stamp, id) {
            return match cached {
                Some(item) => Ok(item.name),
                None => Err(TagFsError::NotFound(format!("item {}", id))),
            };
        }
        match store::get_by_id(conn, id)? {
            Some(item) => {
                let name = item.name.clone();
                cache.put_by_id(&self.stamp, id, item);
                Ok(name)
            }
            None => {
                cache.put_missing_by_id(&self.stamp, id);
                Err(TagFsError::NotFound(format!("item {}", id)))
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> TagFsResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| TagFsError::Internal(format!("lock poisoned: {}", e)))
}

pub(crate) struct NodeEntry {
    pub node: Node,
    pub cache: Mutex<ListingCache>,
}

struct NodeMaps {
    by_ino: HashMap<u64, Arc<NodeEntry>>,
    by_key: HashMap<String, u64>,
}

/// Interns nodes under stable keys so repeated lookups of the same
/// directory reuse one entry (and its listing cache).
pub(crate) struct NodeTable {
    next_ino: AtomicU64,
    maps: Mutex<NodeMaps>,
}

impl NodeTable {
    fn new(ctx: &Ctx) -> Self {
        let root = Arc::new(NodeEntry {
            node: Node::Root,
            cache: Mutex::new(ListingCache::new(&ctx.stamp, ctx.log_cache)),
        });
        let mut by_ino = HashMap::new();
        let mut by_key = HashMap::new();
        by_ino.insert(FUSE_ROOT_ID, root);
        by_key.insert(Node::Root.key(), FUSE_ROOT_ID);
        Self {
            next_ino: AtomicU64::new(FUSE_ROOT_ID + 1),
            maps: Mutex::new(NodeMaps { by_ino, by_key }),
        }
    }

    fn get(&self, ino: u64) -> Option<Arc<NodeEntry>> {
        self.maps.lock().ok()?.by_ino.get(&ino).cloned()
    }

    fn intern(&self, node: Node, ctx: &Ctx) -> TagFsResult<(u64, Arc<NodeEntry>)> {
        let key = node.key();
        let mut maps = lock(&self.maps)?;
        if let Some(ino) = maps.by_key.get(&key) {
            let ino = *ino;
            if let Some(entry) = maps.by_ino.get(&ino) {
                return Ok((ino, entry.clone()));
            }
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(NodeEntry {
            node,
            cache: Mutex::new(ListingCache::new(&ctx.stamp, ctx.log_cache)),
        });
        maps.by_key.insert(key, ino);
        maps.by_ino.insert(ino, entry.clone());
        Ok((ino, entry))
    }
}

pub(crate) struct BlobHandle {
    pub file: tokio::fs::File,
    pub append: bool,
}

struct HandleTable {
    next_fh: AtomicU64,
    handles: Mutex<HashMap<u64, BlobHandle>>,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, handle: BlobHandle) -> TagFsResult<u64> {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        lock(&self.handles)?.insert(fh, handle);
        Ok(fh)
    }

    fn with_handle<T>(
        &self,
        fh: u64,
        f: impl FnOnce(&mut BlobHandle) -> TagFsResult<T>,
    ) -> TagFsResult<T> {
        let mut handles = lock(&self.handles)?;
        let handle = handles
            .get_mut(&fh)
            .ok_or_else(|| TagFsError::InvalidParam(format!("unknown file handle {}", fh)))?;
        f(handle)
    }

    fn remove(&self, fh: u64) -> Option<BlobHandle> {
        self.handles.lock().ok()?.remove(&fh)
    }
}

pub(crate) fn map_fs_err(err: &TagFsError) -> i32 {
    match err {
        TagFsError::NotFound(_) => libc::ENOENT,
        TagFsError::AlreadyExists(_) => libc::EEXIST,
        TagFsError::NotEmpty(_) => libc::ENOTEMPTY,
        TagFsError::InvalidParam(_) => libc::EINVAL,
        TagFsError::IsDirectory(_) => libc::EISDIR,
        TagFsError::NotDirectory(_) => libc::ENOTDIR,
        TagFsError::AccessDenied(_) => libc::EACCES,
        TagFsError::NotPermitted(_) => libc::EPERM,
        TagFsError::IoError(_) | TagFsError::DbError(_) | TagFsError::Internal(_) => libc::EIO,
        TagFsError::Unsupported(_) => libc::ENOSYS,
    }
}

pub(crate) struct TagFs {
    ctx: Arc<Ctx>,
    nodes: NodeTable,
    handles: HandleTable,
    log_fuse: Option<String>,
}

impl TagFs {
    pub(crate) fn new(ctx: Arc<Ctx>, log_fuse: Option<String>) -> Self {
        let nodes = NodeTable::new(&ctx);
        Self {
            ctx,
            nodes,
            handles: HandleTable::new(),
            log_fuse,
        }
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        if let Some(filter) = &self.log_fuse {
            let msg = args.to_string();
            if filter.is_empty() || msg.contains(filter.as_str()) {
                info!("fuse: {}", msg);
            }
        }
    }

    fn entry(&self, ino: u64) -> TagFsResult<Arc<NodeEntry>> {
        self.nodes
            .get(ino)
            .ok_or_else(|| TagFsError::NotFound(format!("inode {}", ino)))
    }

    fn files_dir<'a>(
        &'a self,
        entry: &'a NodeEntry,
        path: &'a TagPath,
        dir_id: ItemId,
        variant: FilesVariant,
    ) -> FilesDir<'a> {
        FilesDir {
            ctx: &self.ctx,
            cache: &entry.cache,
            path,
            dir_id,
            variant,
        }
    }

    fn attr_of(&self, ino: u64, node: &Node) -> TagFsResult<FileAttr> {
        match node {
            Node::Content { id } => content_attr(&self.ctx, ino, *id),
            _ => Ok(dir_attr(&self.ctx, ino)),
        }
    }

    pub(crate) fn lookup_entry(&self, parent: u64, name: &str) -> TagFsResult<(u64, FileAttr)> {
        let entry = self.entry(parent)?;
        let node = match &entry.node {
            Node::Root => match name {
                CONTROL_NAME => Node::Control { id: 0 },
                BROWSE_NAME => Node::Browse {
                    path: TagPath::root(),
                },
                _ => return Err(TagFsError::NotFound(name.to_string())),
            },
            Node::Control { id } => control::lookup(&self.ctx, *id, name)?,
            Node::Browse { path } => browse::lookup(&self.ctx, &entry.cache, path, name)?,
            Node::Files {
                path,
                dir_id,
                variant,
            } => self
                .files_dir(&entry, path, *dir_id, *variant)
                .lookup(name)?,
            Node::Content { .. } => {
                return Err(TagFsError::NotDirectory(format!("inode {}", parent)))
            }
        };
        let (ino, interned) = self.nodes.intern(node, &self.ctx)?;
        let attr = self.attr_of(ino, &interned.node)?;
        Ok((ino, attr))
    }

    pub(crate) fn getattr_entry(&self, ino: u64) -> TagFsResult<FileAttr> {
        let entry = self.entry(ino)?;
        self.attr_of(ino, &entry.node)
    }

    pub(crate) fn readdir_entries(&self, ino: u64) -> TagFsResult<Vec<DirEntry>> {
        let entry = self.entry(ino)?;
        let mut children = match &entry.node {
            Node::Root => {
                let (control_ino, _) = self.nodes.intern(Node::Control { id: 0 }, &self.ctx)?;
                let (browse_ino, _) = self.nodes.intern(
                    Node::Browse {
                        path: TagPath::root(),
                    },
                    &self.ctx,
                )?;
                vec![
                    DirEntry {
                        ino: control_ino,
                        kind: fuser::FileType::Directory,
                        name: CONTROL_NAME.to_string(),
                    },
                    DirEntry {
                        ino: browse_ino,
                        kind: fuser::FileType::Directory,
                        name: BROWSE_NAME.to_string(),
                    },
                ]
            }
            Node::Control { id } => control::readdir(&self.ctx, *id)?,
            Node::Browse { path } => browse::readdir(&self.ctx, &entry.cache, path, ino)?,
            Node::Files {
                path,
                dir_id,
                variant,
            } => self.files_dir(&entry, path, *dir_id, *variant).readdir()?,
            Node::Content { .. } => {
                return Err(TagFsError::NotDirectory(format!("inode {}", ino)))
            }
        };
        let mut entries = vec![
            DirEntry {
                ino,
                kind: fuser::FileType::Directory,
                name: ".".to_string(),
            },
            DirEntry {
                ino,
                kind: fuser::FileType::Directory,
                name: "..".to_string(),
            },
        ];
        entries.append(&mut children);
        Ok(entries)
    }

    pub(crate) fn create_entry(
        &self,
        parent: u64,
        name: &str,
        flags: i32,
    ) -> TagFsResult<(u64, FileAttr, u64)> {
        let entry = self.entry(parent)?;
        let (id, file) = match &entry.node {
            Node::Files {
                path,
                dir_id,
                variant,
            } => self.files_dir(&entry, path, *dir_id, *variant).create(name)?,
            Node::Content { .. } => {
                return Err(TagFsError::NotDirectory(format!("inode {}", parent)))
            }
            _ => return Err(TagFsError::AccessDenied(format!("create {:?}", name))),
        };
        let fh = self.handles.insert(BlobHandle {
            file,
            append: flags & libc::O_APPEND != 0,
        })?;
        let (ino, interned) = self.nodes.intern(Node::Content { id }, &self.ctx)?;
        let attr = self.attr_of(ino, &interned.node)?;
        Ok((ino, attr, fh))
    }

    pub(crate) fn mkdir_entry(&self, parent: u64, name: &str) -> TagFsResult<(u64, FileAttr)> {
        let entry = self.entry(parent)?;
        let node = match &entry.node {
            Node::Control { id } => control::mkdir(&self.ctx, *id, name)?,
            Node::Files {
                path,
                dir_id,
                variant,
            } => self.files_dir(&entry, path, *dir_id, *variant).mkdir(name)?,
            Node::Content { .. } => {
                return Err(TagFsError::NotDirectory(format!("inode {}", parent)))
            }
            _ => return Err(TagFsError::NotPermitted(format!("mkdir {:?}", name))),
        };
        let (ino, interned) = self.nodes.intern(node, &self.ctx)?;
        let attr = self.attr_of(ino, &interned.node)?;
        Ok((ino, attr))
    }

    pub(crate) fn unlink_entry(&self, parent: u64, name: &str) -> TagFsResult<()> {
        let entry = self.entry(parent)?;
        match &entry.node {
            Node::Control { id } => control::remove(&self.ctx, *id, name),
            Node::Files {
                path,
                dir_id,
                variant,
            } => self.files_dir(&entry, path, *dir_id, *variant).remove(name),
            Node::Content { .. } => Err(TagFsError::NotDirectory(format!("inode {}", parent))),
            _ => Err(TagFsError::NotPermitted(format!("remove {:?}", name))),
        }
    }

    pub(crate) fn rename_entry(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> TagFsResult<()> {
        let src = self.entry(parent)?;
        let dst = self.entry(new_parent)?;
        match (&src.node, &dst.node) {
            (Node::Control { id }, Node::Control { id: target }) => {
                control::rename(&self.ctx, *id, name, *target, new_name)
            }
            (Node::Control { .. }, _) => Err(TagFsError::InvalidParam(
                "rename target is not a tag directory".to_string(),
            )),
            (
                Node::Files {
                    path,
                    dir_id,
                    variant,
                },
                Node::Files {
                    path: dst_path,
                    dir_id: dst_dir_id,
                    variant: dst_variant,
                },
            ) => {
                let src_dir = self.files_dir(&src, path, *dir_id, *variant);
                let dst_dir = self.files_dir(&dst, dst_path, *dst_dir_id, *dst_variant);
                src_dir.rename(name, &dst_dir, new_name)
            }
            (Node::Files { .. }, _) => Err(TagFsError::InvalidParam(
                "rename target is not a files directory".to_string(),
            )),
            (Node::Content { .. }, _) => {
                Err(TagFsError::NotDirectory(format!("inode {}", parent)))
            }
            _ => Err(TagFsError::NotPermitted(format!("rename {:?}", name))),
        }
    }

    pub(crate) fn open_entry(&self, ino: u64, flags: i32) -> TagFsResult<u64> {
        let entry = self.entry(ino)?;
        let id = match &entry.node {
            Node::Content { id } => *id,
            _ => return Err(TagFsError::InvalidParam(format!("open on directory {}", ino))),
        };
        let handle = content::open(&self.ctx, id, flags)?;
        self.handles.insert(handle)
    }

    pub(crate) fn read_handle(&self, fh: u64, offset: i64, size: u32) -> TagFsResult<Vec<u8>> {
        self.handles.with_handle(fh, |handle| {
            let buf = self.ctx.runtime.block_on(async {
                handle
                    .file
                    .seek(std::io::SeekFrom::Start(offset as u64))
                    .await?;
                let mut buf = vec![0u8; size as usize];
                let mut total = 0usize;
                loop {
                    let n = handle.file.read(&mut buf[total..]).await?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                buf.truncate(total);
                Ok::<_, std::io::Error>(buf)
            })?;
            Ok(buf)
        })
    }

    pub(crate) fn write_handle(&self, fh: u64, offset: i64, data: &[u8]) -> TagFsResult<usize> {
        self.handles.with_handle(fh, |handle| {
            self.ctx.runtime.block_on(async {
                // append handles write at end-of-file, positional otherwise
                if !handle.append {
                    handle
                        .file
                        .seek(std::io::SeekFrom::Start(offset as u64))
                        .await?;
                }
                handle.file.write_all(data).await?;
                Ok::<_, std::io::Error>(())
            })?;
            Ok(data.len())
        })
    }

    pub(crate) fn release_handle(&self, fh: u64) -> TagFsResult<()> {
        if let Some(mut handle) = self.handles.remove(fh) {
            self.ctx
                .runtime
                .block_on(async { handle.file.flush().await })?;
        }
        Ok(())
    }

    pub(crate) fn truncate_entry(&self, ino: u64, size: u64) -> TagFsResult<FileAttr> {
        let entry = self.entry(ino)?;
        let id = match &entry.node {
            Node::Content { id } => *id,
            _ => return Err(TagFsError::IsDirectory(format!("inode {}", ino))),
        };
        content::truncate(&self.ctx, id, size)?;
        self.attr_of(ino, &entry.node)
    }
}

impl Filesystem for TagFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: ReplyEntry) {
        let name = match name.to_str() {
            Some(v) => v,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        self.trace(format_args!("lookup parent={} name={:?}", parent, name));
        match self.lookup_entry(parent, name) {
            Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        self.trace(format_args!("getattr ino={}", ino));
        match self.getattr_entry(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        self.trace(format_args!("readdir ino={} offset={}", ino, offset));
        match self.readdir_entries(ino) {
            Ok(entries) => {
                for (index, entry) in entries.iter().enumerate().skip(offset as usize) {
                    if reply.add(entry.ino, (index + 1) as i64, entry.kind, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.trace(format_args!("open ino={} flags={:#o}", ino, flags));
        match self.open_entry(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match name.to_str() {
            Some(v) => v,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        self.trace(format_args!("create parent={} name={:?}", parent, name));
        match self.create_entry(parent, name, flags) {
            Ok((_ino, attr, fh)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(v) => v,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        self.trace(format_args!("mkdir parent={} name={:?}", parent, name));
        match self.mkdir_entry(parent, name) {
            Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(v) => v,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        self.trace(format_args!("unlink parent={} name={:?}", parent, name));
        match self.unlink_entry(parent, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: ReplyEmpty) {
        self.unlink(req, parent, name, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        newparent: u64,
        newname: &std::ffi::OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (name.to_str(), newname.to_str()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        self.trace(format_args!(
            "rename parent={} name={:?} newparent={} newname={:?}",
            parent, name, newparent, newname
        ));
        match self.rename_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.trace(format_args!("read fh={} offset={} size={}", fh, offset, size));
        match self.read_handle(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.trace(format_args!("write fh={} offset={} len={}", fh, offset, data.len()));
        match self.write_handle(fh, offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.trace(format_args!("setattr ino={} size={:?}", ino, size));
        let result = match size {
            Some(size) => self.truncate_entry(ino, size),
            None => self.getattr_entry(ino),
        };
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // accepted so editors that insist on syncing keep working
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.trace(format_args!("release fh={}", fh));
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(map_fs_err(&err)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, 512, 255, 0);
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

pub fn run_mount(options: MountOptions) -> TagFsResult<()> {
    let runtime =
        Runtime::new().map_err(|e| TagFsError::Internal(format!("runtime init failed: {}", e)))?;
    let meta = MetaStore::open(&options.database)?;
    let blobs = BlobStore::new(&options.storage)?;
    let ctx = Arc::new(Ctx::new(
        runtime.handle().clone(),
        meta,
        blobs,
        options.uid,
        options.gid,
        options.log_cache,
        options.all_tags,
    ));

    if let Some(port) = options.profile_port {
        profile::spawn(&runtime, port, ctx.clone());
    }

    std::fs::create_dir_all(&options.mountpoint).map_err(|e| {
        TagFsError::IoError(format!(
            "create mountpoint {} failed: {}",
            options.mountpoint.display(),
            e
        ))
    })?;

    let filesystem = TagFs::new(ctx, options.log_fuse.clone());
    let mount_options = vec![
        MountOption::FSName("tagfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];
    info!(
        "mounting at {}, storage={}, database={}",
        options.mountpoint.display(),
        options.storage.display(),
        options.database.display()
    );
    let session = fuser::spawn_mount2(filesystem, &options.mountpoint, &mount_options)
        .map_err(|e| TagFsError::IoError(format!("mount failed: {}", e)))?;

    let wait = runtime.block_on(async {
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
        Ok::<_, std::io::Error>(())
    });
    if let Err(e) = wait {
        warn!("signal wait failed: {}", e);
        session.join();
        return Ok(());
    }
    info!("unmounting {}", options.mountpoint.display());
    drop(session);
    Ok(())
}
