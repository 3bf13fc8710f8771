use tokio::fs::OpenOptions;

use tagfs_lib::{ItemId, TagFsResult};

use crate::daemon::{BlobHandle, Ctx};

/// Derives open options from the kernel's flags. Append-mode handles keep
/// writing at end-of-file; everything else writes positionally.
fn open_options(flags: i32) -> (OpenOptions, bool) {
    let mut options = OpenOptions::new();
    let append = flags & libc::O_APPEND != 0;
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
        }
        libc::O_RDWR => {
            options.read(true).write(true);
        }
        _ => {
            options.read(true);
        }
    }
    if append {
        options.append(true);
    }
    if flags & libc::O_TRUNC != 0 {
        options.write(true).truncate(true);
    }
    (options, append)
}

pub(crate) fn open(ctx: &Ctx, id: ItemId, flags: i32) -> TagFsResult<BlobHandle> {
    let name = ctx.meta.with_conn(|conn| ctx.name_by_id(conn, id))?;
    let (options, append) = open_options(flags);
    let file = ctx.runtime.block_on(ctx.blobs.open(id, &name, options))?;
    Ok(BlobHandle { file, append })
}

pub(crate) fn truncate(ctx: &Ctx, id: ItemId, size: u64) -> TagFsResult<()> {
    let name = ctx.meta.with_conn(|conn| ctx.name_by_id(conn, id))?;
    ctx.runtime.block_on(ctx.blobs.truncate(id, &name, size))
}
