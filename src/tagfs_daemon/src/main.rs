mod browse;
mod content;
mod control;
mod daemon;
mod files;
mod fsck;
mod import;
mod node;
mod profile;

use log::{error, info, warn};
use std::path::{Path, PathBuf};

use blob_store::BlobStore;
use tag_meta::MetaStore;
use tagfs_lib::{TagFsError, TagFsResult};

use crate::daemon::MountOptions;

const DEFAULT_STORAGE: &str = "storage";
const DEFAULT_DATABASE: &str = "fs.db";
const PROFILE_PORT: u16 = 6060;

enum Command {
    Mount(MountOptions),
    Fsck {
        mountpoint: PathBuf,
        storage: PathBuf,
        database: PathBuf,
        fix: bool,
    },
    Import {
        storage: PathBuf,
        database: PathBuf,
        tags: PathBuf,
        data: PathBuf,
        src_storage: PathBuf,
    },
}

fn usage() -> String {
    format!(
        "usage: tagfs <mountpoint> [options]\n\
         \x20      tagfs --fsck [--fix] <mountpoint> [options]\n\
         \x20      tagfs --import --tags <file> --data <file> --src-storage <dir> [options]\n\
         options:\n\
         \x20 --storage <dir>      blob storage root (default: {})\n\
         \x20 --database <path>    metadata database (default: {})\n\
         \x20 --uidgid <u:g>       ownership reported for every entry (default: current user)\n\
         \x20 --verbose            debug logging\n\
         \x20 --log-cache          log listing-cache hits and invalidations\n\
         \x20 --log-fuse <substr>  log FUSE requests matching <substr>\n\
         \x20 --all-tags           list @@ with tag-annotated names instead of a rename receiver\n\
         \x20 --profile            heap profile endpoint on 127.0.0.1:{}",
        DEFAULT_STORAGE, DEFAULT_DATABASE, PROFILE_PORT
    )
}

struct ParsedArgs {
    positional: Vec<String>,
    storage: PathBuf,
    database: PathBuf,
    uid: u32,
    gid: u32,
    verbose: bool,
    log_cache: bool,
    log_fuse: Option<String>,
    all_tags: bool,
    profile: bool,
    fsck: bool,
    fix: bool,
    import: bool,
    tags: Option<PathBuf>,
    data: Option<PathBuf>,
    src_storage: Option<PathBuf>,
}

fn parse_uidgid(value: &str) -> Result<(u32, u32), String> {
    let (uid, gid) = value
        .split_once(':')
        .ok_or_else(|| format!("invalid --uidgid value: {}", value))?;
    let uid = uid
        .parse()
        .map_err(|_| format!("invalid uid in --uidgid: {}", value))?;
    let gid = gid
        .parse()
        .map_err(|_| format!("invalid gid in --uidgid: {}", value))?;
    Ok((uid, gid))
}

fn parse_args(args: &[String]) -> Result<(Command, bool), String> {
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" {
        return Err(usage());
    }

    let mut parsed = ParsedArgs {
        positional: Vec::new(),
        storage: PathBuf::from(DEFAULT_STORAGE),
        database: PathBuf::from(DEFAULT_DATABASE),
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        verbose: false,
        log_cache: false,
        log_fuse: None,
        all_tags: false,
        profile: false,
        fsck: false,
        fix: false,
        import: false,
        tags: None,
        data: None,
        src_storage: None,
    };

    let value_for = |i: &mut usize, flag: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("missing value for {}", flag))
    };

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--storage" => parsed.storage = PathBuf::from(value_for(&mut i, "--storage")?),
            "--database" => parsed.database = PathBuf::from(value_for(&mut i, "--database")?),
            "--uidgid" => {
                let value = value_for(&mut i, "--uidgid")?;
                let (uid, gid) = parse_uidgid(&value)?;
                parsed.uid = uid;
                parsed.gid = gid;
            }
            "--verbose" => parsed.verbose = true,
            "--log-cache" => parsed.log_cache = true,
            "--log-fuse" => parsed.log_fuse = Some(value_for(&mut i, "--log-fuse")?),
            "--all-tags" => parsed.all_tags = true,
            "--profile" => parsed.profile = true,
            "--fsck" => parsed.fsck = true,
            "--fix" => parsed.fix = true,
            "--import" => parsed.import = true,
            "--tags" => parsed.tags = Some(PathBuf::from(value_for(&mut i, "--tags")?)),
            "--data" => parsed.data = Some(PathBuf::from(value_for(&mut i, "--data")?)),
            "--src-storage" => {
                parsed.src_storage = Some(PathBuf::from(value_for(&mut i, "--src-storage")?))
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
            other => parsed.positional.push(other.to_string()),
        }
        i += 1;
    }

    let verbose = parsed.verbose;
    if parsed.import {
        let tags = parsed.tags.ok_or_else(|| "missing --tags".to_string())?;
        let data = parsed.data.ok_or_else(|| "missing --data".to_string())?;
        let src_storage = parsed
            .src_storage
            .ok_or_else(|| "missing --src-storage".to_string())?;
        return Ok((
            Command::Import {
                storage: parsed.storage,
                database: parsed.database,
                tags,
                data,
                src_storage,
            },
            verbose,
        ));
    }

    let mountpoint = parsed
        .positional
        .first()
        .map(PathBuf::from)
        .ok_or_else(|| format!("missing mountpoint\n{}", usage()))?;
    if parsed.positional.len() > 1 {
        return Err(format!("too many arguments\n{}", usage()));
    }

    if parsed.fsck {
        return Ok((
            Command::Fsck {
                mountpoint,
                storage: parsed.storage,
                database: parsed.database,
                fix: parsed.fix,
            },
            verbose,
        ));
    }

    Ok((
        Command::Mount(MountOptions {
            mountpoint,
            storage: parsed.storage,
            database: parsed.database,
            uid: parsed.uid,
            gid: parsed.gid,
            log_cache: parsed.log_cache,
            log_fuse: parsed.log_fuse,
            all_tags: parsed.all_tags,
            profile_port: parsed.profile.then_some(PROFILE_PORT),
        }),
        verbose,
    ))
}

fn attempt_unmount(mountpoint: &Path) {
    match std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .status()
    {
        Ok(status) if status.success() => info!("unmounted {}", mountpoint.display()),
        Ok(status) => warn!(
            "unmounting {} failed with {}",
            mountpoint.display(),
            status
        ),
        Err(err) => warn!("unmounting {} failed: {}", mountpoint.display(), err),
    }
}

fn run_fsck_command(
    mountpoint: &Path,
    storage: &Path,
    database: &Path,
    fix: bool,
) -> TagFsResult<()> {
    let meta = MetaStore::open(database)?;
    let blobs = BlobStore::new(storage)?;
    let report = fsck::run_fsck(&meta, &blobs, fix)?;
    attempt_unmount(mountpoint);
    if report.errors > 0 {
        return Err(TagFsError::Internal(format!(
            "found {} errors, {} fixed",
            report.errors, report.fixed
        )));
    }
    Ok(())
}

fn run_import_command(
    storage: &Path,
    database: &Path,
    tags: &Path,
    data: &Path,
    src_storage: &Path,
) -> TagFsResult<()> {
    let meta = MetaStore::open(database)?;
    let blobs = BlobStore::new(storage)?;
    import::run_import(&meta, &blobs, tags, data, src_storage)
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, verbose) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let result = match command {
        Command::Mount(options) => daemon::run_mount(options),
        Command::Fsck {
            mountpoint,
            storage,
            database,
            fix,
        } => run_fsck_command(&mountpoint, &storage, &database, fix),
        Command::Import {
            storage,
            database,
            tags,
            data,
            src_storage,
        } => run_import_command(&storage, &database, &tags, &data, &src_storage),
    };

    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod daemon_tests;

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_mount_defaults() {
        let (command, verbose) = parse_args(&args(&["/mnt/tags"])).unwrap();
        assert!(!verbose);
        match command {
            Command::Mount(options) => {
                assert_eq!(options.mountpoint, PathBuf::from("/mnt/tags"));
                assert_eq!(options.storage, PathBuf::from(DEFAULT_STORAGE));
                assert_eq!(options.database, PathBuf::from(DEFAULT_DATABASE));
                assert!(!options.all_tags);
                assert!(options.profile_port.is_none());
            }
            _ => panic!("expected mount command"),
        }
    }

    #[test]
    fn test_parse_mount_options() {
        let (command, verbose) = parse_args(&args(&[
            "/mnt/tags",
            "--storage",
            "/data/blobs",
            "--database",
            "/data/fs.db",
            "--uidgid",
            "1000:1001",
            "--verbose",
            "--log-cache",
            "--log-fuse",
            "apple",
            "--all-tags",
            "--profile",
        ]))
        .unwrap();
        assert!(verbose);
        match command {
            Command::Mount(options) => {
                assert_eq!(options.uid, 1000);
                assert_eq!(options.gid, 1001);
                assert!(options.log_cache);
                assert_eq!(options.log_fuse.as_deref(), Some("apple"));
                assert!(options.all_tags);
                assert_eq!(options.profile_port, Some(PROFILE_PORT));
            }
            _ => panic!("expected mount command"),
        }
    }

    #[test]
    fn test_parse_fsck() {
        let (command, _) = parse_args(&args(&["--fsck", "--fix", "/mnt/tags"])).unwrap();
        match command {
            Command::Fsck {
                mountpoint, fix, ..
            } => {
                assert_eq!(mountpoint, PathBuf::from("/mnt/tags"));
                assert!(fix);
            }
            _ => panic!("expected fsck command"),
        }
    }

    #[test]
    fn test_parse_import() {
        let (command, _) = parse_args(&args(&[
            "--import",
            "--tags",
            "tags.sql",
            "--data",
            "data.sql",
            "--src-storage",
            "/old/storage",
        ]))
        .unwrap();
        match command {
            Command::Import {
                tags,
                data,
                src_storage,
                ..
            } => {
                assert_eq!(tags, PathBuf::from("tags.sql"));
                assert_eq!(data, PathBuf::from("data.sql"));
                assert_eq!(src_storage, PathBuf::from("/old/storage"));
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        assert!(parse_args(&args(&["/mnt/tags", "--bogus"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--import", "--tags", "t"])).is_err());
        assert!(parse_args(&args(&["/mnt", "--uidgid", "nope"])).is_err());
    }
}
