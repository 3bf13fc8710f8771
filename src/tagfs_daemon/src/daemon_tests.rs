use fuser::FUSE_ROOT_ID;
use std::sync::Arc;
use tokio::runtime::Runtime;

use blob_store::BlobStore;
use tag_meta::MetaStore;
use tagfs_lib::{TagFsError, TagFsResult};

use crate::daemon::{Ctx, TagFs};
use crate::fsck::{self, FsckReport};

struct Fixture {
    _runtime: Runtime,
    _tmp: tempfile::TempDir,
    fs: TagFs,
    meta: MetaStore,
    blobs: BlobStore,
}

fn fixture_with(all_tags: bool) -> Fixture {
    let runtime = Runtime::new().unwrap();
    let tmp = tempfile::TempDir::new().unwrap();
    let meta = MetaStore::open(&tmp.path().join("fs.db")).unwrap();
    let blobs = BlobStore::new(tmp.path().join("storage")).unwrap();
    let ctx = Arc::new(Ctx::new(
        runtime.handle().clone(),
        meta.clone(),
        blobs.clone(),
        1000,
        1000,
        false,
        all_tags,
    ));
    let fs = TagFs::new(ctx, None);
    Fixture {
        _runtime: runtime,
        _tmp: tmp,
        fs,
        meta,
        blobs,
    }
}

fn fixture() -> Fixture {
    fixture_with(false)
}

impl Fixture {
    fn ino(&self, path: &str) -> TagFsResult<u64> {
        let mut current = FUSE_ROOT_ID;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let (next, _attr) = self.fs.lookup_entry(current, part)?;
            current = next;
        }
        Ok(current)
    }

    fn mkdir(&self, parent_path: &str, name: &str) -> u64 {
        let parent = self.ino(parent_path).unwrap();
        self.fs.mkdir_entry(parent, name).unwrap().0
    }

    fn create_file(&self, files_path: &str, name: &str, content: &[u8]) -> u64 {
        let parent = self.ino(files_path).unwrap();
        let (ino, _attr, fh) = self.fs.create_entry(parent, name, libc::O_RDWR).unwrap();
        self.fs.write_handle(fh, 0, content).unwrap();
        self.fs.release_handle(fh).unwrap();
        ino
    }

    fn read_file(&self, ino: u64) -> Vec<u8> {
        let fh = self.fs.open_entry(ino, libc::O_RDONLY).unwrap();
        let data = self.fs.read_handle(fh, 0, 1 << 20).unwrap();
        self.fs.release_handle(fh).unwrap();
        data
    }

    fn names(&self, path: &str) -> Vec<String> {
        let ino = self.ino(path).unwrap();
        let mut names: Vec<String> = self
            .fs
            .readdir_entries(ino)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .filter(|n| n != "." && n != "..")
            .collect();
        names.sort();
        names
    }
}

#[test]
fn test_root_layout() {
    let fx = fixture();
    assert_eq!(fx.names(""), vec!["browse", "tags"]);
    assert!(fx.ino("tags").is_ok());
    assert!(fx.ino("browse").is_ok());
    assert!(matches!(
        fx.ino("elsewhere"),
        Err(TagFsError::NotFound(_))
    ));
}

#[test]
fn test_scenario_create_and_filter() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags", "round");
    fx.create_file("browse/red/round/@", "apple", b"fruit");

    assert!(fx.ino("browse/red/@/apple").is_ok());
    assert!(fx.ino("browse/round/@/apple").is_ok());
    assert!(fx.ino("browse/red/round/@/apple").is_ok());
    assert!(matches!(
        fx.ino("browse/red/_/round/@/apple"),
        Err(TagFsError::NotFound(_))
    ));

    let ino = fx.ino("browse/red/@/apple").unwrap();
    assert_eq!(fx.read_file(ino), b"fruit");
}

#[test]
fn test_scenario_grouptag_expansion() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags", "blue");
    fx.mkdir("tags", "round");
    fx.mkdir("tags/red", "!colors |red, blue|");
    fx.create_file("browse/red/round/@", "apple", b"fruit");

    assert!(fx.ino("browse/colors/red/@").is_ok());
    assert_eq!(fx.names("browse/colors/red/@"), fx.names("browse/red/@"));
    assert_eq!(fx.names("browse/colors/red/@"), vec!["apple"]);
}

#[test]
fn test_scenario_duplicate_disambiguation() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    fx.mkdir("tags", "y");
    let first = fx.create_file("browse/x/@", "doc", b"one");
    let second = fx.create_file("browse/y/@", "doc", b"two");
    assert_ne!(first, second);

    let listed = fx.names("browse/@");
    assert_eq!(listed.len(), 2);
    for name in &listed {
        assert!(name.starts_with('|'), "expected id prefix, got {}", name);
    }

    // opening a prefixed name yields exactly the file with that id
    let mut bodies: Vec<Vec<u8>> = listed
        .iter()
        .map(|name| {
            let ino = fx.ino(&format!("browse/@/{}", name)).unwrap();
            fx.read_file(ino)
        })
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn test_all_tags_listing() {
    let fx = fixture_with(true);
    fx.mkdir("tags", "x");
    fx.mkdir("tags", "y");
    fx.create_file("browse/x/@", "doc", b"one");
    fx.create_file("browse/y/@", "doc", b"two");

    let listed = fx.names("browse/@@");
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|n| n.contains("|x|")));
    assert!(listed.iter().any(|n| n.contains("|y|")));
    for name in &listed {
        assert!(name.ends_with("|doc"));
        // the annotated name resolves back to its file
        assert!(fx.ino(&format!("browse/@@/{}", name)).is_ok());
    }
}

#[test]
fn test_rename_receiver_is_opaque() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    fx.create_file("browse/x/@", "doc", b"one");
    assert!(fx.names("browse/x/@@").is_empty());
    assert!(matches!(
        fx.ino("browse/x/@@/doc"),
        Err(TagFsError::NotFound(_))
    ));
}

#[test]
fn test_scenario_control_rename() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.create_file("browse/red/@", "apple", b"fruit");

    let tags_ino = fx.ino("tags").unwrap();
    fx.fs
        .rename_entry(tags_ino, "red", tags_ino, "crimson")
        .unwrap();

    assert!(fx.ino("browse/crimson/@/apple").is_ok());
    assert!(matches!(
        fx.ino("browse/red"),
        Err(TagFsError::NotFound(_))
    ));
}

#[test]
fn test_scenario_remove_file() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.create_file("browse/red/@", "apple", b"fruit");

    let item = fx
        .meta
        .with_conn(|conn| Ok(tag_meta::store::get_by_name(conn, "apple")?))
        .unwrap()
        .unwrap();
    let blob = fx.blobs.blob_path(item.id, "apple").unwrap();
    assert!(blob.exists());

    let files_ino = fx.ino("browse/red/@").unwrap();
    fx.fs.unlink_entry(files_ino, "apple").unwrap();

    assert!(!blob.exists());
    fx.meta
        .with_conn(|conn| {
            assert!(tag_meta::store::get_by_id(conn, item.id)?.is_none());
            let relations: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM item_tags WHERE item_id = ?1 OR other_id = ?1",
                    rusqlite::params![item.id],
                    |row| row.get(0),
                )
                .map_err(|e| TagFsError::DbError(e.to_string()))?;
            assert_eq!(relations, 0);
            Ok(())
        })
        .unwrap();
    assert!(fx.names("browse/red/@").is_empty());
}

#[test]
fn test_scenario_fsck_recovers_missing_blob() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.create_file("browse/red/@", "apple", b"fruit");

    // clean store first
    assert_eq!(
        fsck::run_fsck(&fx.meta, &fx.blobs, false).unwrap(),
        FsckReport { errors: 0, fixed: 0 }
    );

    let item = fx
        .meta
        .with_conn(|conn| Ok(tag_meta::store::get_by_name(conn, "apple")?))
        .unwrap()
        .unwrap();
    std::fs::remove_file(fx.blobs.blob_path(item.id, "apple").unwrap()).unwrap();

    let report = fsck::run_fsck(&fx.meta, &fx.blobs, false).unwrap();
    assert_eq!(report, FsckReport { errors: 1, fixed: 0 });

    let report = fsck::run_fsck(&fx.meta, &fx.blobs, true).unwrap();
    assert_eq!(report, FsckReport { errors: 1, fixed: 1 });

    let report = fsck::run_fsck(&fx.meta, &fx.blobs, false).unwrap();
    assert_eq!(report, FsckReport { errors: 0, fixed: 0 });
    fx.meta
        .with_conn(|conn| {
            assert!(tag_meta::store::get_by_id(conn, item.id)?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_fsck_rehomes_orphan_blob() {
    let fx = fixture();
    // a blob with no database row
    let stray = fx.blobs.blob_path(31, "stray").unwrap();
    std::fs::write(&stray, b"lost data").unwrap();

    let report = fsck::run_fsck(&fx.meta, &fx.blobs, true).unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.fixed, 1);
    assert!(!stray.exists());

    assert!(fx.ino("tags/lost+found").is_ok());
    let recovered = fx.names("browse/lost+found/@");
    assert_eq!(recovered, vec!["000000031_stray"]);
    let ino = fx.ino("browse/lost+found/@/000000031_stray").unwrap();
    assert_eq!(fx.read_file(ino), b"lost data");
}

#[test]
fn test_rename_is_tag_relocation() {
    let fx = fixture();
    fx.mkdir("tags", "a");
    fx.mkdir("tags", "b");
    fx.create_file("browse/a/@", "f", b"body");

    let src = fx.ino("browse/a/@").unwrap();
    let dst = fx.ino("browse/b/@@").unwrap();
    fx.fs.rename_entry(src, "f", dst, "f").unwrap();

    assert_eq!(fx.names("browse/b/@"), vec!["f"]);
    assert!(fx.names("browse/a/@").is_empty());

    let item = fx
        .meta
        .with_conn(|conn| Ok(tag_meta::store::get_by_name(conn, "f")?))
        .unwrap()
        .unwrap();
    assert!(fx.blobs.blob_path(item.id, "f").unwrap().exists());
}

#[test]
fn test_rename_with_new_name_moves_blob() {
    let fx = fixture();
    fx.mkdir("tags", "a");
    fx.create_file("browse/a/@", "old", b"body");
    let item = fx
        .meta
        .with_conn(|conn| Ok(tag_meta::store::get_by_name(conn, "old")?))
        .unwrap()
        .unwrap();

    let files = fx.ino("browse/a/@").unwrap();
    fx.fs.rename_entry(files, "old", files, "new").unwrap();

    assert!(!fx.blobs.blob_path(item.id, "old").unwrap().exists());
    assert!(fx.blobs.blob_path(item.id, "new").unwrap().exists());
    assert_eq!(fx.names("browse/a/@"), vec!["new"]);
}

#[test]
fn test_rename_over_same_file_keeps_data() {
    let fx = fixture();
    fx.mkdir("tags", "a");
    fx.create_file("browse/a/@", "f", b"body");
    let files = fx.ino("browse/a/@").unwrap();
    // an sshfs-style client may rename a file onto itself
    fx.fs.rename_entry(files, "f", files, "f").unwrap();
    let ino = fx.ino("browse/a/@/f").unwrap();
    assert_eq!(fx.read_file(ino), b"body");
}

#[test]
fn test_rename_overwrites_different_target() {
    let fx = fixture();
    fx.mkdir("tags", "a");
    fx.mkdir("tags", "b");
    fx.create_file("browse/a/@", "f", b"source");
    fx.create_file("browse/b/@", "f", b"target");

    let src = fx.ino("browse/a/@").unwrap();
    let dst = fx.ino("browse/b/@").unwrap();
    fx.fs.rename_entry(src, "f", dst, "f").unwrap();

    assert_eq!(fx.names("browse/b/@"), vec!["f"]);
    let ino = fx.ino("browse/b/@/f").unwrap();
    assert_eq!(fx.read_file(ino), b"source");
}

#[test]
fn test_negation_idempotence() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    fx.mkdir("tags", "y");
    fx.create_file("browse/x/@", "only-x", b"1");
    fx.create_file("browse/x/y/@", "both", b"2");

    assert_eq!(
        fx.names("browse/x/_/y/@"),
        fx.names("browse/_/y/x/@")
    );
    assert_eq!(fx.names("browse/x/_/y/@"), vec!["only-x"]);
}

#[test]
fn test_browse_listing_structure() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags/red", "dark");

    assert_eq!(fx.names("browse"), vec!["@", "@@", "_", "red"]);
    assert_eq!(fx.names("browse/red"), vec!["@", "@@", "_", "dark"]);
    // no reserved children directly behind the negation marker
    assert_eq!(fx.names("browse/red/_"), vec!["dark"]);
}

#[test]
fn test_browse_group_expansion_lists_members() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags", "blue");
    fx.mkdir("tags", "green");
    // blue and green join the colors group; browsing red exposes them
    fx.mkdir("tags/red", "!colors");
    let colors_ino = fx.ino("tags/red/!colors").unwrap();
    fx.fs.mkdir_entry(colors_ino, "navy").unwrap();
    let tags_ino = fx.ino("tags").unwrap();
    fx.fs
        .rename_entry(tags_ino, "blue", tags_ino, "blue |colors|")
        .unwrap();

    let listed = fx.names("browse/blue");
    assert!(listed.contains(&"navy".to_string()));
}

#[test]
fn test_control_display_and_lookup_roundtrip() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags", "!colors |red|");
    fx.mkdir("tags", "green |colors|");

    let listed = fx.names("tags");
    assert!(listed.contains(&"red".to_string()));
    assert!(listed.contains(&"!colors |red|".to_string()));
    assert!(listed.contains(&"green |colors|".to_string()));

    assert!(fx.ino("tags/!colors |red|").is_ok());
    assert!(fx.ino("tags/green |colors|").is_ok());
    // decorations must match the stored state
    assert!(matches!(
        fx.ino("tags/!colors"),
        Err(TagFsError::NotFound(_))
    ));
    assert!(matches!(
        fx.ino("tags/green"),
        Err(TagFsError::NotFound(_))
    ));
}

#[test]
fn test_control_rejects() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    let tags_ino = fx.ino("tags").unwrap();

    assert!(matches!(
        fx.fs.mkdir_entry(tags_ino, "red"),
        Err(TagFsError::AlreadyExists(_))
    ));
    assert!(matches!(
        fx.fs.mkdir_entry(tags_ino, "ba|d"),
        Err(TagFsError::InvalidParam(_))
    ));
}

#[test]
fn test_control_remove_requires_empty() {
    let fx = fixture();
    fx.mkdir("tags", "red");
    fx.mkdir("tags/red", "dark");
    let tags_ino = fx.ino("tags").unwrap();

    assert!(matches!(
        fx.fs.unlink_entry(tags_ino, "red"),
        Err(TagFsError::NotEmpty(_))
    ));

    let red_ino = fx.ino("tags/red").unwrap();
    fx.fs.unlink_entry(red_ino, "dark").unwrap();

    // a file relation also blocks removal
    fx.create_file("browse/red/@", "apple", b"fruit");
    assert!(matches!(
        fx.fs.unlink_entry(tags_ino, "red"),
        Err(TagFsError::NotEmpty(_))
    ));

    let files_ino = fx.ino("browse/red/@").unwrap();
    fx.fs.unlink_entry(files_ino, "apple").unwrap();
    fx.fs.unlink_entry(tags_ino, "red").unwrap();
    assert!(matches!(fx.ino("tags/red"), Err(TagFsError::NotFound(_))));
}

#[test]
fn test_files_subdirectories() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    fx.mkdir("browse/x/@", "sub");

    assert_eq!(fx.names("browse/x/@"), vec!["sub"]);
    fx.create_file("browse/x/@/sub", "inner", b"deep");
    assert_eq!(fx.names("browse/x/@/sub"), vec!["inner"]);

    let files_ino = fx.ino("browse/x/@").unwrap();
    assert!(matches!(
        fx.fs.unlink_entry(files_ino, "sub"),
        Err(TagFsError::NotEmpty(_))
    ));

    let sub_ino = fx.ino("browse/x/@/sub").unwrap();
    fx.fs.unlink_entry(sub_ino, "inner").unwrap();
    fx.fs.unlink_entry(files_ino, "sub").unwrap();
    assert!(fx.names("browse/x/@").is_empty());
}

#[test]
fn test_write_semantics() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    let ino = fx.create_file("browse/x/@", "doc", b"abc");

    // append handles ignore the offset
    let fh = fx
        .fs
        .open_entry(ino, libc::O_WRONLY | libc::O_APPEND)
        .unwrap();
    fx.fs.write_handle(fh, 0, b"def").unwrap();
    fx.fs.release_handle(fh).unwrap();
    assert_eq!(fx.read_file(ino), b"abcdef");

    // positional writes land where asked
    let fh = fx.fs.open_entry(ino, libc::O_RDWR).unwrap();
    fx.fs.write_handle(fh, 1, b"XY").unwrap();
    fx.fs.release_handle(fh).unwrap();
    assert_eq!(fx.read_file(ino), b"aXYdef");
}

#[test]
fn test_truncate() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    let ino = fx.create_file("browse/x/@", "doc", b"0123456789");

    let attr = fx.fs.truncate_entry(ino, 4).unwrap();
    assert_eq!(attr.size, 4);
    assert_eq!(fx.read_file(ino), b"0123");

    let dir_ino = fx.ino("browse/x/@").unwrap();
    assert!(matches!(
        fx.fs.truncate_entry(dir_ino, 0),
        Err(TagFsError::IsDirectory(_))
    ));
}

#[test]
fn test_cache_coherence_after_mutation() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    assert!(fx.names("browse/x/@").is_empty());
    fx.create_file("browse/x/@", "doc", b"1");
    assert_eq!(fx.names("browse/x/@"), vec!["doc"]);

    // negative lookups are cached but released by the next mutation
    assert!(fx.ino("browse/x/@/later").is_err());
    fx.create_file("browse/x/@", "later", b"2");
    assert!(fx.ino("browse/x/@/later").is_ok());
}

#[test]
fn test_error_taxonomy() {
    let fx = fixture();
    fx.mkdir("tags", "x");

    let root = FUSE_ROOT_ID;
    assert!(matches!(
        fx.fs.create_entry(root, "f", 0),
        Err(TagFsError::AccessDenied(_))
    ));

    let browse = fx.ino("browse").unwrap();
    assert!(matches!(
        fx.fs.create_entry(browse, "f", 0),
        Err(TagFsError::AccessDenied(_))
    ));
    assert!(matches!(
        fx.fs.unlink_entry(browse, "x"),
        Err(TagFsError::NotPermitted(_))
    ));
    assert!(matches!(
        fx.fs.rename_entry(browse, "x", browse, "y"),
        Err(TagFsError::NotPermitted(_))
    ));

    // cross-variant renames are invalid
    let tags = fx.ino("tags").unwrap();
    let files = fx.ino("browse/x/@").unwrap();
    assert!(matches!(
        fx.fs.rename_entry(tags, "x", files, "x"),
        Err(TagFsError::InvalidParam(_))
    ));

    // reserved characters in user-supplied names
    assert!(matches!(
        fx.fs.create_entry(files, "ba|d", 0),
        Err(TagFsError::InvalidParam(_))
    ));

    // opening a directory node as a file
    assert!(matches!(
        fx.fs.open_entry(files, libc::O_RDONLY),
        Err(TagFsError::InvalidParam(_))
    ));
}

#[test]
fn test_lookup_is_unique_or_missing() {
    let fx = fixture();
    fx.mkdir("tags", "x");
    fx.mkdir("tags", "y");
    fx.create_file("browse/x/@", "doc", b"one");
    fx.create_file("browse/y/@", "doc", b"two");

    // two matches under the root result set: plain name resolves to neither
    assert!(matches!(
        fx.ino("browse/@/doc"),
        Err(TagFsError::NotFound(_))
    ));
    // under a single tag the name is unique again
    assert!(fx.ino("browse/x/@/doc").is_ok());
}
