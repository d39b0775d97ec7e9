//! End-to-end tests driving the orchestrator against a real root directory:
//! deduplicated imports, reference counting across copy/delete, filtered
//! import/export, diff output, and the single-writer lock.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use poolfs::{Error, Metadata, VirtualFileSystem};
use poolfs_store::RefLedger;

/// SHA-256 of the byte sequence `hello`.
const HELLO_DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(contents).unwrap();
    path
}

/// Sorted blob names in the pool.
fn entity_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("EntityFiles"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Ledger count for `digest`, `None` if no row exists.
fn ledger_count(root: &Path, digest: &str) -> Option<i64> {
    let ledger = RefLedger::open(root).unwrap();
    ledger.get(digest).ok()
}

/// A fresh root plus a scratch area guaranteed to lie outside it.
fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    fs::create_dir(&outside).unwrap();
    (tmp, root, outside)
}

#[test]
fn identical_content_is_pooled_once() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");
    let b = write_file(&outside, "b.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();
    vfs.copy_from_outside(&b, "/b.txt").unwrap();

    assert_eq!(entity_files(&root), [HELLO_DIGEST]);
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(2));
    assert_eq!(vfs.list("/").unwrap(), ["a.txt", "b.txt"]);
    vfs.close().unwrap();
}

#[test]
fn delete_releases_references_and_reclaims_the_last() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");
    let b = write_file(&outside, "b.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();
    vfs.copy_from_outside(&b, "/b.txt").unwrap();

    vfs.delete("/a.txt").unwrap();
    assert_eq!(entity_files(&root), [HELLO_DIGEST]);
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(1));

    vfs.delete("/b.txt").unwrap();
    assert!(entity_files(&root).is_empty());
    assert_eq!(ledger_count(&root, HELLO_DIGEST), None);
    vfs.close().unwrap();
}

#[test]
fn copy_into_own_subtree_is_refused() {
    let (_tmp, root, _outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();

    assert!(matches!(
        vfs.copy_entry("/d", "/d/e"),
        Err(Error::InvalidOperation(_))
    ));
    assert_eq!(vfs.list("/").unwrap(), ["d"]);
    assert!(vfs.list("/d").unwrap().is_empty());
    vfs.close().unwrap();
}

#[test]
fn filtered_export_takes_matching_suffixes_only() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("outer");
    fs::create_dir(&src).unwrap();
    write_file(&src, "x.txt", b"X");
    fs::create_dir(src.join("s")).unwrap();
    write_file(&src.join("s"), "y.png", b"Y");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&src, "/imp").unwrap();

    let dst = outside.join("outer2");
    vfs.copy_dir_to_outside_ex("/imp", &dst, &["png".to_owned()])
        .unwrap();

    assert_eq!(fs::read(dst.join("s").join("y.png")).unwrap(), b"Y");
    assert!(!dst.join("x.txt").exists());
    vfs.close().unwrap();
}

#[test]
fn filtered_import_takes_matching_suffixes_only() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("outer");
    fs::create_dir(&src).unwrap();
    write_file(&src, "x.txt", b"X");
    write_file(&src, "Makefile", b"M");
    write_file(&src, "y.PNG", b"Y");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_dir_from_outside_ex(&src, "/imp", &["png".to_owned(), String::new()])
        .unwrap();

    assert_eq!(vfs.list("/imp").unwrap(), ["Makefile", "y.PNG"]);
    vfs.close().unwrap();
}

#[test]
fn diff_is_patch_shaped() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("outer");
    fs::create_dir(&src).unwrap();
    write_file(&src, "x.txt", b"X");
    fs::create_dir(src.join("s")).unwrap();
    write_file(&src.join("s"), "y.png", b"Y");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&src, "/imp").unwrap();
    vfs.copy_from_outside(&src, "/imp_orig").unwrap();

    assert_eq!(vfs.compare("/imp", "/imp").unwrap(), "");
    assert_eq!(vfs.compare("/imp_orig", "/imp").unwrap(), "");

    vfs.move_entry("/imp/x.txt", "/imp/x2.txt").unwrap();
    assert_eq!(
        vfs.compare("/imp_orig", "/imp").unwrap(),
        "-x.txt\n+x2.txt\n"
    );
    vfs.close().unwrap();
}

#[test]
fn diff_reports_changed_digests_on_both_sides() {
    let (_tmp, root, outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/a").unwrap();
    vfs.mkdir("/b").unwrap();

    let one = write_file(&outside, "one", b"one");
    let two = write_file(&outside, "two", b"two");
    vfs.copy_from_outside(&one, "/a/f").unwrap();
    vfs.copy_from_outside(&two, "/b/f").unwrap();

    assert_eq!(vfs.compare("/a", "/b").unwrap(), "-f\n+f\n");
    vfs.close().unwrap();
}

#[test]
fn copy_within_takes_one_reference_per_file() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();
    vfs.copy_from_outside(&a, "/d/a.txt").unwrap();

    vfs.copy_entry("/d", "/d2").unwrap();
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(2));
    assert_eq!(entity_files(&root), [HELLO_DIGEST]);

    vfs.delete("/d").unwrap();
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(1));
    assert_eq!(vfs.read("/d2/a.txt", 0, None).unwrap(), b"hello");

    vfs.delete("/d2").unwrap();
    assert_eq!(ledger_count(&root, HELLO_DIGEST), None);
    assert!(entity_files(&root).is_empty());
    vfs.close().unwrap();
}

#[test]
fn move_within_leaves_the_ledger_alone() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();

    vfs.move_entry("/a.txt", "/d/moved.txt").unwrap();
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(1));
    assert!(!vfs.exists("/a.txt").unwrap());
    assert_eq!(vfs.read("/d/moved.txt", 0, None).unwrap(), b"hello");
    vfs.close().unwrap();
}

#[test]
fn read_supports_ranges_and_text() {
    let (_tmp, root, outside) = setup();
    let f = write_file(&outside, "f.txt", b"hello world");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&f, "/f.txt").unwrap();

    assert_eq!(vfs.read("/f.txt", 0, None).unwrap(), b"hello world");
    assert_eq!(vfs.read("/f.txt", 6, Some(5)).unwrap(), b"world");
    assert_eq!(vfs.read("/f.txt", 6, Some(100)).unwrap(), b"world");
    assert_eq!(
        vfs.read_to_string("/f.txt", 0, Some(5)).unwrap(),
        "hello"
    );
    vfs.close().unwrap();
}

#[test]
fn add_by_digest_requires_a_pooled_blob() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();

    assert!(vfs.exists_by_digest(HELLO_DIGEST));
    vfs.add_by_digest("/dup.txt", HELLO_DIGEST).unwrap();
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(2));
    assert_eq!(vfs.read("/dup.txt", 0, None).unwrap(), b"hello");

    assert!(matches!(
        vfs.add_by_digest("/x.txt", "deadbeef"),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        vfs.add_by_digest("/a.txt", HELLO_DIGEST),
        Err(Error::PathExists(_))
    ));
    vfs.close().unwrap();
}

#[test]
fn import_refuses_overwrite_and_missing_parent() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();

    assert!(matches!(
        vfs.copy_from_outside(&a, "/a.txt"),
        Err(Error::PathExists(_))
    ));
    assert!(matches!(
        vfs.copy_from_outside(&a, "/missing/a.txt"),
        Err(Error::DirOfPathNotExists(_))
    ));
    // The refused imports took no extra references.
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(1));
    vfs.close().unwrap();
}

#[test]
fn outer_paths_inside_the_root_are_refused() {
    let (_tmp, root, outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();

    assert!(matches!(
        vfs.copy_from_outside(&root.join("EntityFiles"), "/x"),
        Err(Error::InvalidOperation(_))
    ));

    let f = write_file(&outside, "f.txt", b"hello");
    vfs.copy_from_outside(&f, "/f.txt").unwrap();
    assert!(matches!(
        vfs.copy_to_outside("/f.txt", &root.join("evil")),
        Err(Error::InvalidOperation(_))
    ));
    vfs.close().unwrap();
}

#[test]
fn move_from_outside_removes_the_source() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("dir");
    fs::create_dir(&src).unwrap();
    write_file(&src, "f.txt", b"payload");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.move_from_outside(&src, "/dir").unwrap();

    assert!(!src.exists());
    assert_eq!(vfs.read("/dir/f.txt", 0, None).unwrap(), b"payload");
    vfs.close().unwrap();
}

#[test]
fn export_round_trips_a_directory() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("src");
    fs::create_dir(&src).unwrap();
    write_file(&src, "a.txt", b"A");
    fs::create_dir(src.join("sub")).unwrap();
    write_file(&src.join("sub"), "b.txt", b"B");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&src, "/src").unwrap();

    let dst = outside.join("dst");
    vfs.copy_to_outside("/src", &dst).unwrap();
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"A");
    assert_eq!(fs::read(dst.join("sub").join("b.txt")).unwrap(), b"B");

    // Exports never overwrite.
    assert!(vfs.copy_to_outside("/src", &dst).is_err());
    vfs.close().unwrap();
}

#[test]
fn roots_are_single_writer() {
    let (_tmp, root, _outside) = setup();
    let vfs = VirtualFileSystem::open(&root, "u").unwrap();

    assert!(matches!(
        VirtualFileSystem::open(&root, "v"),
        Err(Error::InvalidOperation(_))
    ));

    vfs.close().unwrap();
    let vfs = VirtualFileSystem::open(&root, "v").unwrap();
    vfs.close().unwrap();
}

#[test]
fn namespace_persists_across_sessions() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");
    {
        let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
        vfs.mkdir("/docs").unwrap();
        vfs.copy_from_outside(&a, "/docs/a.txt").unwrap();
        vfs.close().unwrap();
    }
    let vfs = VirtualFileSystem::open(&root, "u").unwrap();
    assert_eq!(vfs.list("/docs").unwrap(), ["a.txt"]);
    assert_eq!(vfs.read("/docs/a.txt", 0, None).unwrap(), b"hello");
    vfs.close().unwrap();
}

#[test]
fn users_share_the_pool_but_not_the_namespace() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");
    {
        let mut vfs = VirtualFileSystem::open(&root, "alice").unwrap();
        vfs.copy_from_outside(&a, "/a.txt").unwrap();
        vfs.close().unwrap();
    }
    {
        let mut vfs = VirtualFileSystem::open(&root, "bob").unwrap();
        assert!(vfs.list("/").unwrap().is_empty());
        vfs.copy_from_outside(&a, "/mine.txt").unwrap();
        vfs.close().unwrap();
    }
    assert_eq!(entity_files(&root), [HELLO_DIGEST]);
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(2));
}

#[test]
fn metadata_survives_user_replacement() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&a, "/a.txt").unwrap();
    let created = vfs.metadata("/a.txt").unwrap()[poolfs::META_CREATED].clone();

    let mut meta = Metadata::new();
    meta.insert("label".to_owned(), "important".to_owned());
    vfs.set_metadata("/a.txt", meta).unwrap();

    let meta = vfs.metadata("/a.txt").unwrap();
    assert_eq!(meta["label"], "important");
    assert_eq!(meta[poolfs::META_CREATED], created);
    vfs.close().unwrap();
}

#[test]
fn convenience_variants_default_the_name() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "report.txt", b"R");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/docs").unwrap();
    vfs.copy_from_outside_into(&a, "/docs", None).unwrap();
    assert!(vfs.exists("/docs/report.txt").unwrap());

    vfs.mkdir("/archive").unwrap();
    vfs.move_into("/docs/report.txt", "/archive", None).unwrap();
    assert!(vfs.exists("/archive/report.txt").unwrap());
    assert!(!vfs.exists("/docs/report.txt").unwrap());

    vfs.copy_into("/archive/report.txt", "/docs", Some("copy.txt"))
        .unwrap();
    assert!(vfs.exists("/docs/copy.txt").unwrap());

    vfs.copy_to_outside_into("/docs/copy.txt", &outside, None)
        .unwrap();
    assert_eq!(fs::read(outside.join("copy.txt")).unwrap(), b"R");
    vfs.close().unwrap();
}

#[cfg(unix)]
#[test]
fn non_regular_entries_are_skipped_on_import() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("dir");
    fs::create_dir(&src).unwrap();
    write_file(&src, "real.txt", b"real");
    std::os::unix::fs::symlink(src.join("real.txt"), src.join("link.txt")).unwrap();

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&src, "/dir").unwrap();
    assert_eq!(vfs.list("/dir").unwrap(), ["real.txt"]);
    vfs.close().unwrap();
}

#[test]
fn failed_operations_leave_the_persisted_tree_identical() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");
    {
        let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
        vfs.mkdir("/d").unwrap();
        vfs.copy_from_outside(&a, "/d/a.txt").unwrap();
        vfs.close().unwrap();
    }
    let doc_path = root.join("Users").join("u").join("dirTreeHandler.json");
    let before = fs::read(&doc_path).unwrap();

    {
        let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
        assert!(vfs.mkdir("/d").is_err());
        assert!(vfs.delete("/absent").is_err());
        assert!(vfs.copy_entry("/d", "/d/e").is_err());
        assert!(vfs.move_entry("/d", "/missing/d").is_err());
        assert!(vfs.copy_from_outside(&a, "/d/a.txt").is_err());
        assert!(vfs.add_by_digest("/d/a.txt", HELLO_DIGEST).is_err());
        vfs.close().unwrap();
    }
    assert_eq!(fs::read(&doc_path).unwrap(), before);
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(1));
}

#[test]
fn duplicate_content_within_one_directory_import_is_pooled() {
    let (_tmp, root, outside) = setup();
    let src = outside.join("dir");
    fs::create_dir(&src).unwrap();
    write_file(&src, "one.txt", b"hello");
    write_file(&src, "two.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.copy_from_outside(&src, "/dir").unwrap();

    assert_eq!(entity_files(&root), [HELLO_DIGEST]);
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(2));
    vfs.close().unwrap();
}

#[test]
fn relative_paths_work_at_the_boundary() {
    let (_tmp, root, outside) = setup();
    let a = write_file(&outside, "a.txt", b"hello");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();
    vfs.chdir("d").unwrap();
    assert_eq!(vfs.cwd(), "/d");

    vfs.copy_from_outside(&a, "a.txt").unwrap();
    assert!(vfs.exists("/d/a.txt").unwrap());
    assert_eq!(vfs.read("a.txt", 0, None).unwrap(), b"hello");

    vfs.chdir("/").unwrap();
    assert_eq!(vfs.cwd(), "/");
    vfs.close().unwrap();
}

#[test]
fn cursor_targets_are_protected() {
    let (_tmp, root, _outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();
    vfs.chdir("/d").unwrap();

    assert!(matches!(
        vfs.delete(""),
        Err(Error::InvalidCurrentDirOperation(_))
    ));
    assert!(matches!(
        vfs.delete("/d"),
        Err(Error::InvalidCurrentDirOperation(_))
    ));
    assert!(matches!(
        vfs.delete("/"),
        Err(Error::InvalidCurrentDirOperation(_))
    ));
    vfs.close().unwrap();
}

#[test]
fn malformed_textual_paths_are_rejected() {
    let (_tmp, root, _outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();

    for bad in ["//", "a//b", "//a"] {
        assert!(matches!(vfs.exists(bad), Err(Error::InvalidPath(_))));
        assert!(matches!(vfs.mkdir(bad), Err(Error::InvalidPath(_))));
    }
    vfs.close().unwrap();
}

#[test]
fn reading_requires_bound_file_content() {
    let (_tmp, root, _outside) = setup();
    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();

    assert!(matches!(
        vfs.read("/d", 0, None),
        Err(Error::PathIsNotFile(_))
    ));
    assert!(matches!(
        vfs.read("/absent", 0, None),
        Err(Error::PathNotExists(_))
    ));
    vfs.close().unwrap();
}

#[test]
fn invariant_ledger_matches_tree_references() {
    // P1: after a burst of operations, each digest's count equals the
    // number of bound file nodes referencing it.
    let (_tmp, root, outside) = setup();
    let hello = write_file(&outside, "h.txt", b"hello");
    let other = write_file(&outside, "o.txt", b"other");

    let mut vfs = VirtualFileSystem::open(&root, "u").unwrap();
    vfs.mkdir("/d").unwrap();
    vfs.copy_from_outside(&hello, "/d/one.txt").unwrap();
    vfs.copy_from_outside(&hello, "/d/two.txt").unwrap();
    vfs.copy_from_outside(&other, "/d/three.txt").unwrap();
    vfs.copy_entry("/d", "/d2").unwrap();
    vfs.delete("/d/one.txt").unwrap();
    vfs.move_entry("/d2/two.txt", "/two.txt").unwrap();

    // References to "hello": /d/two.txt, /d2/one.txt, /two.txt.
    assert_eq!(ledger_count(&root, HELLO_DIGEST), Some(3));
    vfs.close().unwrap();
}
