//! The virtual file system orchestrator.
//!
//! Binds one user's directory tree to the root's shared blob store and
//! reference ledger, and keeps the three consistent across every
//! user-facing operation:
//!
//! ```text
//! VirtualFileSystem
//!  ├── DirTree   — this user's namespace (Users/{user}/dirTreeHandler.json)
//!  ├── BlobStore — shared content-addressed pool (EntityFiles/)
//!  └── RefLedger — shared digest → reference count (file_quote_count.sqlite)
//! ```
//!
//! Inner paths are textual (`/`-separated) at this boundary and parsed once;
//! outer paths are host-native. Mutations never overwrite: any operation
//! whose destination already exists is refused.
//!
//! Where an operation spans subsystems, tree validation runs first so a
//! refused operation touches nothing, and ledger/blob compensations roll
//! back partial work before the error propagates. A compensation that
//! itself fails leaves a degraded state: reads still work, the mismatch is
//! logged via [`log::warn!`].

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::warn;
use poolfs_store::{BlobStore, RefLedger, hash};

use crate::doc::DocFormat;
use crate::path::{TreePath, join_text};
use crate::tree::{DirTree, Metadata};
use crate::{Error, Result};

/// Directory under the root holding one subdirectory per user.
const USERS_DIR_NAME: &str = "Users";

/// File name of a user's tree document.
const USER_DOC_NAME: &str = "dirTreeHandler.json";

/// Advisory single-writer lock sentinel under the root.
const LOCK_FILE_NAME: &str = ".poolfs.lock";

/// A deduplicating virtual file system bound to one root and one user.
///
/// At most one live instance may operate against a given root: the ledger
/// and blob store do not tolerate concurrent writers. Initialization takes
/// an advisory lock and refuses to open a root that holds one.
///
/// The instance is a scoped resource. [`close`](Self::close) flushes the
/// tree document and checkpoints the ledger; dropping without closing does
/// the same on a best-effort basis.
#[derive(Debug)]
pub struct VirtualFileSystem {
    /// The system root directory.
    root_dir: PathBuf,
    /// The user whose namespace this instance operates on.
    user_id: String,
    /// This user's directory tree.
    tree: DirTree,
    /// Shared content-addressed blob pool.
    blobs: BlobStore,
    /// Shared reference ledger.
    ledger: RefLedger,
    /// The advisory lock sentinel taken at initialization.
    lock_path: PathBuf,
    /// Set by [`close`](Self::close) so `Drop` does not flush twice.
    closed: bool,
}

impl VirtualFileSystem {
    /// Opens (or creates) the system under `root_dir` for `user_id`.
    pub fn open(root_dir: &Path, user_id: &str) -> Result<Self> {
        Self::open_with_format(root_dir, user_id, DocFormat::default())
    }

    /// Like [`open`](Self::open) with explicit tree document formatting.
    pub fn open_with_format(
        root_dir: &Path,
        user_id: &str,
        format: DocFormat,
    ) -> Result<Self> {
        fs::create_dir_all(root_dir)?;
        let lock_path = root_dir.join(LOCK_FILE_NAME);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::InvalidOperation(format!(
                    "root '{}' is already in use by another instance \
                     (remove '{}' if that instance is gone)",
                    root_dir.display(),
                    lock_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        // From here on a failed step must release the lock.
        let opened = (|| {
            let blobs = BlobStore::open(root_dir)?;
            let ledger = RefLedger::open(root_dir)?;
            let user_dir = root_dir.join(USERS_DIR_NAME).join(user_id);
            fs::create_dir_all(&user_dir)?;
            let tree = DirTree::open(&user_dir.join(USER_DOC_NAME), format)?;
            Ok::<_, Error>((blobs, ledger, tree))
        })();
        match opened {
            Ok((blobs, ledger, tree)) => Ok(Self {
                root_dir: root_dir.to_path_buf(),
                user_id: user_id.to_owned(),
                tree,
                blobs,
                ledger,
                lock_path,
                closed: false,
            }),
            Err(e) => {
                let _ = fs::remove_file(&lock_path);
                Err(e)
            }
        }
    }

    /// The system root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The user this instance operates for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Flushes the tree document, checkpoints the ledger, releases the lock.
    ///
    /// The tree flushes first: a namespace entry without a ledger row is a
    /// diagnosable state, the reverse silently leaks blobs.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self
            .tree
            .flush()
            .and_then(|()| self.ledger.commit().map_err(Error::from));
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(
                "lock file '{}' could not be removed: {e}",
                self.lock_path.display()
            );
        }
        result
    }

    // ── namespace operations ────────────────────────────────────────────

    /// The current directory, textual form.
    pub fn cwd(&self) -> String {
        self.tree.cwd().to_string()
    }

    /// Returns `true` if `path` resolves.
    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.tree.exists(&TreePath::parse(path)?))
    }

    /// Returns `true` if `path` resolves to a directory.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        self.tree.is_dir(&TreePath::parse(path)?)
    }

    /// Moves the cursor to the directory at `path`.
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        self.tree.chdir(&TreePath::parse(path)?)
    }

    /// Returns an independent copy of the node's metadata.
    pub fn metadata(&self, path: &str) -> Result<Metadata> {
        self.tree.metadata(&TreePath::parse(path)?)
    }

    /// Replaces the node's metadata (reserved timestamp keys overlaid back).
    pub fn set_metadata(&mut self, path: &str, metadata: Metadata) -> Result<()> {
        self.tree.set_metadata(&TreePath::parse(path)?, metadata)
    }

    /// Lists the child names of the directory at `path`.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        self.tree.list(&TreePath::parse(path)?)
    }

    /// Creates a directory. Fails if `path` already exists.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = TreePath::parse(path)?;
        if self.tree.exists(&path) {
            return Err(Error::PathExists(path.to_string()));
        }
        self.tree.mkdir(&path)
    }

    /// Moves a file or directory (this includes renaming).
    ///
    /// Pure namespace surgery: references travel with their nodes, so the
    /// ledger is untouched.
    pub fn move_entry(&mut self, src: &str, dst: &str) -> Result<()> {
        let src = TreePath::parse(src)?;
        let dst = TreePath::parse(dst)?;
        if self.tree.exists(&dst) {
            return Err(Error::PathExists(dst.to_string()));
        }
        self.tree.move_node(&src, &dst)
    }

    /// Copies a file or directory within the namespace.
    ///
    /// The tree clone happens first; if it is refused, the ledger is
    /// untouched. One reference is then taken per bound file in the clone.
    pub fn copy_entry(&mut self, src: &str, dst: &str) -> Result<()> {
        let src = TreePath::parse(src)?;
        let dst = TreePath::parse(dst)?;
        if self.tree.exists(&dst) {
            return Err(Error::PathExists(dst.to_string()));
        }
        self.tree.copy_node(&src, &dst)?;
        for digest in self.tree.digests_under(&dst)? {
            if let Err(e) = self.ledger.increment(&digest) {
                warn!("degraded: reference for {digest} not recorded after copy: {e}");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Deletes a file or directory, releasing one reference per bound file
    /// and removing each blob whose count reaches zero.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = TreePath::parse(path)?;
        if path.is_current() {
            return Err(Error::InvalidCurrentDirOperation(
                "cannot delete the current directory".to_owned(),
            ));
        }
        if !self.tree.exists(&path) {
            return Err(Error::PathNotExists(path.to_string()));
        }
        // Collect first, remove from the tree second, release references
        // last: a refused tree removal must not leak decrements.
        let digests = self.tree.digests_under(&path)?;
        self.tree.delete(&path)?;
        for digest in digests {
            match self.ledger.decrement(&digest) {
                Ok(true) => {
                    if let Err(e) = self.blobs.remove(&digest) {
                        warn!("degraded: blob {digest} unreferenced but not removed: {e}");
                        return Err(e.into());
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("degraded: reference for {digest} not released after delete: {e}");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    // ── content operations ──────────────────────────────────────────────

    /// Reads the file's content from `start`, at most `size` bytes
    /// (`None` = to the end).
    pub fn read(&self, path: &str, start: u64, size: Option<u64>) -> Result<Vec<u8>> {
        let path = TreePath::parse(path)?;
        let digest = self.tree.file_digest(&path)?;
        let mut reader = self.blobs.reader(&digest)?;
        reader.seek(SeekFrom::Start(start))?;
        let mut data = Vec::new();
        match size {
            Some(size) => {
                reader.take(size).read_to_end(&mut data)?;
            }
            None => {
                reader.read_to_end(&mut data)?;
            }
        }
        Ok(data)
    }

    /// Like [`read`](Self::read), decoding the bytes as UTF-8.
    pub fn read_to_string(&self, path: &str, start: u64, size: Option<u64>) -> Result<String> {
        let data = self.read(path, start, size)?;
        String::from_utf8(data)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Returns `true` if the pool holds a blob named `digest`.
    pub fn exists_by_digest(&self, digest: &str) -> bool {
        self.blobs.exists(digest)
    }

    /// Creates a file node bound to an already-pooled digest.
    ///
    /// Fails if `path` exists or no blob named `digest` is pooled.
    pub fn add_by_digest(&mut self, path: &str, digest: &str) -> Result<()> {
        let path = TreePath::parse(path)?;
        if self.tree.exists(&path) {
            return Err(Error::PathExists(path.to_string()));
        }
        if !self.blobs.exists(digest) {
            return Err(Error::InvalidOperation(format!(
                "no blob exists for digest '{digest}'"
            )));
        }
        self.ledger.increment(digest)?;
        if let Err(e) = self.bind_new_file(&path, digest) {
            self.compensate_reference(digest);
            return Err(e);
        }
        Ok(())
    }

    // ── import / export ─────────────────────────────────────────────────

    /// Imports an outer file or directory at `inner` (non-overwriting).
    ///
    /// Directories import recursively; only regular files are taken
    /// (symlinks, devices and other special files are skipped). Identical
    /// content is pooled once: importing bytes the pool already holds just
    /// takes another reference.
    pub fn copy_from_outside(&mut self, outer: &Path, inner: &str) -> Result<()> {
        let inner = TreePath::parse(inner)?;
        if fs::metadata(outer)?.is_dir() {
            self.import_dir(outer, &inner, None)
        } else {
            self.import_file(outer, &inner)
        }
    }

    /// [`copy_from_outside`](Self::copy_from_outside), then deletes the
    /// outer path.
    pub fn move_from_outside(&mut self, outer: &Path, inner: &str) -> Result<()> {
        self.copy_from_outside(outer, inner)?;
        if fs::metadata(outer)?.is_dir() {
            fs::remove_dir_all(outer)?;
        } else {
            fs::remove_file(outer)?;
        }
        Ok(())
    }

    /// Exports an inner file or directory to `outer` (non-overwriting).
    pub fn copy_to_outside(&self, inner: &str, outer: &Path) -> Result<()> {
        let inner = TreePath::parse(inner)?;
        if self.tree.is_dir(&inner)? {
            self.export_dir(&inner, outer, None)
        } else {
            self.export_file(&inner, outer)
        }
    }

    /// Recursive import taking only regular files whose name matches
    /// `extensions` (suffix after the last `.`, lowercased; the literal
    /// `""` matches names without a `.`). Directory structure imports in
    /// full.
    pub fn copy_dir_from_outside_ex(
        &mut self,
        outer: &Path,
        inner: &str,
        extensions: &[String],
    ) -> Result<()> {
        let inner = TreePath::parse(inner)?;
        let filter = ExtFilter::new(extensions);
        self.import_dir(outer, &inner, Some(&filter))
    }

    /// Recursive export symmetric to
    /// [`copy_dir_from_outside_ex`](Self::copy_dir_from_outside_ex).
    pub fn copy_dir_to_outside_ex(
        &self,
        inner: &str,
        outer: &Path,
        extensions: &[String],
    ) -> Result<()> {
        let inner = TreePath::parse(inner)?;
        let filter = ExtFilter::new(extensions);
        self.export_dir(&inner, outer, Some(&filter))
    }

    // ── convenience variants ────────────────────────────────────────────

    /// Imports `outer` into the inner directory `inner_dir`, defaulting the
    /// destination name to the outer basename.
    pub fn copy_from_outside_into(
        &mut self,
        outer: &Path,
        inner_dir: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => outer_basename(outer)?,
        };
        self.copy_from_outside(outer, &join_text(inner_dir, &name))
    }

    /// Moving counterpart of
    /// [`copy_from_outside_into`](Self::copy_from_outside_into).
    pub fn move_from_outside_into(
        &mut self,
        outer: &Path,
        inner_dir: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => outer_basename(outer)?,
        };
        self.move_from_outside(outer, &join_text(inner_dir, &name))
    }

    /// Exports `inner` into the outer directory `outer_dir`, defaulting the
    /// destination name to the inner basename.
    pub fn copy_to_outside_into(
        &self,
        inner: &str,
        outer_dir: &Path,
        name: Option<&str>,
    ) -> Result<()> {
        let inner_path = TreePath::parse(inner)?;
        let name = match name {
            Some(name) => name.to_owned(),
            None => inner_path
                .file_name()
                .map(str::to_owned)
                .ok_or_else(|| {
                    Error::InvalidOperation(format!("inner path '{inner}' has no file name"))
                })?,
        };
        self.copy_to_outside(inner, &outer_dir.join(name))
    }

    /// Moves `src` into the directory `dst_dir`, defaulting the destination
    /// name to the source basename.
    pub fn move_into(&mut self, src: &str, dst_dir: &str, name: Option<&str>) -> Result<()> {
        let target = join_with_default_name(src, dst_dir, name)?;
        self.move_entry(src, &target)
    }

    /// Copying counterpart of [`move_into`](Self::move_into).
    pub fn copy_into(&mut self, src: &str, dst_dir: &str, name: Option<&str>) -> Result<()> {
        let target = join_with_default_name(src, dst_dir, name)?;
        self.copy_entry(src, &target)
    }

    // ── diff ────────────────────────────────────────────────────────────

    /// Compares two inner directories by content digest.
    ///
    /// Output is patch-shaped: one `-relative/path` line per file of `base`
    /// absent from `patch` or with differing digest, then one
    /// `+relative/path` line per file of `patch` absent from `base` or with
    /// differing digest. Empty iff the trees are digest-identical at every
    /// file. Line order within each half is lexicographic.
    pub fn compare(&self, base_dir: &str, patch_dir: &str) -> Result<String> {
        let base = self.tree.files_under(&TreePath::parse(base_dir)?)?;
        let patch = self.tree.files_under(&TreePath::parse(patch_dir)?)?;
        let mut out = String::new();
        for (path, digest) in &base {
            if patch.get(path) != Some(digest) {
                out.push('-');
                out.push_str(path);
                out.push('\n');
            }
        }
        for (path, digest) in &patch {
            if base.get(path) != Some(digest) {
                out.push('+');
                out.push_str(path);
                out.push('\n');
            }
        }
        Ok(out)
    }

    // ── coordination internals ──────────────────────────────────────────

    /// Creates an unbound file node and binds `digest` to it.
    fn bind_new_file(&mut self, inner: &TreePath, digest: &str) -> Result<()> {
        self.tree.create_file(inner)?;
        self.tree.set_file_digest(inner, digest)
    }

    /// Rolls back one reference taken for `digest`, removing the blob if
    /// the count reached zero. A failed rollback is a degraded state:
    /// logged, not raised, since the original error matters more.
    fn compensate_reference(&mut self, digest: &str) {
        match self.ledger.decrement(digest) {
            Ok(true) => {
                if let Err(e) = self.blobs.remove(digest) {
                    warn!("degraded: blob {digest} unreferenced but not removed: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!("degraded: reference for {digest} could not be rolled back: {e}");
            }
        }
    }

    /// Validates an import destination: not the cursor, parent present,
    /// target absent.
    fn check_import_target(&self, inner: &TreePath) -> Result<()> {
        if inner.is_current() {
            return Err(Error::InvalidCurrentDirOperation(
                "the import target must not be the current directory".to_owned(),
            ));
        }
        if !self.tree.exists(&inner.parent()) {
            return Err(Error::DirOfPathNotExists(inner.to_string()));
        }
        if self.tree.exists(inner) {
            return Err(Error::PathExists(inner.to_string()));
        }
        Ok(())
    }

    /// Refuses outer paths inside the system root.
    fn check_outer(&self, outer: &Path) -> Result<()> {
        if self.blobs.contains(outer)? {
            return Err(Error::InvalidOperation(format!(
                "outer path '{}' is inside the system root",
                outer.display()
            )));
        }
        Ok(())
    }

    /// Imports one regular outer file.
    ///
    /// New content: stage blob, create ledger row, create + bind the node,
    /// compensating backwards on failure. Known content: take a reference,
    /// create + bind, dropping the reference if node creation fails.
    fn import_file(&mut self, outer: &Path, inner: &TreePath) -> Result<()> {
        let meta = fs::metadata(outer)?;
        if !meta.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("outer path '{}' is not a regular file", outer.display()),
            )));
        }
        self.check_outer(outer)?;
        self.check_import_target(inner)?;

        let digest = hash::digest_file(outer)?;
        let known = match self.ledger.get(&digest) {
            Ok(_) => true,
            Err(poolfs_store::Error::CounterNotExists(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if known {
            self.ledger.increment(&digest)?;
            if let Err(e) = self.bind_new_file(inner, &digest) {
                self.compensate_reference(&digest);
                return Err(e);
            }
        } else {
            self.blobs.add(&digest, outer)?;
            if let Err(create_err) = self.ledger.create(&digest) {
                if let Err(e) = self.blobs.remove(&digest) {
                    warn!("degraded: staged blob {digest} not removed after ledger failure: {e}");
                }
                return Err(create_err.into());
            }
            if let Err(e) = self.bind_new_file(inner, &digest) {
                self.compensate_reference(&digest);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Recursively imports an outer directory.
    fn import_dir(
        &mut self,
        outer: &Path,
        inner: &TreePath,
        filter: Option<&ExtFilter>,
    ) -> Result<()> {
        let meta = fs::metadata(outer)?;
        if !meta.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("outer path '{}' is not a directory", outer.display()),
            )));
        }
        self.check_outer(outer)?;
        self.check_import_target(inner)?;

        self.tree.mkdir(inner)?;
        let mut entries = fs::read_dir(outer)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(fs::DirEntry::file_name);
        for entry in entries {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(
                    "skipping entry with non-UTF-8 name under '{}'",
                    outer.display()
                );
                continue;
            };
            let child_inner = inner.join(name);
            // file_type does not follow symlinks: only genuine regular
            // files and directories are taken.
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.import_dir(&entry.path(), &child_inner, filter)?;
            } else if file_type.is_file() && filter.is_none_or(|f| f.matches(name)) {
                self.import_file(&entry.path(), &child_inner)?;
            }
        }
        Ok(())
    }

    /// Exports one inner file to an outer path.
    fn export_file(&self, inner: &TreePath, outer: &Path) -> Result<()> {
        if !self.tree.exists(inner) {
            return Err(Error::PathNotExists(inner.to_string()));
        }
        if self.tree.is_dir(inner)? {
            return Err(Error::PathIsNotFile(inner.to_string()));
        }
        self.check_outer(outer)?;
        let digest = self.tree.file_digest(inner)?;
        let mut reader = self.blobs.reader(&digest)?;
        // create_new refuses an existing target; a missing parent directory
        // surfaces as the host's NotFound.
        let mut out = fs::File::create_new(outer)?;
        if let Err(e) = io::copy(&mut reader, &mut out) {
            drop(out);
            let _ = fs::remove_file(outer);
            return Err(e.into());
        }
        Ok(())
    }

    /// Recursively exports an inner directory.
    fn export_dir(
        &self,
        inner: &TreePath,
        outer: &Path,
        filter: Option<&ExtFilter>,
    ) -> Result<()> {
        if !self.tree.exists(inner) {
            return Err(Error::PathNotExists(inner.to_string()));
        }
        if !self.tree.is_dir(inner)? {
            return Err(Error::PathIsNotDir(inner.to_string()));
        }
        self.check_outer(outer)?;
        fs::create_dir(outer)?;
        for name in self.tree.list(inner)? {
            let child_inner = inner.join(&name);
            let child_outer = outer.join(&name);
            if self.tree.is_dir(&child_inner)? {
                self.export_dir(&child_inner, &child_outer, filter)?;
            } else if filter.is_none_or(|f| f.matches(&name)) {
                self.export_file(&child_inner, &child_outer)?;
            }
        }
        Ok(())
    }
}

impl Drop for VirtualFileSystem {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.tree.flush() {
            warn!("tree document not flushed on drop: {e}");
        }
        if let Err(e) = self.ledger.commit() {
            warn!("ledger not checkpointed on drop: {e}");
        }
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Extension filter for the `_ex` import/export variants.
struct ExtFilter(Vec<String>);

impl ExtFilter {
    /// Builds a filter, lowercasing every entry.
    fn new(extensions: &[String]) -> Self {
        Self(extensions.iter().map(|e| e.to_lowercase()).collect())
    }

    /// Returns `true` if `name` passes the filter: its suffix after the
    /// last `.` (lowercased) is listed, or it has no `.` and the literal
    /// `""` is listed.
    fn matches(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            None => self.0.iter().any(String::is_empty),
            Some((_, ext)) => {
                let ext = ext.to_lowercase();
                !ext.is_empty() && self.0.contains(&ext)
            }
        }
    }
}

/// The outer path's final component as an inner name.
fn outer_basename(outer: &Path) -> Result<String> {
    outer
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            Error::InvalidOperation(format!(
                "outer path '{}' has no usable file name",
                outer.display()
            ))
        })
}

/// Joins `dst_dir` with `name`, defaulting to the basename of `src`.
fn join_with_default_name(src: &str, dst_dir: &str, name: Option<&str>) -> Result<String> {
    let name = match name {
        Some(name) => name.to_owned(),
        None => TreePath::parse(src)?
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("source path '{src}' has no file name"))
            })?,
    };
    Ok(join_text(dst_dir, &name))
}
