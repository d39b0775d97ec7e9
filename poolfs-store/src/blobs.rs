//! Content-addressed blob directory (`EntityFiles/`).
//!
//! Each blob is a regular file whose name is the digest of its bytes.
//! Writes stage into a `.tmp` sibling inside the blob directory and commit
//! via rename, so a crash mid-write never leaves a half-written blob under
//! a valid digest name.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Directory under the system root holding one file per unique content.
const BLOB_DIR_NAME: &str = "EntityFiles";

/// Content-addressed blob directory under a poolfs root.
#[derive(Debug, Clone)]
pub struct BlobStore {
    /// The system root. Kept for the self-import guard.
    root: PathBuf,
    /// `{root}/EntityFiles`.
    blob_dir: PathBuf,
}

impl BlobStore {
    /// Opens (or creates) the blob directory under `root`.
    pub fn open(root: &Path) -> io::Result<Self> {
        let blob_dir = root.join(BLOB_DIR_NAME);
        fs::create_dir_all(&blob_dir)?;
        Ok(Self {
            root: root.to_path_buf(),
            blob_dir,
        })
    }

    /// Returns the on-disk path of the blob for `digest` (may not exist).
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.blob_dir.join(digest)
    }

    /// Scratch path used while staging a write for `digest`.
    fn staging_path(&self, digest: &str) -> PathBuf {
        self.blob_dir.join(format!("{digest}.tmp"))
    }

    /// Returns `true` if a blob named `digest` exists.
    pub fn exists(&self, digest: &str) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Atomically places the bytes of `source` under the name `digest`.
    ///
    /// The caller must have verified that `digest` is the digest of
    /// `source`'s bytes; the store does not re-hash. Fails with
    /// [`Error::BlobExists`] if a blob with that name is already present.
    /// On any I/O failure the partial scratch file is removed and the store
    /// is left in its pre-call state.
    pub fn add(&self, digest: &str, source: &Path) -> Result<()> {
        if self.exists(digest) {
            return Err(Error::BlobExists(digest.to_owned()));
        }
        let staging = self.staging_path(digest);
        let committed = fs::copy(source, &staging)
            .and_then(|_| fs::rename(&staging, self.blob_path(digest)));
        if let Err(e) = committed {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    /// Like [`add`](Self::add) for callers that already hold a stream.
    pub fn add_from_reader(&self, digest: &str, reader: &mut impl Read) -> Result<()> {
        if self.exists(digest) {
            return Err(Error::BlobExists(digest.to_owned()));
        }
        let staging = self.staging_path(digest);
        let committed = File::create(&staging)
            .and_then(|mut f| io::copy(reader, &mut f))
            .and_then(|_| fs::rename(&staging, self.blob_path(digest)));
        if let Err(e) = committed {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes the blob named `digest`.
    ///
    /// A missing blob is an invariant violation (the ledger said the last
    /// reference just went away, so the bytes must be here) and surfaces as
    /// [`Error::BlobMissing`] rather than being swallowed.
    pub fn remove(&self, digest: &str) -> Result<()> {
        let path = self.blob_path(digest);
        if !path.is_file() {
            return Err(Error::BlobMissing(digest.to_owned()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Opens the blob named `digest` for reading (export, range reads).
    pub fn reader(&self, digest: &str) -> Result<File> {
        File::open(self.blob_path(digest)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::BlobMissing(digest.to_owned())
            } else {
                e.into()
            }
        })
    }

    /// Returns `true` if `outer` resolves to a location inside the system
    /// root.
    ///
    /// Used to refuse self-referential imports and exports. The comparison
    /// is on lexically absolutized paths, so it also works for targets that
    /// do not exist yet.
    pub fn contains(&self, outer: &Path) -> io::Result<bool> {
        let outer_abs = std::path::absolute(outer)?;
        let root_abs = std::path::absolute(&self.root)?;
        Ok(outer_abs.starts_with(&root_abs))
    }
}
