//! Content-addressed storage primitives for the poolfs virtual file system.
//!
//! Two users storing identical bytes share one physical copy. This crate
//! owns the physical half of that contract:
//!
//! ```text
//! {root}/
//!   file_quote_count.sqlite  — SQLite ledger: digest → reference count
//!   EntityFiles/
//!     {64-hex-digest}        — one regular file per unique content
//! ```
//!
//! [`BlobStore`] manages the blob directory (staged writes, atomic rename
//! commit), [`RefLedger`] the reference counts, and [`hash`] computes the
//! SHA-256 digests that key both. Coordinating the three against a user's
//! directory tree is the job of the `poolfs` crate.

mod blobs;
pub mod hash;
mod ledger;

pub use blobs::BlobStore;
pub use ledger::RefLedger;

/// Result type for poolfs-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from blob store and ledger operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A counter was created twice for the same digest.
    #[error("counter already exists for digest '{0}'")]
    CounterExists(String),

    /// A counter was read or decremented but no row exists for the digest.
    #[error("no counter exists for digest '{0}'")]
    CounterNotExists(String),

    /// A blob was added under a digest that already names a blob.
    #[error("blob already exists for digest '{0}'")]
    BlobExists(String),

    /// A blob that the ledger implies should exist is missing on disk.
    #[error("blob missing for digest '{0}'")]
    BlobMissing(String),

    /// SQLite error from the ledger database.
    #[error("db: {0}")]
    Db(String),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
