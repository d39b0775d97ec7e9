//! Deduplicating multi-user virtual file system.
//!
//! Each user sees a private hierarchical namespace, but file *contents* are
//! stored exactly once in a shared content-addressed pool: two users
//! holding identical bytes consume one physical copy. Reference counts in a
//! transactional ledger decide blob lifetime: the instant the last
//! reference to a digest goes away, its blob is reclaimed.
//!
//! # Architecture
//!
//! ```text
//! VirtualFileSystem (orchestrator, per root × user)
//!  ├── DirTree    — per-user namespace, one JSON document
//!  │    ├── TreePath  — path algebra (textual ↔ structured)
//!  │    └── Node      — Dir { meta, children } | File { meta, digest }
//!  └── poolfs-store (shared per root)
//!       ├── BlobStore — EntityFiles/, one file per unique content
//!       └── RefLedger — SQLite digest → reference count
//! ```
//!
//! The core is single-threaded and single-writer per root; initialization
//! takes an advisory lock on the root to keep it that way.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use poolfs::VirtualFileSystem;
//!
//! # fn main() -> poolfs::Result<()> {
//! let mut vfs = VirtualFileSystem::open(Path::new("pool-root"), "alice")?;
//! vfs.mkdir("/docs")?;
//! vfs.copy_from_outside(Path::new("report.pdf"), "/docs/report.pdf")?;
//! println!("{:?}", vfs.list("/docs")?);
//! vfs.close()?;
//! # Ok(())
//! # }
//! ```

mod doc;
mod error;
mod path;
mod tree;
mod vfs;

pub use doc::DocFormat;
pub use error::{Error, Result};
pub use path::TreePath;
pub use tree::{DirTree, META_CREATED, META_MODIFIED, Metadata, Node};
pub use vfs::VirtualFileSystem;
