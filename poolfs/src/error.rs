//! Error family for poolfs operations.

/// Alias for `Result<T, poolfs::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by virtual file system operations.
///
/// Path-shaped variants carry the offending path in its textual form.
/// Host filesystem errors surface unchanged through the `Io` variant;
/// ledger and blob store failures through `Store`.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A textual path is malformed (adjacent separators).
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// A node name is empty or contains a separator.
    #[error("invalid node name '{0}'")]
    InvalidNamingConvention(String),

    /// The path does not resolve to a node.
    #[error("path '{0}' does not exist")]
    PathNotExists(String),

    /// The parent directory of the path does not exist.
    #[error("the directory of path '{0}' does not exist")]
    DirOfPathNotExists(String),

    /// The path already exists. Mutations never overwrite.
    #[error("path '{0}' already exists")]
    PathExists(String),

    /// The path resolves to a directory where a file was required.
    #[error("path '{0}' is not a file")]
    PathIsNotFile(String),

    /// The path resolves to a file where a directory was required.
    #[error("path '{0}' is not a directory")]
    PathIsNotDir(String),

    /// The operation is illegal regardless of cursor position
    /// (destination inside source, outer path inside the root, ...).
    #[error("{0}")]
    InvalidOperation(String),

    /// The operation targets the current directory or a path containing it.
    #[error("{0}")]
    InvalidCurrentDirOperation(String),

    /// A file node has no content digest bound.
    #[error("file '{0}' has no content digest")]
    FileIdNotFound(String),

    /// Blob store or reference ledger error.
    #[error(transparent)]
    Store(#[from] poolfs_store::Error),

    /// Host filesystem error, surfaced unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Tree document (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
