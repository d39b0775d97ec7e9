//! Per-user directory tree with JSON persistence.
//!
//! The tree is pure namespace: names, metadata, and content digests. The
//! bytes behind a digest live in the shared blob store; reference counts in
//! the ledger. Every mutation here maintains the timestamp invariants (a
//! directory's last-modified time is bumped whenever anything below it
//! changes) and validates paths before touching the tree, so a failed
//! operation leaves the tree exactly as it was.
//!
//! Path resolution is stateless: every lookup walks from the root. The
//! current-directory cursor is plain data, changed only by [`DirTree::chdir`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::doc::{self, DocFormat};
use crate::path::TreePath;
use crate::{Error, Result};

/// Reserved metadata key: creation time, set once at node creation.
pub const META_CREATED: &str = "0";

/// Reserved metadata key: last-modified time, maintained recursively.
pub const META_MODIFIED: &str = "1";

/// Timestamp format written into node metadata (minute precision, no zone).
///
/// Kept for document compatibility; two mutations within the same minute
/// are indistinguishable in the stored document.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Metadata attached to every node except the root.
pub type Metadata = BTreeMap<String, String>;

/// A node in the virtual namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A directory with uniquely named children.
    Dir {
        /// Metadata map; [`META_CREATED`] and [`META_MODIFIED`] are reserved.
        meta: Metadata,
        /// Children keyed by name. `BTreeMap` keeps serialisation
        /// deterministic.
        children: BTreeMap<String, Node>,
    },
    /// A regular file referencing its content by digest.
    File {
        /// Metadata map; [`META_CREATED`] and [`META_MODIFIED`] are reserved.
        meta: Metadata,
        /// Content digest; `None` until content is bound.
        digest: Option<String>,
    },
}

impl Node {
    /// An empty directory with no metadata (the shape of a fresh root).
    fn empty_dir() -> Self {
        Self::Dir {
            meta: Metadata::new(),
            children: BTreeMap::new(),
        }
    }

    /// A directory stamped with creation and modification time `now`.
    fn new_dir(now: &str) -> Self {
        Self::Dir {
            meta: stamped_meta(now),
            children: BTreeMap::new(),
        }
    }

    /// An unbound file stamped with creation and modification time `now`.
    fn new_file(now: &str) -> Self {
        Self::File {
            meta: stamped_meta(now),
            digest: None,
        }
    }

    /// Returns `true` for directory nodes.
    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir { .. })
    }

    /// The node's metadata.
    pub const fn meta(&self) -> &Metadata {
        match self {
            Self::Dir { meta, .. } | Self::File { meta, .. } => meta,
        }
    }

    /// Mutable access to the node's metadata.
    fn meta_mut(&mut self) -> &mut Metadata {
        match self {
            Self::Dir { meta, .. } | Self::File { meta, .. } => meta,
        }
    }

    /// The child map, for directories.
    pub const fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Self::Dir { children, .. } => Some(children),
            Self::File { .. } => None,
        }
    }

    /// Mutable child map, for directories.
    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Self::Dir { children, .. } => Some(children),
            Self::File { .. } => None,
        }
    }

    /// Sets the last-modified time on this node and every descendant.
    ///
    /// Creation times are left untouched; a relocated subtree keeps the
    /// history of when its nodes came into being.
    fn stamp(&mut self, now: &str) {
        self.meta_mut()
            .insert(META_MODIFIED.to_owned(), now.to_owned());
        if let Self::Dir { children, .. } = self {
            for child in children.values_mut() {
                child.stamp(now);
            }
        }
    }
}

/// Fresh metadata carrying both reserved timestamps.
fn stamped_meta(now: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(META_CREATED.to_owned(), now.to_owned());
    meta.insert(META_MODIFIED.to_owned(), now.to_owned());
    meta
}

/// Returns `true` if `prefix` is a (non-strict) component prefix of `of`.
fn is_prefix(prefix: &[String], of: &[String]) -> bool {
    of.len() >= prefix.len() && of[..prefix.len()] == *prefix
}

/// A per-user directory tree bound to its JSON document.
///
/// All operations take [`TreePath`]s; textual parsing happens at the VFS
/// boundary. `mkdir`/`create_file` overwrite silently at this layer;
/// non-overwrite semantics are enforced by the orchestrator.
#[derive(Debug)]
pub struct DirTree {
    /// Path of the persisted document.
    doc_path: PathBuf,
    /// The root directory node. Carries no metadata (invariant).
    root: Node,
    /// Cursor: components from the root. Only [`chdir`](Self::chdir)
    /// mutates it.
    cwd: Vec<String>,
    /// Formatting toggles for the persisted document.
    format: DocFormat,
}

impl DirTree {
    /// Opens the tree stored at `doc_path`, or starts an empty one.
    ///
    /// A missing or zero-length document bootstraps an empty tree. A
    /// non-empty document that does not parse is an error: silently
    /// discarding a user's namespace would be worse than refusing to start.
    pub fn open(doc_path: &Path, format: DocFormat) -> Result<Self> {
        if let Some(dir) = doc_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.is_dir()
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "directory of tree document '{}' does not exist",
                    doc_path.display()
                ),
            )));
        }
        let root = match fs::read(doc_path) {
            Ok(bytes) if bytes.is_empty() => Node::empty_dir(),
            Ok(bytes) => {
                let node = doc::from_slice(&bytes)?;
                if !node.is_dir() {
                    return Err(Error::InvalidOperation(format!(
                        "tree document '{}' does not hold a directory at its root",
                        doc_path.display()
                    )));
                }
                node
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Node::empty_dir(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            doc_path: doc_path.to_path_buf(),
            root,
            cwd: Vec::new(),
            format,
        })
    }

    /// Writes the tree back to its document.
    pub fn flush(&self) -> Result<()> {
        let bytes = doc::to_vec(&self.root, self.format)?;
        fs::write(&self.doc_path, bytes)?;
        Ok(())
    }

    /// Serialises the current state without writing it (used by tests to
    /// check that failed operations left the tree byte-identical).
    pub fn to_document(&self) -> Result<Vec<u8>> {
        Ok(doc::to_vec(&self.root, self.format)?)
    }

    /// The current wall-clock instant in document format.
    fn now() -> String {
        Local::now().format(TIME_FORMAT).to_string()
    }

    /// Resolves `path` against the cursor into components from the root.
    fn absolutize(&self, path: &TreePath) -> Vec<String> {
        if path.is_absolute() {
            path.parts().to_vec()
        } else {
            let mut comps = self.cwd.clone();
            comps.extend(path.parts().iter().cloned());
            comps
        }
    }

    /// Walks from the root to the node named by `comps`.
    fn node(&self, comps: &[String]) -> Option<&Node> {
        let mut cur = &self.root;
        for name in comps {
            cur = cur.children()?.get(name)?;
        }
        Some(cur)
    }

    /// Mutable counterpart of [`node`](Self::node).
    fn node_mut(&mut self, comps: &[String]) -> Option<&mut Node> {
        let mut cur = &mut self.root;
        for name in comps {
            cur = cur.children_mut()?.get_mut(name)?;
        }
        Some(cur)
    }

    /// Sets the last-modified time on every proper ancestor of `comps`.
    ///
    /// The root is skipped; it carries no metadata.
    fn touch_ancestors(&mut self, comps: &[String], now: &str) {
        for depth in 1..comps.len() {
            if let Some(node) = self.node_mut(&comps[..depth]) {
                node.meta_mut()
                    .insert(META_MODIFIED.to_owned(), now.to_owned());
            }
        }
    }

    /// The cursor as an absolute path.
    pub fn cwd(&self) -> TreePath {
        TreePath::from_parts(true, self.cwd.clone())
    }

    /// Returns `true` if `path` resolves to a node.
    pub fn exists(&self, path: &TreePath) -> bool {
        self.node(&self.absolutize(path)).is_some()
    }

    /// Returns `true` if `path` resolves to a directory.
    pub fn is_dir(&self, path: &TreePath) -> Result<bool> {
        self.node(&self.absolutize(path))
            .map(Node::is_dir)
            .ok_or_else(|| Error::PathNotExists(path.to_string()))
    }

    /// Moves the cursor to `path`.
    ///
    /// On failure the cursor is unchanged.
    pub fn chdir(&mut self, path: &TreePath) -> Result<()> {
        let comps = self.absolutize(path);
        match self.node(&comps) {
            None => Err(Error::PathNotExists(path.to_string())),
            Some(node) if !node.is_dir() => Err(Error::PathIsNotDir(path.to_string())),
            Some(_) => {
                self.cwd = comps;
                Ok(())
            }
        }
    }

    /// Returns an independent copy of the node's metadata.
    pub fn metadata(&self, path: &TreePath) -> Result<Metadata> {
        self.node(&self.absolutize(path))
            .map(|node| node.meta().clone())
            .ok_or_else(|| Error::PathNotExists(path.to_string()))
    }

    /// Replaces the node's metadata.
    ///
    /// The reserved keys are overlaid back: creation time is preserved and
    /// last-modified time is set to now. The root carries no metadata and
    /// rejects replacement.
    pub fn set_metadata(&mut self, path: &TreePath, metadata: Metadata) -> Result<()> {
        let comps = self.absolutize(path);
        if comps.is_empty() {
            return Err(Error::InvalidOperation(
                "the root directory carries no metadata".to_owned(),
            ));
        }
        let now = Self::now();
        let node = self
            .node_mut(&comps)
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        let meta = node.meta_mut();
        let created = meta.get(META_CREATED).cloned();
        *meta = metadata;
        if let Some(created) = created {
            meta.insert(META_CREATED.to_owned(), created);
        }
        meta.insert(META_MODIFIED.to_owned(), now.clone());
        self.touch_ancestors(&comps, &now);
        Ok(())
    }

    /// Lists the child names of the directory at `path`, in stored order.
    pub fn list(&self, path: &TreePath) -> Result<Vec<String>> {
        let node = self
            .node(&self.absolutize(path))
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        node.children()
            .map(|children| children.keys().cloned().collect())
            .ok_or_else(|| Error::PathIsNotDir(path.to_string()))
    }

    /// Returns the content digest of the file at `path`.
    pub fn file_digest(&self, path: &TreePath) -> Result<String> {
        let node = self
            .node(&self.absolutize(path))
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        match node {
            Node::Dir { .. } => Err(Error::PathIsNotFile(path.to_string())),
            Node::File {
                digest: Some(digest),
                ..
            } => Ok(digest.clone()),
            Node::File { digest: None, .. } => Err(Error::FileIdNotFound(path.to_string())),
        }
    }

    /// Binds a content digest to the file at `path`.
    ///
    /// Changes no timestamps: binding content is part of the creation that
    /// already stamped the node.
    pub fn set_file_digest(&mut self, path: &TreePath, digest: &str) -> Result<()> {
        let node = self
            .node_mut(&self.absolutize(path))
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        match node {
            Node::Dir { .. } => Err(Error::PathIsNotFile(path.to_string())),
            Node::File { digest: slot, .. } => {
                *slot = Some(digest.to_owned());
                Ok(())
            }
        }
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &TreePath) -> Result<()> {
        self.create_node(path, true)
    }

    /// Creates an unbound file at `path`.
    pub fn create_file(&mut self, path: &TreePath) -> Result<()> {
        self.create_node(path, false)
    }

    /// Shared creation logic. Overwrites silently at this layer.
    fn create_node(&mut self, path: &TreePath, dir: bool) -> Result<()> {
        if path.is_current() {
            return Err(Error::InvalidCurrentDirOperation(
                "cannot create a node at the current directory".to_owned(),
            ));
        }
        let comps = self.absolutize(path);
        let Some((name, parent)) = comps.split_last() else {
            return Err(Error::InvalidCurrentDirOperation(
                "cannot create the root directory".to_owned(),
            ));
        };
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidNamingConvention(name.clone()));
        }
        let now = Self::now();
        let node = if dir {
            Node::new_dir(&now)
        } else {
            Node::new_file(&now)
        };
        let children = self
            .node_mut(parent)
            .and_then(Node::children_mut)
            .ok_or_else(|| Error::DirOfPathNotExists(path.to_string()))?;
        children.insert(name.clone(), node);
        self.touch_ancestors(&comps, &now);
        Ok(())
    }

    /// Validates a move/copy pair and returns both absolutized paths.
    ///
    /// Rejections, in order: destination inside source; source or
    /// destination is the cursor; source or destination contains the
    /// cursor; source missing; destination parent missing or not a
    /// directory; destination name invalid.
    fn check_relocate(
        &self,
        src: &TreePath,
        dst: &TreePath,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let src_abs = self.absolutize(src);
        let dst_abs = self.absolutize(dst);
        if is_prefix(&src_abs, &dst_abs) {
            return Err(Error::InvalidOperation(format!(
                "destination path '{dst}' lies inside source path '{src}'"
            )));
        }
        if src.is_current() || dst.is_current() {
            return Err(Error::InvalidCurrentDirOperation(
                "source and destination must not be the current directory".to_owned(),
            ));
        }
        if is_prefix(&src_abs, &self.cwd) {
            return Err(Error::InvalidCurrentDirOperation(format!(
                "source path '{src}' contains the current directory"
            )));
        }
        if is_prefix(&dst_abs, &self.cwd) {
            return Err(Error::InvalidCurrentDirOperation(format!(
                "destination path '{dst}' contains the current directory"
            )));
        }
        if self.node(&src_abs).is_none() {
            return Err(Error::PathNotExists(src.to_string()));
        }
        if let Some((name, dst_parent)) = dst_abs.split_last() {
            if name.is_empty() || name.contains('/') {
                return Err(Error::InvalidNamingConvention(name.clone()));
            }
            if !self.node(dst_parent).is_some_and(Node::is_dir) {
                return Err(Error::DirOfPathNotExists(dst.to_string()));
            }
        }
        Ok((src_abs, dst_abs))
    }

    /// Inserts `node` at `comps` (parent must exist and be a directory).
    fn insert_node(&mut self, comps: &[String], node: Node) -> Result<()> {
        let Some((name, parent)) = comps.split_last() else {
            return Err(Error::InvalidOperation(
                "cannot replace the root directory".to_owned(),
            ));
        };
        let children = self
            .node_mut(parent)
            .and_then(Node::children_mut)
            .ok_or_else(|| {
                Error::DirOfPathNotExists(TreePath::from_parts(true, comps.to_vec()).to_string())
            })?;
        children.insert(name.clone(), node);
        Ok(())
    }

    /// Relocates the subtree at `src` to `dst`.
    ///
    /// The relocated subtree is recursively stamped with the operation's
    /// instant; creation times are preserved. Ancestors of both endpoints
    /// get their last-modified time bumped.
    pub fn move_node(&mut self, src: &TreePath, dst: &TreePath) -> Result<()> {
        let (src_abs, dst_abs) = self.check_relocate(src, dst)?;
        let now = Self::now();
        self.touch_ancestors(&src_abs, &now);
        let Some((name, src_parent)) = src_abs.split_last() else {
            // src empty would have been caught as containing the cursor.
            return Err(Error::PathNotExists(src.to_string()));
        };
        let mut node = self
            .node_mut(src_parent)
            .and_then(Node::children_mut)
            .and_then(|children| children.remove(name))
            .ok_or_else(|| Error::PathNotExists(src.to_string()))?;
        node.stamp(&now);
        self.insert_node(&dst_abs, node)?;
        self.touch_ancestors(&dst_abs, &now);
        Ok(())
    }

    /// Deep-clones the subtree at `src` into `dst`.
    ///
    /// Digests are copied by value; reference-count bookkeeping is the
    /// orchestrator's job. The clone is recursively stamped with the
    /// operation's instant; creation times are preserved.
    pub fn copy_node(&mut self, src: &TreePath, dst: &TreePath) -> Result<()> {
        let (src_abs, dst_abs) = self.check_relocate(src, dst)?;
        let now = Self::now();
        let mut node = self
            .node(&src_abs)
            .cloned()
            .ok_or_else(|| Error::PathNotExists(src.to_string()))?;
        node.stamp(&now);
        self.insert_node(&dst_abs, node)?;
        self.touch_ancestors(&dst_abs, &now);
        Ok(())
    }

    /// Removes the subtree at `path`.
    pub fn delete(&mut self, path: &TreePath) -> Result<()> {
        if path.is_current() {
            return Err(Error::InvalidCurrentDirOperation(
                "cannot delete the current directory".to_owned(),
            ));
        }
        let comps = self.absolutize(path);
        if is_prefix(&comps, &self.cwd) {
            return Err(Error::InvalidCurrentDirOperation(format!(
                "path '{path}' contains the current directory"
            )));
        }
        if self.node(&comps).is_none() {
            return Err(Error::PathNotExists(path.to_string()));
        }
        let now = Self::now();
        self.touch_ancestors(&comps, &now);
        if let Some((name, parent)) = comps.split_last()
            && let Some(children) = self.node_mut(parent).and_then(Node::children_mut)
        {
            children.remove(name);
        }
        Ok(())
    }

    /// Collects the content digests of every bound file at or below `path`.
    ///
    /// Unbound files reference nothing and are skipped.
    pub fn digests_under(&self, path: &TreePath) -> Result<Vec<String>> {
        let node = self
            .node(&self.absolutize(path))
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        let mut digests = Vec::new();
        collect_digests(node, &mut digests);
        Ok(digests)
    }

    /// Enumerates every file below the directory at `path` into
    /// `relative/path → digest` pairs, sorted by path.
    ///
    /// An unbound file is an error: enumeration exists to compare content.
    pub fn files_under(&self, path: &TreePath) -> Result<BTreeMap<String, String>> {
        let node = self
            .node(&self.absolutize(path))
            .ok_or_else(|| Error::PathNotExists(path.to_string()))?;
        if !node.is_dir() {
            return Err(Error::PathIsNotDir(path.to_string()));
        }
        let mut files = BTreeMap::new();
        collect_files(node, "", &mut files)?;
        Ok(files)
    }
}

/// Recursive helper for [`DirTree::digests_under`].
fn collect_digests(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::File { digest, .. } => {
            if let Some(digest) = digest {
                out.push(digest.clone());
            }
        }
        Node::Dir { children, .. } => {
            for child in children.values() {
                collect_digests(child, out);
            }
        }
    }
}

/// Recursive helper for [`DirTree::files_under`].
fn collect_files(node: &Node, prefix: &str, out: &mut BTreeMap<String, String>) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for (name, child) in children {
        let rel = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match child {
            Node::Dir { .. } => collect_files(child, &rel, out)?,
            Node::File {
                digest: Some(digest),
                ..
            } => {
                out.insert(rel, digest.clone());
            }
            Node::File { digest: None, .. } => {
                return Err(Error::FileIdNotFound(rel));
            }
        }
    }
    Ok(())
}
