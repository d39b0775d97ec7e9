//! Path algebra for the virtual namespace.
//!
//! Two wire forms exist: the textual form (`/`-separated, `""` meaning the
//! current directory and `"/"` the root) and [`TreePath`], the structured
//! form every tree operation consumes. Parsing happens once at the public
//! boundary; everything below works on components.

use std::fmt;

use crate::{Error, Result};

/// A structured path in the virtual namespace.
///
/// Absolute paths are anchored at the root; relative paths at the current
/// directory. The two degenerate forms are the empty relative path (the
/// current directory, textual `""`) and the empty absolute path (the root,
/// textual `"/"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePath {
    /// Anchored at the root rather than the current directory.
    absolute: bool,
    /// Name components, root/cursor anchor excluded.
    parts: Vec<String>,
}

impl TreePath {
    /// Parses the textual form.
    ///
    /// Fails with [`Error::InvalidPath`] if the text contains adjacent
    /// separators. Leading and trailing separators are accepted (`"a/"`
    /// names the same node as `"a"`).
    pub fn parse(text: &str) -> Result<Self> {
        if text.contains("//") {
            return Err(Error::InvalidPath(text.to_owned()));
        }
        if text.is_empty() {
            return Ok(Self::current());
        }
        if text == "/" {
            return Ok(Self::root());
        }
        let absolute = text.starts_with('/');
        let parts = text
            .trim_matches('/')
            .split('/')
            .map(str::to_owned)
            .collect();
        Ok(Self { absolute, parts })
    }

    /// The root path (textual `"/"`).
    pub const fn root() -> Self {
        Self {
            absolute: true,
            parts: Vec::new(),
        }
    }

    /// The current directory (textual `""`).
    pub const fn current() -> Self {
        Self {
            absolute: false,
            parts: Vec::new(),
        }
    }

    /// Builds a path from pre-split components.
    pub(crate) const fn from_parts(absolute: bool, parts: Vec<String>) -> Self {
        Self { absolute, parts }
    }

    /// Returns `true` if the path is anchored at the root.
    pub const fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Returns `true` for the empty relative path (the current directory).
    pub const fn is_current(&self) -> bool {
        !self.absolute && self.parts.is_empty()
    }

    /// Returns `true` for the empty absolute path (the root).
    pub const fn is_root(&self) -> bool {
        self.absolute && self.parts.is_empty()
    }

    /// The name components.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The final name component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// The path with the final component removed.
    ///
    /// The parent of either degenerate form is the form itself.
    pub fn parent(&self) -> Self {
        let mut parts = self.parts.clone();
        parts.pop();
        Self {
            absolute: self.absolute,
            parts,
        }
    }

    /// The path extended by one component.
    pub fn join(&self, name: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(name.to_owned());
        Self {
            absolute: self.absolute,
            parts,
        }
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/{}", self.parts.join("/"))
        } else {
            write!(f, "{}", self.parts.join("/"))
        }
    }
}

/// Joins a textual directory path and a relative name into a textual path.
///
/// Used by the convenience operations that default a destination name from
/// a source basename.
pub(crate) fn join_text(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_forms_round_trip() {
        let current = TreePath::parse("").unwrap();
        assert!(current.is_current());
        assert_eq!(current.to_string(), "");

        let root = TreePath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn absolute_and_relative_round_trip() {
        for text in ["/a/b/c", "a/b/c", "/a", "a"] {
            let path = TreePath::parse(text).unwrap();
            assert_eq!(path.to_string(), text);
        }
    }

    #[test]
    fn trailing_separator_is_canonicalized() {
        let path = TreePath::parse("a/b/").unwrap();
        assert_eq!(path.parts(), ["a", "b"]);
        assert_eq!(path.to_string(), "a/b");
        assert!(!path.is_absolute());

        let path = TreePath::parse("/a/").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path.to_string(), "/a");
    }

    #[test]
    fn adjacent_separators_are_invalid() {
        for text in ["//", "a//b", "//a", "a//"] {
            assert!(matches!(
                TreePath::parse(text),
                Err(Error::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn parent_and_join() {
        let path = TreePath::parse("/a/b").unwrap();
        assert_eq!(path.parent().to_string(), "/a");
        assert_eq!(path.parent().parent().to_string(), "/");
        assert_eq!(path.parent().parent().parent().to_string(), "/");
        assert_eq!(path.join("c").to_string(), "/a/b/c");
        assert_eq!(path.file_name(), Some("b"));
    }

    #[test]
    fn join_text_handles_all_dir_shapes() {
        assert_eq!(join_text("", "x"), "x");
        assert_eq!(join_text("/", "x"), "/x");
        assert_eq!(join_text("/a", "x"), "/a/x");
        assert_eq!(join_text("a", "x"), "a/x");
    }
}
