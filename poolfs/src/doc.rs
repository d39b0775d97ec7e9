//! On-disk document form of the directory tree.
//!
//! Each node serialises as the 3-element tuple `[is_dir, metadata, content]`
//! where `content` is the child map for directories and the content digest
//! for files (`""` = unbound). The whole tree is one JSON document whose
//! root is a directory node with empty metadata.
//!
//! Documents written by earlier revisions encode an unbound file's content
//! as an empty map rather than `""`; both are accepted on read, the
//! documented form is written.

use std::collections::BTreeMap;
use std::io;

use serde::de::Error as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tree::{Metadata, Node};

/// Formatting toggles for the persisted tree document.
///
/// The default (compact, tight separators) minimizes document size; the
/// alternatives exist for documents meant to be read by humans.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocFormat {
    /// Write with 4-space indentation instead of a single line.
    pub indent: bool,
    /// Write a space after `,` and `:` separators.
    pub spaced: bool,
}

impl DocFormat {
    /// Builds a format from its two toggles.
    pub const fn new(indent: bool, spaced: bool) -> Self {
        Self { indent, spaced }
    }
}

/// Serialises `root` into document bytes using `format`.
pub(crate) fn to_vec(root: &Node, format: DocFormat) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, DocFormatter::new(format));
    root.serialize(&mut ser)?;
    Ok(buf)
}

/// Parses document bytes back into a node.
pub(crate) fn from_slice(bytes: &[u8]) -> serde_json::Result<Node> {
    serde_json::from_slice(bytes)
}

/// Deserialization bridge: the raw tuple as it appears in the document.
#[derive(Deserialize)]
struct RawNode(bool, Metadata, RawContent);

/// Raw node content: a child map or a digest string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    /// Directory children (also the legacy encoding of an unbound file).
    Children(BTreeMap<String, Node>),
    /// File content digest, `""` when unbound.
    Digest(String),
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(3)?;
        match self {
            Self::Dir { meta, children } => {
                tuple.serialize_element(&true)?;
                tuple.serialize_element(meta)?;
                tuple.serialize_element(children)?;
            }
            Self::File { meta, digest } => {
                tuple.serialize_element(&false)?;
                tuple.serialize_element(meta)?;
                tuple.serialize_element(digest.as_deref().unwrap_or(""))?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let RawNode(is_dir, meta, content) = RawNode::deserialize(deserializer)?;
        match (is_dir, content) {
            (true, RawContent::Children(children)) => Ok(Self::Dir { meta, children }),
            (false, RawContent::Digest(digest)) => Ok(Self::File {
                meta,
                digest: if digest.is_empty() { None } else { Some(digest) },
            }),
            // Legacy form: unbound files were stored with an empty map.
            (false, RawContent::Children(children)) if children.is_empty() => {
                Ok(Self::File { meta, digest: None })
            }
            (true, RawContent::Digest(_)) => Err(D::Error::custom(
                "directory node carries a digest instead of children",
            )),
            (false, RawContent::Children(_)) => Err(D::Error::custom(
                "file node carries children instead of a digest",
            )),
        }
    }
}

/// `serde_json` formatter covering the document's four formatting
/// combinations (compact/indented × tight/spaced separators).
struct DocFormatter {
    /// The two toggles.
    format: DocFormat,
    /// Current container nesting depth (indented mode).
    depth: usize,
    /// Whether the current container holds at least one value.
    has_value: bool,
}

impl DocFormatter {
    /// Builds a formatter for `format`.
    const fn new(format: DocFormat) -> Self {
        Self {
            format,
            depth: 0,
            has_value: false,
        }
    }

    /// Writes a newline followed by the current indentation.
    fn write_indent<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b"\n")?;
        for _ in 0..self.depth {
            writer.write_all(b"    ")?;
        }
        Ok(())
    }

    /// Writes the separator preceding an array value or object key.
    fn item_separator<W>(&self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if self.format.indent {
            if !first {
                writer.write_all(b",")?;
            }
            self.write_indent(writer)
        } else if first {
            Ok(())
        } else if self.format.spaced {
            writer.write_all(b", ")
        } else {
            writer.write_all(b",")
        }
    }

    /// Opens a container.
    fn begin_container<W>(&mut self, writer: &mut W, open: &[u8]) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.depth += 1;
        self.has_value = false;
        writer.write_all(open)
    }

    /// Closes a container, breaking the line first in indented mode.
    fn end_container<W>(&mut self, writer: &mut W, close: &[u8]) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.depth -= 1;
        if self.format.indent && self.has_value {
            self.write_indent(writer)?;
        }
        writer.write_all(close)
    }
}

impl serde_json::ser::Formatter for DocFormatter {
    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.begin_container(writer, b"[")
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.end_container(writer, b"]")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.item_separator(writer, first)
    }

    fn end_array_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.begin_container(writer, b"{")
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.end_container(writer, b"}")
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.item_separator(writer, first)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if self.format.spaced {
            writer.write_all(b": ")
        } else {
            writer.write_all(b":")
        }
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }
}
