//! Tree-structural events consumed by the ingester.
//!
//! An event source produces a depth-first walk of a batch as a flat sequence of
//! [`ParsingEvent`]s. `NodeBegin`/`NodeEnd` pairs are properly nested, and every
//! `Attribute` between a `NodeBegin` and its matching `NodeEnd` belongs to that node.

use std::fmt;
use std::io::{self, Read};

/// Suffix marking an attribute that only records a data file's presence.
pub const CONTENTS_SUFFIX: &str = "/contents";

/// One step of a depth-first walk.
pub enum ParsingEvent {
    /// A node (directory or grouped file set) is entered.
    NodeBegin {
        name: String,
        /// Set by the event source's classification policy.
        is_data_file_node: bool,
    },
    /// The most recently entered open node is left.
    NodeEnd { name: String },
    /// A metadata file belonging to the innermost open node.
    Attribute(AttributeEvent),
}

impl ParsingEvent {
    pub fn node_begin(name: impl Into<String>, is_data_file_node: bool) -> Self {
        ParsingEvent::NodeBegin {
            name: name.into(),
            is_data_file_node,
        }
    }

    pub fn node_end(name: impl Into<String>) -> Self {
        ParsingEvent::NodeEnd { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            ParsingEvent::NodeBegin { name, .. } => name,
            ParsingEvent::NodeEnd { name } => name,
            ParsingEvent::Attribute(attribute) => &attribute.name,
        }
    }
}

impl fmt::Debug for ParsingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingEvent::NodeBegin {
                name,
                is_data_file_node,
            } => f
                .debug_struct("NodeBegin")
                .field("name", name)
                .field("is_data_file_node", is_data_file_node)
                .finish(),
            ParsingEvent::NodeEnd { name } => f.debug_struct("NodeEnd").field("name", name).finish(),
            ParsingEvent::Attribute(attribute) => fmt::Debug::fmt(attribute, f),
        }
    }
}

/// A metadata file: its name, a reader over its content and an optional checksum.
pub struct AttributeEvent {
    pub name: String,
    data: Box<dyn Read + Send>,
    pub checksum: Option<String>,
}

impl AttributeEvent {
    pub fn new(name: impl Into<String>, data: Box<dyn Read + Send>, checksum: Option<String>) -> Self {
        Self {
            name: name.into(),
            data,
            checksum,
        }
    }

    /// Attribute backed by an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>, checksum: Option<String>) -> Self {
        Self::new(name, Box::new(io::Cursor::new(bytes.into())), checksum)
    }

    /// True for `.../contents` markers, which carry no ingestible metadata.
    pub fn is_contents_marker(&self) -> bool {
        self.name.ends_with(CONTENTS_SUFFIX)
    }

    /// Datastream name derived from the attribute name: the second-to-last
    /// dot-separated segment, upper-cased (`x.alto.xml` -> `ALTO`).
    /// Trailing empty segments are ignored, so `page.` has no datastream name.
    pub fn datastream_name(&self) -> Option<String> {
        let segments: Vec<&str> = self.name.trim_end_matches('.').split('.').collect();
        if segments.len() < 2 {
            return None;
        }
        Some(segments[segments.len() - 2].to_uppercase())
    }

    /// Consume the content reader as UTF-8 text.
    pub fn read_to_string(&mut self) -> io::Result<String> {
        let mut text = String::new();
        self.data.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl fmt::Debug for AttributeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}
