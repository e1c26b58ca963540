//! Error types for an ingest run.

use thiserror::Error;

use crate::contract::StoreError;

/// Errors that abort an ingest run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The attribute name has no `<name>.<ext>` shape to derive a datastream name from.
    #[error("cannot find datastream name in {name}")]
    DatastreamName { name: String },

    /// A `NodeEnd` arrived with no open node.
    #[error("node end {name:?} has no matching node begin")]
    UnbalancedNodeEnd { name: String },

    /// An attribute arrived with no open node to attach it to.
    #[error("attribute {name} appears outside of any node")]
    AttributeOutsideNode { name: String },

    /// The stream ended while nodes were still open.
    #[error("event stream ended with {open} unclosed node(s)")]
    UnclosedNodes { open: usize },

    /// The stream contained no node at all.
    #[error("event stream contained no nodes")]
    EmptyTree,

    /// Reading or decoding an attribute's content failed.
    #[error("failed to read attribute {name}: {source}")]
    AttributeRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The event source itself failed.
    #[error("event source failed: {0}")]
    Source(#[source] std::io::Error),

    /// The object store rejected a call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience type alias for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;
