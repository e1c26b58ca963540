#![doc = "doms-ingester: loads newspaper digitisation batches into a DOMS repository."]

//! The heart of the crate is [`ingest::TreeIngester`], which turns a depth-first
//! stream of [`event::ParsingEvent`]s into objects, datastreams and relations
//! through the [`contract::ObjectStore`] trait.
//!
//! The remaining modules supply the collaborators a real run needs: a
//! filesystem event source, a Fedora REST client, a cleanup helper for failed
//! runs, configuration loading and the CLI.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod contract;
pub mod error;
pub mod event;
pub mod fedora;
pub mod ingest;
pub mod load_config;
pub mod tree_iterator;

pub use contract::{ObjectStore, StoreError};
pub use error::IngestError;
pub use event::{AttributeEvent, ParsingEvent};
pub use ingest::{IngestReport, TreeIngester};
