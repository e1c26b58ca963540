//! # contract: interface between the ingester and the object repository
//!
//! This module defines the [`ObjectStore`] trait and the plain request types the
//! ingester hands to it. The trait is the only way the traversal talks to the
//! remote repository: the production implementation is [`crate::fedora::FedoraClient`],
//! tests use the generated `MockObjectStore`.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; the mock is exported behind the default
//!   `test-export-mocks` feature so integration tests under `tests/` can use it.
//! - Requests are owned values, so expectations can inspect them freely.
//!
//! ## Errors
//! Every method fails with a [`StoreError`]. The ingester never retries: whatever
//! error the store reports is handed unchanged to the caller of `ingest`.

use async_trait::async_trait;
use thiserror::Error;

use mockall::automock;

/// Failures reported by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the configured credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The object or datastream does not exist, or access to it is not permitted.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// No identifier could be generated for a new object.
    #[error("pid generation failed: {0}")]
    PidGenerator(String),

    /// The store reported a checksum that differs from the one supplied with a write.
    #[error("checksum mismatch for datastream {datastream} on {pid}")]
    ChecksumMismatch { pid: String, datastream: String },

    /// Any other backend or transport failure.
    #[error("backend method failed: {0}")]
    MethodFailed(String),
}

/// Request to create an empty object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    /// Alternate identifiers recorded on the object (e.g. `path:B400022028241-RT1`).
    pub old_ids: Vec<String>,
    /// Collections the new object becomes a member of. May be empty.
    pub collections: Vec<String>,
    /// Audit message stored with the creation.
    pub log_message: String,
}

/// Request to write or replace the textual content of a datastream.
///
/// With `checksum` set, the store must verify the content against it and fail
/// with [`StoreError::ChecksumMismatch`] when they differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastreamWrite {
    pub pid: String,
    pub datastream: String,
    pub content: String,
    /// Lower-case hex MD5 of `content`.
    pub checksum: Option<String>,
    pub alternative_ids: Vec<String>,
    pub comment: String,
}

/// Request to add a directed relation between two objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationWrite {
    pub subject: String,
    /// Relation type, a URI such as [`crate::ingest::HAS_PART_RELATION`].
    pub predicate: String,
    pub object: String,
    pub comment: String,
}

/// Operations the ingester and the cleanup helper need from the object repository.
///
/// The trait is `Send` + `Sync` and intended for async/await usage; a single
/// ingest run awaits every call before issuing the next one.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an empty object and return its generated pid.
    async fn new_empty_object(&self, req: NewObject) -> Result<String, StoreError>;

    /// Write or replace a datastream's inline content.
    async fn modify_datastream_by_value(&self, req: DatastreamWrite) -> Result<(), StoreError>;

    /// Add a relation `subject --predicate--> object`.
    async fn add_relation(&self, req: RelationWrite) -> Result<(), StoreError>;

    /// Pids of all objects carrying the given DC identifier.
    async fn find_objects_by_identifier(&self, identifier: String) -> Result<Vec<String>, StoreError>;

    /// Pids that `pid` points to through `predicate`.
    async fn get_named_relations(
        &self,
        pid: String,
        predicate: String,
    ) -> Result<Vec<String>, StoreError>;

    /// Permanently remove an object.
    async fn purge_object(&self, pid: String, comment: String) -> Result<(), StoreError>;
}
