//! Tree ingest: turns a depth-first event stream into objects, datastreams and relations.
//!
//! [`TreeIngester`] consumes [`ParsingEvent`]s one at a time and drives an
//! [`ObjectStore`] so that the repository ends up holding one object per node,
//! one datastream per metadata attribute, and `hasPart`/`hasFile` relations
//! mirroring the tree.
//!
//! # State
//! Only the chain of currently open nodes is held in memory:
//! - a frame stack (one frame per open node, innermost last), and
//! - a table of pending child pids keyed by the owning node's pid.
//!
//! A table entry is created when its node is entered and consumed when the node
//! is left, at which point the relations to its children are written in
//! discovery order.
//!
//! # Error Handling
//! The first failure aborts the run. Nothing is retried or rolled back; objects
//! and relations written before the failure stay in the store (see
//! [`crate::cleanup`] for removing them).

use std::collections::HashMap;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::contract::{DatastreamWrite, NewObject, ObjectStore, RelationWrite};
use crate::error::{IngestError, Result};
use crate::event::{AttributeEvent, ParsingEvent};

/// Relation from a node's object to each of its children's objects.
pub const HAS_PART_RELATION: &str = "info:fedora/fedora-system:def/relations-external#hasPart";

/// Relation written in addition to `hasPart` below data-file nodes.
pub const HAS_FILE_RELATION: &str = "http://doms.statsbiblioteket.dk/relations/default/0/1/#hasFile";

/// Audit comment attached to every datastream write.
pub const DATASTREAM_COMMENT: &str = "Added by ingester.";

/// Prefix of the alternate identifier recorded on every created object.
pub const PATH_ID_PREFIX: &str = "path:";

/// Which classification decides whether `hasFile` accompanies `hasPart`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HasFileRule {
    /// The node being closed must be a data-file node. This is the relation
    /// graph existing DOMS batches were built with.
    #[default]
    ClosingNode,
    /// The child must be a data-file node.
    DataFileChild,
}

/// Relation type identifiers used when a node is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTypes {
    pub has_part: String,
    pub has_file: String,
    pub has_file_rule: HasFileRule,
}

impl Default for RelationTypes {
    fn default() -> Self {
        Self {
            has_part: HAS_PART_RELATION.to_string(),
            has_file: HAS_FILE_RELATION.to_string(),
            has_file_rule: HasFileRule::default(),
        }
    }
}

/// Summary of a completed ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub root_pid: String,
    pub objects_created: usize,
    pub datastreams_written: usize,
    pub attributes_skipped: usize,
    pub relations_written: usize,
}

/// One open node.
#[derive(Debug)]
struct Frame {
    pid: String,
    name: String,
    is_data_file_node: bool,
}

/// A child recorded under its still-open parent.
#[derive(Debug)]
struct Child {
    pid: String,
    is_data_file_node: bool,
}

#[derive(Debug, Default)]
struct Traversal {
    stack: Vec<Frame>,
    pending_children: HashMap<String, Vec<Child>>,
    root_pid: Option<String>,
    report: IngestReport,
}

impl Traversal {
    fn current_pid(&self) -> Option<&str> {
        self.stack.last().map(|frame| frame.pid.as_str())
    }
}

/// Ingests one event stream into an object store.
pub struct TreeIngester<'s, S: ObjectStore + ?Sized> {
    store: &'s S,
    collections: Vec<String>,
    relations: RelationTypes,
}

impl<'s, S: ObjectStore + ?Sized> TreeIngester<'s, S> {
    /// Every object created by this ingester becomes a member of `collections`.
    pub fn new(store: &'s S, collections: Vec<String>) -> Self {
        Self {
            store,
            collections,
            relations: RelationTypes::default(),
        }
    }

    pub fn with_relations(mut self, relations: RelationTypes) -> Self {
        self.relations = relations;
        self
    }

    /// Ingest the stream and return the pid of the root object.
    pub async fn ingest<I>(&self, events: I) -> Result<String>
    where
        I: IntoIterator<Item = io::Result<ParsingEvent>>,
    {
        self.ingest_with_report(events)
            .await
            .map(|report| report.root_pid)
    }

    /// Ingest the stream and return counts of everything written.
    pub async fn ingest_with_report<I>(&self, events: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = io::Result<ParsingEvent>>,
    {
        info!(collections = ?self.collections, "[INGEST] Starting tree ingest");
        let mut traversal = Traversal::default();

        for event in events {
            let event = event.map_err(|e| {
                error!(error = ?e, "[INGEST][ERROR] Event source failed");
                IngestError::Source(e)
            })?;
            trace!(event = event.name(), depth = traversal.stack.len(), "[INGEST] Event");
            match event {
                ParsingEvent::NodeBegin {
                    name,
                    is_data_file_node,
                } => {
                    self.handle_node_begin(&mut traversal, name, is_data_file_node)
                        .await?
                }
                ParsingEvent::NodeEnd { name } => self.handle_node_end(&mut traversal, name).await?,
                ParsingEvent::Attribute(attribute) => {
                    self.handle_attribute(&mut traversal, attribute).await?
                }
            }
        }

        if !traversal.stack.is_empty() {
            error!(open = traversal.stack.len(), "[INGEST][ERROR] Event stream ended inside a node");
            return Err(IngestError::UnclosedNodes {
                open: traversal.stack.len(),
            });
        }
        let root_pid = traversal.root_pid.ok_or_else(|| {
            error!("[INGEST][ERROR] Event stream contained no nodes");
            IngestError::EmptyTree
        })?;

        let mut report = traversal.report;
        report.root_pid = root_pid;
        info!(
            root_pid = %report.root_pid,
            objects = report.objects_created,
            datastreams = report.datastreams_written,
            relations = report.relations_written,
            "[INGEST] Tree ingest complete"
        );
        Ok(report)
    }

    async fn handle_node_begin(
        &self,
        traversal: &mut Traversal,
        name: String,
        is_data_file_node: bool,
    ) -> Result<()> {
        let dc_id = format!("{PATH_ID_PREFIX}{name}");
        let log_message = format!("Created object with DC id {dc_id}");
        let request = NewObject {
            old_ids: vec![dc_id.clone()],
            collections: self.collections.clone(),
            log_message: log_message.clone(),
        };
        let pid = match self.store.new_empty_object(request).await {
            Ok(pid) => {
                debug!(pid = %pid, dc_id = %dc_id, is_data_file_node, "[INGEST] {log_message}");
                pid
            }
            Err(e) => {
                error!(error = ?e, dc_id = %dc_id, "[INGEST][ERROR] new_empty_object failed");
                return Err(e.into());
            }
        };
        traversal.report.objects_created += 1;

        if traversal.root_pid.is_none() {
            info!(root_pid = %pid, name = %name, "[INGEST] Created root object");
            traversal.root_pid = Some(pid.clone());
        }

        let parent_pid = traversal.current_pid().map(str::to_owned);
        traversal.stack.push(Frame {
            pid: pid.clone(),
            name,
            is_data_file_node,
        });
        traversal.pending_children.insert(pid.clone(), Vec::new());

        if let Some(parent_pid) = parent_pid {
            if let Some(children) = traversal.pending_children.get_mut(&parent_pid) {
                children.push(Child {
                    pid,
                    is_data_file_node,
                });
            }
        }
        Ok(())
    }

    async fn handle_node_end(&self, traversal: &mut Traversal, name: String) -> Result<()> {
        let frame = match traversal.stack.pop() {
            Some(frame) => frame,
            None => {
                error!(name = %name, "[INGEST][ERROR] Node end without an open node");
                return Err(IngestError::UnbalancedNodeEnd { name });
            }
        };
        let children = traversal
            .pending_children
            .remove(&frame.pid)
            .unwrap_or_default();
        debug!(
            pid = %frame.pid,
            name = %frame.name,
            children = children.len(),
            "[INGEST] Closing node"
        );

        for child in &children {
            self.write_relation(traversal, &frame.pid, &self.relations.has_part, "hasPart", &child.pid)
                .await?;
            let has_file = match self.relations.has_file_rule {
                HasFileRule::ClosingNode => frame.is_data_file_node,
                HasFileRule::DataFileChild => child.is_data_file_node,
            };
            if has_file {
                self.write_relation(traversal, &frame.pid, &self.relations.has_file, "hasFile", &child.pid)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_relation(
        &self,
        traversal: &mut Traversal,
        subject: &str,
        predicate: &str,
        label: &str,
        object: &str,
    ) -> Result<()> {
        let comment = format!("Added relationship {subject} {label} {object}");
        let request = RelationWrite {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            comment: comment.clone(),
        };
        if let Err(e) = self.store.add_relation(request).await {
            error!(error = ?e, subject, object, predicate, "[INGEST][ERROR] add_relation failed");
            return Err(e.into());
        }
        debug!("[INGEST] {comment}");
        traversal.report.relations_written += 1;
        Ok(())
    }

    async fn handle_attribute(
        &self,
        traversal: &mut Traversal,
        mut attribute: AttributeEvent,
    ) -> Result<()> {
        if attribute.is_contents_marker() {
            debug!(name = %attribute.name, "[INGEST] Skipping contents attribute");
            traversal.report.attributes_skipped += 1;
            return Ok(());
        }

        let datastream = attribute.datastream_name().ok_or_else(|| {
            error!(name = %attribute.name, "[INGEST][ERROR] Cannot derive datastream name");
            IngestError::DatastreamName {
                name: attribute.name.clone(),
            }
        })?;
        let pid = match traversal.current_pid() {
            Some(pid) => pid.to_owned(),
            None => {
                error!(name = %attribute.name, "[INGEST][ERROR] Attribute outside of any node");
                return Err(IngestError::AttributeOutsideNode {
                    name: attribute.name,
                });
            }
        };
        debug!(name = %attribute.name, pid = %pid, datastream = %datastream, "[INGEST] Adding datastream");

        let content = attribute.read_to_string().map_err(|e| {
            error!(error = ?e, name = %attribute.name, "[INGEST][ERROR] Failed to read attribute content");
            IngestError::AttributeRead {
                name: attribute.name.clone(),
                source: e,
            }
        })?;
        let checksum = attribute.checksum.as_deref().map(str::to_lowercase);

        let request = DatastreamWrite {
            pid: pid.clone(),
            datastream: datastream.clone(),
            content,
            checksum,
            alternative_ids: vec![attribute.name.clone()],
            comment: DATASTREAM_COMMENT.to_string(),
        };
        if let Err(e) = self.store.modify_datastream_by_value(request).await {
            error!(error = ?e, pid = %pid, datastream = %datastream, "[INGEST][ERROR] modify_datastream_by_value failed");
            return Err(e.into());
        }
        traversal.report.datastreams_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockObjectStore, StoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store_with_sequential_pids() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        let counter = Arc::new(AtomicUsize::new(0));
        store.expect_new_empty_object().returning(move |_| {
            Ok(format!("uuid:{}", counter.fetch_add(1, Ordering::SeqCst)))
        });
        store
    }

    #[tokio::test]
    async fn single_node_returns_its_pid() {
        let mut store = store_with_sequential_pids();
        store.expect_add_relation().never();
        let ingester = TreeIngester::new(&store, vec![]);

        let events = vec![Ok(ParsingEvent::node_begin("B1", false)), Ok(ParsingEvent::node_end("B1"))];
        let report = ingester.ingest_with_report(events).await.unwrap();

        assert_eq!(report.root_pid, "uuid:0");
        assert_eq!(report.objects_created, 1);
        assert_eq!(report.relations_written, 0);
    }

    #[tokio::test]
    async fn node_end_without_begin_is_rejected() {
        let store = MockObjectStore::new();
        let ingester = TreeIngester::new(&store, vec![]);

        let err = ingester
            .ingest(vec![Ok(ParsingEvent::node_end("B1"))])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnbalancedNodeEnd { name } if name == "B1"));
    }

    #[tokio::test]
    async fn unclosed_node_is_rejected() {
        let store = store_with_sequential_pids();
        let ingester = TreeIngester::new(&store, vec![]);

        let err = ingester
            .ingest(vec![Ok(ParsingEvent::node_begin("B1", false))])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnclosedNodes { open: 1 }));
    }

    #[tokio::test]
    async fn empty_stream_is_rejected() {
        let store = MockObjectStore::new();
        let ingester = TreeIngester::new(&store, vec![]);

        let err = ingester.ingest(Vec::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyTree));
    }

    #[tokio::test]
    async fn attribute_outside_node_is_rejected() {
        let mut store = MockObjectStore::new();
        store.expect_modify_datastream_by_value().never();
        let ingester = TreeIngester::new(&store, vec![]);

        let events = vec![Ok(ParsingEvent::Attribute(AttributeEvent::from_bytes(
            "B1.xml", "<x/>", None,
        )))];
        let err = ingester.ingest(events).await.unwrap_err();
        assert!(matches!(err, IngestError::AttributeOutsideNode { .. }));
    }

    #[tokio::test]
    async fn source_failure_aborts() {
        let store = MockObjectStore::new();
        let ingester = TreeIngester::new(&store, vec![]);

        let events = vec![Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))];
        let err = ingester.ingest(events).await.unwrap_err();
        assert!(matches!(err, IngestError::Source(_)));
    }

    #[tokio::test]
    async fn custom_relation_types_are_used() {
        let mut store = store_with_sequential_pids();
        store
            .expect_add_relation()
            .withf(|req| req.predicate == "test:part")
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_add_relation()
            .withf(|req| req.predicate == "test:file")
            .times(1)
            .returning(|_| Ok(()));
        let ingester = TreeIngester::new(&store, vec![]).with_relations(RelationTypes {
            has_part: "test:part".into(),
            has_file: "test:file".into(),
            has_file_rule: HasFileRule::ClosingNode,
        });

        let events = vec![
            Ok(ParsingEvent::node_begin("B1", true)),
            Ok(ParsingEvent::node_begin("B1/a", false)),
            Ok(ParsingEvent::node_end("B1/a")),
            Ok(ParsingEvent::node_end("B1")),
        ];
        ingester.ingest(events).await.unwrap();
    }

    #[tokio::test]
    async fn store_error_is_wrapped_unchanged() {
        let mut store = MockObjectStore::new();
        store
            .expect_new_empty_object()
            .returning(|_| Err(StoreError::PidGenerator("exhausted".into())));
        let ingester = TreeIngester::new(&store, vec![]);

        let err = ingester
            .ingest(vec![Ok(ParsingEvent::node_begin("B1", false))])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::PidGenerator(msg)) if msg == "exhausted"));
    }
}
