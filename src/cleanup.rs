//! Removes a previously ingested tree from the object store.
//!
//! An ingest run that fails halfway leaves its objects behind. Given the
//! batch label (the root node's name), [`clean_tree`] finds the root objects
//! through their `path:` identifier, follows `hasPart` relations level by level
//! and purges everything it reached, deepest level first.

use std::collections::HashSet;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::contract::{ObjectStore, StoreError};
use crate::ingest::{HAS_PART_RELATION, PATH_ID_PREFIX};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub label: String,
    pub roots: Vec<String>,
    /// Pids in the order they were purged.
    pub purged: Vec<String>,
}

/// Purge every object reachable through `hasPart` from the objects identified by `path:<label>`.
pub async fn clean_tree<S>(store: &S, label: &str) -> Result<CleanupReport, StoreError>
where
    S: ObjectStore + ?Sized,
{
    let identifier = format!("{PATH_ID_PREFIX}{label}");
    info!(identifier = %identifier, "[CLEAN] Looking up tree roots");
    let roots = store.find_objects_by_identifier(identifier).await?;
    let mut report = CleanupReport {
        label: label.to_string(),
        roots: roots.clone(),
        purged: Vec::new(),
    };
    if roots.is_empty() {
        info!(label, "[CLEAN] Nothing to clean");
        return Ok(report);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut discovered: Vec<String> = Vec::new();
    let mut level: Vec<String> = roots
        .into_iter()
        .filter(|pid| seen.insert(pid.clone()))
        .collect();

    while !level.is_empty() {
        discovered.extend(level.iter().cloned());
        let lookups = level
            .iter()
            .map(|pid| store.get_named_relations(pid.clone(), HAS_PART_RELATION.to_string()));
        // Fail fast on the first lookup error
        let children = try_join_all(lookups).await.map_err(|e| {
            error!(error = ?e, "[CLEAN][ERROR] Relation lookup failed");
            e
        })?;
        level = children
            .into_iter()
            .flatten()
            .filter(|pid| seen.insert(pid.clone()))
            .collect();
    }
    debug!(objects = discovered.len(), "[CLEAN] Tree discovered");

    for pid in discovered.into_iter().rev() {
        let comment = format!("Purged by cleanup of {label}");
        if let Err(e) = store.purge_object(pid.clone(), comment).await {
            error!(error = ?e, pid = %pid, "[CLEAN][ERROR] purge_object failed");
            return Err(e);
        }
        debug!(pid = %pid, "[CLEAN] Purged object");
        report.purged.push(pid);
    }

    info!(label, purged = report.purged.len(), "[CLEAN] Cleanup complete");
    Ok(report)
}
