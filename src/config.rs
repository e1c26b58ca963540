// doms-ingester/src/config.rs

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ingest::HasFileRule;
use crate::tree_iterator::ClassificationPolicy;

/// Fully merged configuration for one ingester process.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub fedora: FedoraSettings,
    pub credentials: Credentials,
    /// Collections every created object joins.
    pub collections: Vec<String>,
    pub classification: ClassificationPolicy,
    pub has_file_rule: HasFileRule,
}

impl IngesterConfig {
    pub fn trace_loaded(&self) {
        info!(
            server_url = %self.fedora.server_url,
            pid_generator = self.fedora.pid_generator_url.as_deref().unwrap_or("uuid"),
            collections_count = self.collections.len(),
            has_file_rule = ?self.has_file_rule,
            "Loaded IngesterConfig"
        );
        debug!(?self, "IngesterConfig loaded (full debug)");
    }
}

/// Where the repository lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FedoraSettings {
    /// Base URL of the Fedora REST API, e.g. `http://localhost:7880/fedora`.
    pub server_url: String,
    /// Base URL of the DOMS PID generator. Without one, pids are `uuid:<v4>`.
    #[serde(default)]
    pub pid_generator_url: Option<String>,
}

/// Repository login, always taken from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
