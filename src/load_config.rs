//! `load_config` module: Loads a static YAML config and injects repository credentials
//! from the environment, producing the internal [`IngesterConfig`].
//!
//! This module is the only place where user-supplied YAML is parsed.
//!
//! # Errors
//! All errors use `anyhow::Error` and are surfaced at the CLI boundary.

use crate::config::{Credentials, FedoraSettings, IngesterConfig};
use crate::ingest::HasFileRule;
use crate::tree_iterator::ClassificationPolicy;
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const USERNAME_VAR: &str = "DOMS_USERNAME";
pub const PASSWORD_VAR: &str = "DOMS_PASSWORD";

#[derive(Deserialize)]
struct StaticConfig {
    fedora: FedoraSettings,
    #[serde(default)]
    collections: Vec<String>,
    #[serde(default)]
    classification: Option<ClassificationSection>,
    #[serde(default)]
    has_file_rule: HasFileRule,
}

#[derive(Deserialize)]
struct ClassificationSection {
    #[serde(default)]
    data_file_suffixes: Option<Vec<String>>,
    #[serde(default)]
    checksum_suffix: Option<String>,
}

impl ClassificationSection {
    fn into_policy(self) -> ClassificationPolicy {
        let defaults = ClassificationPolicy::newspaper();
        ClassificationPolicy {
            data_file_suffixes: self
                .data_file_suffixes
                .unwrap_or(defaults.data_file_suffixes),
            checksum_suffix: self.checksum_suffix.unwrap_or(defaults.checksum_suffix),
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects required env vars for secrets.
/// Returns a fully merged IngesterConfig or an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngesterConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if static_conf.fedora.server_url.trim().is_empty() {
        error!(config_path = ?path_ref, "fedora.server_url is empty");
        anyhow::bail!("fedora.server_url must not be empty");
    }

    let credentials = Credentials {
        username: required_env(USERNAME_VAR)?,
        password: required_env(PASSWORD_VAR)?,
    };

    let classification = static_conf
        .classification
        .map(ClassificationSection::into_policy)
        .unwrap_or_default();
    info!(?classification, "Selected classification policy from config");

    let config = IngesterConfig {
        fedora: static_conf.fedora,
        credentials,
        collections: static_conf.collections,
        classification,
        has_file_rule: static_conf.has_file_rule,
    };
    config.trace_loaded();
    Ok(config)
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) => {
            info!(var = name, "Found in env");
            Ok(value)
        }
        Err(e) => {
            error!(error = ?e, var = name, "Environment variable not set");
            Err(anyhow::anyhow!("{name} environment variable not set: {e}"))
        }
    }
}
