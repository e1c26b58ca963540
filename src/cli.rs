use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::cleanup::clean_tree;
use crate::fedora::FedoraClient;
use crate::ingest::{RelationTypes, TreeIngester};
use crate::load_config::load_config;
use crate::tree_iterator::FileSystemTreeIterator;

/// CLI for doms-ingester: load newspaper batches into DOMS.
#[derive(Parser)]
#[clap(
    name = "doms-ingester",
    version,
    about = "Ingest newspaper digitisation batches into a DOMS/Fedora repository"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a batch directory, creating one object per node
    Ingest {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Root directory of the batch
        batch: PathBuf,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Purge a previously ingested batch, identified by its root directory name
    Clean {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Name of the batch root, e.g. B400022028241-RT1
        #[clap(long)]
        label: String,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Ingest {
            config,
            batch,
            json,
        } => ingest_batch(&config, &batch, json).await,
        Commands::Clean {
            config,
            label,
            json,
        } => clean_batch(&config, &label, json).await,
    };

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!(success = result.is_ok(), "ingester run finished");
    });

    // Explicit process exit only in main(), not in run()
    result
}

async fn ingest_batch(config: &Path, batch: &Path, json: bool) -> Result<()> {
    let config = load_config(config)?;
    let client = FedoraClient::new(config.fedora.clone(), config.credentials.clone())?;
    let events = FileSystemTreeIterator::new(batch, config.classification.clone());
    let ingester = TreeIngester::new(&client, config.collections.clone()).with_relations(RelationTypes {
        has_file_rule: config.has_file_rule,
        ..RelationTypes::default()
    });

    println!("Ingest of {} starting...", batch.display());
    match ingester.ingest_with_report(events).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Ingest complete.\nReport:");
                println!("{:#?}", report);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("[ERROR] Ingest failed: {}", e);
            if let Some(label) = batch.file_name() {
                eprintln!(
                    "Objects created before the failure remain; remove them with `doms-ingester clean --label {}`",
                    label.to_string_lossy()
                );
            }
            Err(anyhow::Error::new(e))
        }
    }
}

async fn clean_batch(config: &Path, label: &str, json: bool) -> Result<()> {
    let config = load_config(config)?;
    let client = FedoraClient::new(config.fedora.clone(), config.credentials.clone())?;

    println!("Cleanup of {label} starting...");
    match clean_tree(&client, label).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Cleanup complete.\nReport:");
                println!("{:#?}", report);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("[ERROR] Cleanup failed: {}", e);
            Err(anyhow::Error::new(e))
        }
    }
}
