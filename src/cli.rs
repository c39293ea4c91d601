//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::hybrid::{Classified, HybridClassifier, ProgressCallback};
use crate::models::{EmailRecord, ServiceStatus};
use crate::stats::{get_classification_stats, ClassificationStats};
use crate::store::ClassificationStore;

#[derive(Parser, Debug)]
#[command(name = "email-triage")]
#[command(version)]
#[command(about = "Urgency classification for an institutional inbox", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Classify a single email read from a JSON file
    Classify {
        /// JSON file holding one email record
        file: PathBuf,
    },

    /// Classify a JSON array of emails
    Batch {
        /// JSON file holding an array of email records
        file: PathBuf,

        /// Emails per group (defaults to classification.batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Result store to update with the classifications
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show statistics for a result store
    Stats {
        /// Result store written by `batch --output`
        store: PathBuf,
    },

    /// Show which classifiers are available
    Status,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress bars sharing one terminal area with log output
pub struct ProgressReporter {
    multi: Arc<MultiProgress>,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: Arc<MultiProgress>) -> Self {
        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self { multi, bar_style }
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        TriageError::IoError(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Load a JSON array of records, or a single record
pub async fn read_records(path: &Path) -> Result<Vec<EmailRecord>> {
    let value: serde_json::Value = read_json(path).await?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

pub async fn classify_file(classifier: &HybridClassifier, file: &Path) -> Result<()> {
    let record: EmailRecord = read_json(file).await?;
    let classified = classifier.classify_sourced(&record).await;

    info!(source = %classified.source, "Classified {}", file.display());
    println!("{}", serde_json::to_string_pretty(&classified.result)?);
    Ok(())
}

/// Classify a file of records; Ctrl-C stops between records
pub async fn run_batch(
    classifier: &HybridClassifier,
    reporter: &ProgressReporter,
    file: &Path,
    batch_size: usize,
    output: Option<&Path>,
) -> Result<ClassificationStats> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current email");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome =
        run_batch_until(classifier, reporter, file, batch_size, output, cancel_rx).await;
    ctrl_c.abort();
    outcome
}

/// Classify a file of records until `cancel` turns true
///
/// With `output` set, the records classified before a cancellation are
/// still written to the store.
pub async fn run_batch_until(
    classifier: &HybridClassifier,
    reporter: &ProgressReporter,
    file: &Path,
    batch_size: usize,
    output: Option<&Path>,
    cancel: watch::Receiver<bool>,
) -> Result<ClassificationStats> {
    let records = read_records(file).await?;
    info!(
        "Classifying {} emails in groups of {}",
        records.len(),
        batch_size
    );

    let pb = reporter.add_progress_bar(records.len() as u64, "Classifying");
    let progress: ProgressCallback = {
        let pb = pb.clone();
        Arc::new(move || pb.inc(1))
    };

    let mut classified = Vec::with_capacity(records.len());
    let outcome = classifier
        .classify_records_into(&records, batch_size, cancel, Some(progress), &mut classified)
        .await;
    pb.finish_and_clear();

    if let Some(path) = output {
        if outcome.is_ok() || !classified.is_empty() {
            store_results(path, &records, &classified).await?;
        }
    }
    outcome?;

    let results: Vec<_> = classified.into_iter().map(|c| c.result).collect();
    Ok(get_classification_stats(&results))
}

/// Upsert results into the store at `path`; `classified` pairs with the
/// leading records
async fn store_results(
    path: &Path,
    records: &[EmailRecord],
    classified: &[Classified],
) -> Result<()> {
    let mut store = ClassificationStore::load(path).await?;
    let mut replaced = 0;
    for (record, item) in records.iter().zip(classified.iter().cloned()) {
        if store.upsert(record, item) {
            replaced += 1;
        }
    }
    store.save(path).await?;
    println!(
        "Stored {} results in {} ({} replaced)",
        classified.len(),
        path.display(),
        replaced
    );
    Ok(())
}

pub async fn show_store_stats(path: &Path) -> Result<ClassificationStats> {
    if !path.exists() {
        return Err(TriageError::StoreError(format!(
            "{} does not exist",
            path.display()
        )));
    }
    Ok(ClassificationStore::load(path).await?.stats())
}

/// Human-readable summary of a stats aggregate
pub fn format_stats(stats: &ClassificationStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total classified: {}\n", stats.total_classified));
    if stats.total_classified == 0 {
        return out;
    }

    out.push_str("\nBy urgency:\n");
    for (urgency, count) in &stats.by_urgency {
        out.push_str(&format!("  {:<15} {:>5}\n", urgency.as_str(), count));
    }
    out.push_str("\nBy sender type:\n");
    for (sender, count) in &stats.by_sender_type {
        out.push_str(&format!("  {:<15} {:>5}\n", sender.as_str(), count));
    }
    out.push_str("\nBy email type:\n");
    for (email_type, count) in &stats.by_email_type {
        out.push_str(&format!("  {:<15} {:>5}\n", email_type.as_str(), count));
    }

    out.push_str(&format!(
        "\nAverage confidence: {:.3}\nHigh confidence: {} ({:.1}%)\nRequire immediate action: {}\n",
        stats.avg_confidence,
        stats.high_confidence_count,
        stats.high_confidence_percentage,
        stats.requires_immediate_action
    ));
    out
}

pub fn format_status(status: &ServiceStatus) -> String {
    let mut out = format!(
        "Service: {}\nPrimary classifier: {}\nRule fallback: {}\n",
        status.service,
        status.primary_service,
        if status.rule_fallback_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    if status.providers.is_empty() {
        out.push_str("No LLM providers configured\n");
    }
    for provider in &status.providers {
        out.push_str(&format!(
            "  {:<8} {:<20} circuit {:?}\n",
            provider.name, provider.model, provider.circuit_state
        ));
    }
    out
}
