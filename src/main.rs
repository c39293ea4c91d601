use anyhow::{Context, Result};
use clap::Parser;
use email_triage::cli::{self, Cli, Commands, ProgressReporter};
use email_triage::config::Config;
use email_triage::hybrid::HybridClassifier;
use email_triage::server;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn lock_buffer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lock_buffer()?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.lock_buffer()?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

fn init_tracing(verbose: bool, json: bool, multi: Arc<MultiProgress>) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("email_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("email_triage=info,warn"))
    };
    let make_writer = MultiProgressMakeWriter { multi };

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        eprintln!("\nFor help, run: email-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logging comes first so the config load can report what it does
    let multi_progress = Arc::new(MultiProgress::new());
    let logging = Config::logging_hint(&cli.config).await;
    init_tracing(cli.verbose, logging.json, Arc::clone(&multi_progress));

    // init-config must work even when the existing file is broken
    let config = match cli.command {
        Commands::InitConfig { .. } => None,
        _ => Some(
            Config::load(&cli.config)
                .await
                .with_context(|| format!("loading {}", cli.config.display()))?,
        ),
    };

    let Some(mut config) = config else {
        if let Commands::InitConfig { output, force } = &cli.command {
            if output.exists() && !*force {
                anyhow::bail!(
                    "{} already exists; use --force to overwrite",
                    output.display()
                );
            }
            Config::create_example(output).await?;
            println!("Wrote example configuration to {}", output.display());
        }
        return Ok(());
    };

    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }

    let classifier = Arc::new(HybridClassifier::from_config(&config)?);

    match &cli.command {
        Commands::Serve { .. } => {
            tracing::info!(
                "Starting API on {}:{}",
                config.server.host,
                config.server.port
            );
            server::serve(classifier, &config.server).await?;
        }

        Commands::Classify { file } => {
            cli::classify_file(&classifier, file).await?;
        }

        Commands::Batch {
            file,
            batch_size,
            output,
        } => {
            let reporter = ProgressReporter::new(Arc::clone(&multi_progress));
            let batch_size = batch_size.unwrap_or(config.classification.batch_size);
            let stats =
                cli::run_batch(&classifier, &reporter, file, batch_size, output.as_deref())
                    .await?;
            print!("{}", cli::format_stats(&stats));
        }

        Commands::Stats { store } => {
            let stats = cli::show_store_stats(store).await?;
            print!("{}", cli::format_stats(&stats));
        }

        Commands::Status => {
            let status = classifier.get_status().await;
            print!("{}", cli::format_status(&status));
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}
