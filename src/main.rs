//! Launcher core host
//!
//! Entry point that serves the launcher to a front-end process.
//!
//! # Overview
//!
//! The front-end spawns this binary and talks to it over stdio, one JSON
//! document per line:
//! - stdin: requests `{"id", "cmd", "args"}`
//! - stdout: replies `{"id", "result"}` or `{"id", "error"}`, plus job events
//!   as `{"event": {...}}` whenever the tracker changes
//!
//! Logs never go to stdout; they go to rotating files and optionally stderr.
//!
//! # Execution Flow
//!
//! 1. Parse flags, load `launcher.yaml` from the data directory
//! 2. Initialize logging → `<log_dir>/launcher.<date>.log`
//! 3. Build a current-thread tokio runtime; jobs interleave cooperatively at await points
//! 4. Load settings and create the [`Launcher`]
//! 5. Serve requests until stdin closes
//! 6. Flush pending settings and log metrics

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use launcher_core::{APP_NAME, ConfigManager, Launcher, VERSION, rpc};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Parser)]
#[command(name = "launcher-core", version, about = "Job orchestration host for the game launcher")]
struct Cli {
    /// Directory holding launcher.yaml and settings.json
    #[arg(long, default_value = "launcher-data")]
    data_dir: Utf8PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Mirror logs to stderr
    #[arg(long)]
    console: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.data_dir)?;
    let mut config = config_manager.load_launcher_config()?;
    config.debug |= cli.debug;

    // Keep the guard alive for the whole run so buffered log lines are written
    let _log_guard = launcher_core::logging::setup_logging(
        &config.log_dir,
        "launcher",
        config.log_max_files,
        config.debug,
        cli.console,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async move {
        let launcher = Arc::new(Launcher::new(config));
        serve(launcher).await
    })?;

    tracing::info!("{} shut down cleanly", APP_NAME);
    Ok(())
}

/// Answer requests from stdin until EOF
async fn serve(launcher: Arc<Launcher>) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            }
            .await;
            if let Err(e) = written {
                tracing::error!("Front-end went away: {}", e);
                break;
            }
        }
    });

    let mut events = launcher.tracker().subscribe();
    let event_tx = out_tx.clone();
    let event_forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_tx.send(rpc::event_line(&event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} job events for the front-end", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let launcher = launcher.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let reply = rpc::handle_line(&launcher, &line).await;
            let _ = out_tx.send(reply).await;
        });
    }

    tracing::info!("Input closed, shutting down");
    if launcher.tracker().is_running() {
        if let Some(snapshot) = launcher.wait_for_job().await {
            tracing::info!("Last job finished as {:?}", snapshot.overall_status);
        }
    }
    launcher.shutdown().await;

    event_forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
