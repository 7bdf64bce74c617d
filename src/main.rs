//! # Matrix Uploader - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del logging con `tracing` su stderr (`RUST_LOG` o `--verbose`)
//! - Gestione di SIGINT/SIGTERM tramite un canale broadcast di stop
//! - Avvio dell'uploader o dei sottocomandi per i servizi systemd
//!
//! ## Exit code:
//! 0 a fine lavoro, 1 con una sola riga di diagnostica su stderr per qualsiasi
//! errore fatale.
//!
//! ## Esempio di utilizzo:
//! ```bash
//! matrix-uploader --config ~/.config/matrix-uploader/config --watch --timeout 5m
//! matrix-uploader -c ./photos.conf install-service --interval 1h
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use matrix_dir_uploader::{
    config::parse_timeout,
    service::{ServiceManager, ServiceUnit},
    CliOverrides, Config, DirectoryUploader,
};

#[derive(Parser)]
#[command(name = "matrix-uploader", version)]
#[command(about = "Upload the images of a directory to a Matrix room, one at a time")]
struct Args {
    /// Configuration file (default: $XDG_CONFIG_HOME/matrix-uploader/config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Delay between uploads, e.g. 30, 30s, 5m, 2h, 1d
    #[arg(short, long)]
    timeout: Option<String>,

    /// Keep watching the directory for new files
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    watch: Option<bool>,

    /// Exit after the first uploaded file
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    one_shot: Option<bool>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Install a systemd user timer running one upload per interval
    InstallService {
        /// Interval between runs (default: the configured timeout)
        #[arg(long)]
        interval: Option<String>,
    },
    /// Remove the systemd user timer for this configuration
    RemoveService,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("matrix-uploader: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e).replace('\n', " ");
            eprintln!("matrix-uploader: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,matrix_dir_uploader={level},matrix_uploader={level}")));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path().context("Could not determine the default configuration path")?,
    };

    match args.command {
        Some(Command::InstallService { interval }) => install_service(config_path, interval).await,
        Some(Command::RemoveService) => {
            let config_path = tokio::fs::canonicalize(&config_path).await.unwrap_or(config_path);
            ServiceManager::new()?.remove(&config_path).await
        }
        None => {
            let overrides = CliOverrides {
                timeout: args.timeout,
                watch: args.watch,
                one_shot: args.one_shot,
            };
            let config = Config::load(&config_path, &overrides).await?;

            let (stop_tx, stop_rx) = broadcast::channel(1);
            spawn_signal_handler(stop_tx);

            let stats = DirectoryUploader::new(&config)?.run(stop_rx).await?;
            info!("🎉 Done: {} uploaded", stats.files_uploaded);
            Ok(())
        }
    }
}

async fn install_service(config_path: PathBuf, interval: Option<String>) -> Result<()> {
    // Validates the configuration before anything is written
    let config = Config::load(&config_path, &CliOverrides::default()).await?;
    let config_path = tokio::fs::canonicalize(&config_path).await?;

    let interval = match interval {
        Some(value) => parse_timeout(&value)
            .with_context(|| format!("Invalid interval '{}': expected a number with optional s/m/h/d suffix", value))?,
        None => config.timeout,
    };

    let executable = std::env::current_exe().context("Could not locate the running executable")?;
    let unit = ServiceUnit::new(executable, config_path, interval);
    let timer = ServiceManager::new()?.install(&unit).await?;
    println!("{}", timer.display());
    Ok(())
}

fn spawn_signal_handler(stop: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, finishing up");
        let _ = stop.send(());
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
