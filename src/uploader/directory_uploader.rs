//! # Directory Uploader Main Orchestrator
//!
//! Orchestratore principale: un solo worker sequenziale per directory.
//!
//! ## Flusso:
//! 1. acquisisce il lock della directory (`DirectoryBusy` se c'è già un worker vivo)
//! 2. apre lo stream dei file (snapshot mescolato, poi eventuale watch)
//! 3. per ogni path: classifier → attesa del timeout → pipeline → cleanup
//! 4. termina quando lo stream finisce, dopo il primo file in one-shot,
//!    o quando arriva un segnale di stop
//!
//! ## Cancellazione:
//! Lo stop interrompe l'attesa e la pipeline in corso (il file temporaneo della
//! conversione viene rimosso dal drop). Il cleanup dopo un upload confermato
//! non viene mai interrotto.

use crate::{
    config::Config,
    error::Result,
    file_manager::{format_size, FileStream, ImageClassifier},
    lock::DirectoryLock,
    progress::{UploadProgress, UploadStats},
    uploader::{cleanup::CleanupHandler, pipeline::UploadPipeline},
};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Uploads the contents of one directory, one file at a time
pub struct DirectoryUploader {
    dir: PathBuf,
    watch: bool,
    one_shot: bool,
    timeout: Duration,
    pipeline: UploadPipeline,
    cleanup: CleanupHandler,
    progress: UploadProgress,
}

impl DirectoryUploader {
    pub fn new(config: &Config) -> Result<Self> {
        let pipeline = UploadPipeline::from_config(config)?;
        let cleanup = CleanupHandler::new(config.move_to.clone());
        Ok(Self::with_parts(config, pipeline, cleanup))
    }

    /// Build from explicit collaborators
    pub fn with_parts(config: &Config, pipeline: UploadPipeline, cleanup: CleanupHandler) -> Self {
        Self {
            dir: config.dir.clone(),
            watch: config.watch,
            one_shot: config.one_shot,
            timeout: config.timeout,
            pipeline,
            cleanup,
            progress: UploadProgress::new(),
        }
    }

    pub fn with_progress(mut self, progress: UploadProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Run until the file stream ends, one-shot completes or `stop` fires
    pub async fn run(&self, mut stop: broadcast::Receiver<()>) -> Result<UploadStats> {
        DirectoryLock::new(&self.dir).acquire().await?;

        let mut files = FileStream::open(&self.dir, self.watch)?;
        let mut stats = UploadStats::new();
        let mut last_upload: Option<Instant> = None;

        info!(
            "🚀 Uploading from {} (delay {:?}, watch: {}, one-shot: {})",
            self.dir.display(),
            self.timeout,
            self.watch,
            self.one_shot
        );

        loop {
            let path = tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => {
                    info!("🛑 Stop requested, shutting down");
                    break;
                }
                next = files.next() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            // Rejected paths skip the delay and do not count as the one-shot file
            let Some(mut candidate) = ImageClassifier::classify(&path).await else {
                stats.add_ignored();
                continue;
            };

            if let Some(resume_at) = last_upload.map(|last| last + self.timeout) {
                if Instant::now() < resume_at {
                    debug!("Waiting {:?} before the next upload", resume_at - Instant::now());
                    self.progress.set_message("waiting");
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut stop) => {
                            info!("🛑 Stop requested while waiting, shutting down");
                            break;
                        }
                        _ = tokio::time::sleep_until(resume_at) => {}
                    }

                    // The file may have been removed or replaced during the wait
                    match ImageClassifier::classify(&path).await {
                        Some(fresh) => candidate = fresh,
                        None => {
                            debug!("Skipping {}: gone while waiting", path.display());
                            stats.add_ignored();
                            continue;
                        }
                    }
                }
            }

            let label = candidate
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.progress.set_message(&format!("⬆️ {}", label));

            let receipt = tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => {
                    info!("🛑 Stop requested, abandoning {}", candidate.path.display());
                    break;
                }
                result = self.pipeline.upload(&candidate) => result?,
            };

            self.cleanup.dispose(&receipt.source).await?;

            stats.add_uploaded(receipt.bytes, receipt.converted);
            self.progress
                .uploaded(&format!("✅ {} ({})", label, format_size(receipt.bytes)));
            last_upload = Some(Instant::now());

            if self.one_shot {
                debug!("One-shot mode: stopping after the first upload");
                break;
            }
        }

        self.progress.finish(&stats.format_summary());
        info!("{}", stats.format_summary());
        Ok(stats)
    }
}

/// Resolves when a stop is broadcast; never resolves once every sender is gone
async fn stop_requested(stop: &mut broadcast::Receiver<()>) {
    match stop.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
    }
}
