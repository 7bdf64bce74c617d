//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `UploaderError` enum per categorizzare tutti gli errori possibili
//! - Fornisce messaggi di errore su una sola riga, adatti a stderr
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `ConfigUnreadable` / `ConfigInvalid`: file di configurazione mancante o invalido
//! - `DirectoryBusy`: un altro processo vivo sta lavorando la stessa directory
//! - `ConverterUnavailable` / `ConversionFailed`: cwebp mancante o fallito
//! - `UploadFailed`: upload del media senza `content_uri`
//! - `UploadRejected`: il messaggio nella room non è stato accettato
//! - `CleanupFailed`: file caricato ma impossibile da rimuovere
//! - `SupervisorToolMissing`: `systemctl` non disponibile
//!
//! ## Politica:
//! Gli errori di configurazione e lock sono fatali all'avvio. Gli errori di
//! upload, messaggio e cleanup sono fatali per l'intera esecuzione: nessun
//! retry, nessuno skip-and-continue.

use std::path::PathBuf;

/// Custom error types for directory uploads
#[derive(thiserror::Error, Debug)]
pub enum UploaderError {
    #[error("Cannot read configuration file {}: {source}", path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration field '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Directory {} is already being processed by PID {pid}", dir.display())]
    DirectoryBusy { dir: PathBuf, pid: u32 },

    #[error("Image converter not available: {0}")]
    ConverterUnavailable(String),

    #[error("Image conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Media upload failed: {0}")]
    UploadFailed(String),

    #[error("Room message rejected: {0}")]
    UploadRejected(String),

    #[error("Cleanup failed for {}: {reason}", path.display())]
    CleanupFailed { path: PathBuf, reason: String },

    #[error("Service manager not available: {0}")]
    SupervisorToolMissing(String),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image probing error: {0}")]
    Image(#[from] image::ImageError),
}

impl UploaderError {
    /// Shorthand for a `ConfigInvalid` naming the offending field
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = UploaderError> = std::result::Result<T, E>;
