//! # Matrix Directory Uploader Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Architettura dei moduli:
//! - `config`: parsing rigoroso del file di configurazione e override CLI
//! - `error`: tassonomia degli errori (`UploaderError`)
//! - `lock`: lock file con PID, un solo worker per directory
//! - `file_manager`: stream dei file (snapshot + watch) e classificazione immagini
//! - `image_processor`: conversione WebP con tool esterni e lettura metadata
//! - `matrix_client`: endpoint di upload media e invio messaggi
//! - `uploader`: pipeline per file, cleanup e orchestratore
//! - `service`: unit systemd utente per esecuzioni periodiche
//! - `progress`: spinner e statistiche
//! - `tool_resolver`, `utils`: helper condivisi
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use matrix_dir_uploader::{CliOverrides, Config, DirectoryUploader};
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load("uploader.conf".as_ref(), &CliOverrides::default()).await?;
//! let (_stop, stop_rx) = tokio::sync::broadcast::channel(1);
//! let stats = DirectoryUploader::new(&config)?.run(stop_rx).await?;
//! println!("{}", stats.format_summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod lock;
pub mod matrix_client;
pub mod progress;
pub mod service;
pub mod tool_resolver;
pub mod uploader;
pub mod utils;

pub use config::{CliOverrides, Config};
pub use error::UploaderError;
pub use uploader::DirectoryUploader;
