//! # Uploader Module
//!
//! Separa il lavoro in sottomoduli:
//! - `directory_uploader`: orchestratore (lock, stream, delay, one-shot, shutdown)
//! - `pipeline`: conversione, metadata, upload e messaggio per un singolo file
//! - `cleanup`: destinazione finale del file originale dopo un upload riuscito

pub mod cleanup;
pub mod directory_uploader;
pub mod pipeline;

pub use cleanup::{CleanupHandler, Disposal};
pub use directory_uploader::DirectoryUploader;
pub use pipeline::{UploadPipeline, UploadReceipt};
