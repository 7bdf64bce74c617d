//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il feedback visivo e le statistiche di upload.
//!
//! ## Responsabilità:
//! - Spinner `indicatif` per l'upload in corso (il numero totale di file non è noto
//!   in watch mode, quindi niente barra con percentuale)
//! - Tracking statistiche cumulative (file caricati, convertiti, byte inviati, scartati)
//! - Riepilogo finale su una riga
//!
//! Lo spinner viene nascosto quando stderr non è un terminale (es. sotto systemd).
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] 12 uploaded | ⬆️ IMG_0042.jpg (2.31 MB)
//! ```

use crate::file_manager::format_size;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Spinner shown while the uploader is running
#[derive(Clone)]
pub struct UploadProgress {
    bar: ProgressBar,
}

impl UploadProgress {
    /// Create a spinner on stderr, hidden when stderr is not a terminal
    pub fn new() -> Self {
        if !std::io::stderr().is_terminal() {
            return Self::hidden();
        }

        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} uploaded | {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A progress reporter that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Show what is being worked on
    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Count one completed upload
    pub fn uploaded(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one uploader run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadStats {
    pub files_seen: usize,
    pub files_uploaded: usize,
    pub files_converted: usize,
    pub files_ignored: usize,
    pub bytes_uploaded: u64,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_uploaded(&mut self, bytes: u64, converted: bool) {
        self.files_seen += 1;
        self.files_uploaded += 1;
        self.bytes_uploaded += bytes;
        if converted {
            self.files_converted += 1;
        }
    }

    pub fn add_ignored(&mut self) {
        self.files_seen += 1;
        self.files_ignored += 1;
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Seen: {} files | Uploaded: {} ({} converted) | Ignored: {} | Total sent: {}",
            self.files_seen,
            self.files_uploaded,
            self.files_converted,
            self.files_ignored,
            format_size(self.bytes_uploaded)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let mut stats = UploadStats::new();
        stats.add_uploaded(1024, true);
        stats.add_uploaded(2048, false);
        stats.add_ignored();

        assert_eq!(stats.files_seen, 3);
        assert_eq!(stats.files_uploaded, 2);
        assert_eq!(stats.files_converted, 1);
        assert_eq!(stats.files_ignored, 1);
        assert_eq!(stats.bytes_uploaded, 3072);
    }

    #[test]
    fn test_summary_format() {
        let mut stats = UploadStats::new();
        stats.add_uploaded(2048, true);
        let summary = stats.format_summary();

        assert!(summary.contains("Uploaded: 1 (1 converted)"));
        assert!(summary.contains("Ignored: 0"));
        assert!(summary.contains(&format_size(2048)));
    }

    #[test]
    fn test_hidden_progress_is_silent() {
        let progress = UploadProgress::hidden();
        progress.set_message("working");
        progress.uploaded("done");
        progress.finish("bye");
    }
}
