//! # Image Processing Module
//!
//! Conversione opzionale in WebP e lettura dei metadata da inviare nella room.
//!
//! ## Conversione
//!
//! Come per l'ottimizzazione, la conversione è delegata interamente a tool esterni:
//!
//! | Input       | Tool       | Argomenti                                   |
//! |-------------|------------|---------------------------------------------|
//! | `image/gif` | `gif2webp` | `cwebp_args` + `<input> -o <tmp.webp>`      |
//! | altri       | `cwebp`    | `cwebp_args` + `<input> -o <tmp.webp>`      |
//! | `image/webp`| nessuno    | il file viene caricato così com'è           |
//!
//! L'output finisce in un file temporaneo (`tempfile::TempPath`) nella directory
//! temporanea di sistema, fuori dalla directory osservata. Il file viene rimosso
//! quando il `TempPath` viene droppato: a fine upload, su errore, o quando il
//! lavoro in corso viene cancellato da un segnale.
//!
//! ## Metadata
//!
//! Larghezza e altezza vengono lette dall'header con il crate `image` (senza
//! decodificare i pixel), la dimensione in byte dal filesystem.

use crate::error::{Result, UploaderError};
use crate::file_manager::detect_mime_type;
use crate::tool_resolver::ToolPathResolver;
use std::path::Path;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info};

/// Image properties sent along with the uploaded media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub mime_type: String,
}

/// Read width, height and byte size of `path`
pub async fn probe_metadata(path: &Path, mime_type: &str) -> Result<ImageMetadata> {
    let size = tokio::fs::metadata(path).await?.len();

    let owned = path.to_path_buf();
    let (width, height) = tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
        let reader = image::io::Reader::open(&owned)?.with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    })
    .await
    .map_err(|e| UploaderError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    debug!("Got dimensions {}x{} ({} bytes) for {}", width, height, size, path.display());
    Ok(ImageMetadata {
        width,
        height,
        size,
        mime_type: mime_type.to_string(),
    })
}

/// A WebP produced by the converter, deleted when dropped
#[derive(Debug)]
pub struct ConvertedImage {
    pub path: TempPath,
    pub mime_type: String,
}

/// Converts images to WebP with the external `cwebp` / `gif2webp` tools
#[derive(Debug, Clone)]
pub struct WebpConverter {
    extra_args: Vec<String>,
    resolver: ToolPathResolver,
}

impl WebpConverter {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self::with_resolver(extra_args, ToolPathResolver::new())
    }

    pub fn with_resolver(extra_args: Vec<String>, resolver: ToolPathResolver) -> Self {
        Self { extra_args, resolver }
    }

    /// True when the file must go through the converter before upload
    pub fn needs_conversion(mime_type: &str) -> bool {
        mime_type != "image/webp"
    }

    /// Tool used for a given input type
    pub fn tool_for(mime_type: &str) -> &'static str {
        if mime_type == "image/gif" {
            "gif2webp"
        } else {
            "cwebp"
        }
    }

    /// Convert `input` into a temporary WebP file
    pub async fn convert(&self, input: &Path, mime_type: &str) -> Result<ConvertedImage> {
        let tool_name = Self::tool_for(mime_type);
        let tool = self
            .resolver
            .check_tool_with_instructions(tool_name)
            .map_err(UploaderError::ConverterUnavailable)?;

        let output = tempfile::Builder::new()
            .prefix("matrix-uploader-")
            .suffix(".webp")
            .tempfile()?
            .into_temp_path();

        let mut args = self.extra_args.clone();
        args.extend(crate::args![input.display(), "-o", output.display()]);

        self.run_tool(&tool, &args).await?;

        let mime_type = detect_mime_type(&output).await?;
        info!(
            "🔄 Converted {} to WebP with {} ({})",
            input.display(),
            tool_name,
            mime_type
        );
        Ok(ConvertedImage { path: output, mime_type })
    }

    async fn run_tool(&self, tool: &Path, args: &[String]) -> Result<()> {
        let start_time = std::time::Instant::now();
        let output = Command::new(tool)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| UploaderError::ConverterUnavailable(format!("{}: {}", tool.display(), e)))?;
        let elapsed = start_time.elapsed();

        if output.status.success() {
            debug!("{} completed successfully in {:?}", tool.display(), elapsed);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(UploaderError::ConversionFailed(format!(
                "{} exited with {} after {:?}: {}",
                tool.display(),
                output.status,
                elapsed,
                stderr.trim()
            )))
        }
    }
}
