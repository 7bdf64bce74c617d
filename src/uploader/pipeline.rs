//! # Upload Pipeline
//!
//! Worker per un singolo file accettato dal classifier:
//! conversione opzionale → metadata → upload del media → messaggio `m.image`.
//!
//! Il file originale non viene mai toccato qui: se la pipeline fallisce resta
//! dov'è, se riesce il cleanup è compito di `CleanupHandler`.

use crate::{
    config::Config,
    error::Result,
    file_manager::{extension_for_mime, CandidateFile},
    image_processor::{probe_metadata, WebpConverter},
    matrix_client::{ImageMessage, MatrixClient},
    utils::random_file_name,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of a confirmed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Original file, still in place
    pub source: PathBuf,
    pub content_uri: String,
    pub event_id: String,
    /// Name shown in the room
    pub file_name: String,
    /// Bytes actually sent (after conversion)
    pub bytes: u64,
    pub converted: bool,
}

/// Sends one image file to the configured room
pub struct UploadPipeline {
    client: MatrixClient,
    converter: Option<WebpConverter>,
}

impl UploadPipeline {
    pub fn new(client: MatrixClient, converter: Option<WebpConverter>) -> Self {
        Self { client, converter }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let converter = config
            .cwebp_convert
            .then(|| WebpConverter::new(config.cwebp_args.clone()));
        Ok(Self::new(MatrixClient::from_config(config)?, converter))
    }

    /// Run the whole pipeline for `candidate`.
    ///
    /// Success means the media upload returned a content URI and the room
    /// accepted the message. Any temporary WebP is gone when this returns.
    pub async fn upload(&self, candidate: &CandidateFile) -> Result<UploadReceipt> {
        let converted = match self.converter {
            Some(ref converter) if WebpConverter::needs_conversion(&candidate.mime_type) => {
                Some(converter.convert(&candidate.path, &candidate.mime_type).await?)
            }
            _ => None,
        };

        let (path, mime_type): (&Path, &str) = match converted {
            Some(ref image) => (&*image.path, image.mime_type.as_str()),
            None => (candidate.path.as_path(), candidate.mime_type.as_str()),
        };

        let metadata = probe_metadata(path, mime_type).await?;
        let data = tokio::fs::read(path).await?;
        debug!("Uploading {} ({}, {} bytes)", path.display(), mime_type, data.len());

        let content_uri = self.client.upload_media(data, mime_type).await?;
        debug!("Media stored at {}", content_uri);

        let file_name = random_file_name(extension_for_mime(mime_type));
        let message = ImageMessage::new(file_name.clone(), &metadata, &content_uri);
        let event_id = self.client.send_image(&message).await?;

        info!("📤 Sent {} as {} ({})", candidate.path.display(), file_name, event_id);
        Ok(UploadReceipt {
            source: candidate.path.clone(),
            content_uri,
            event_id,
            file_name,
            bytes: metadata.size,
            converted: converted.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploaderError;
    use crate::matrix_client::ClientOptions;
    use crate::tool_resolver::ToolPathResolver;
    use mockito::Matcher;
    use serde_json::json;
    use tempfile::TempDir;

    const ROOM: &str = "!pics:example.org";
    const SEND_PATH: &str = "/_matrix/client/v3/rooms/!pics:example.org/send/m.room.message";

    fn client(server: &mockito::Server) -> MatrixClient {
        let options = ClientOptions {
            no_proxy: true,
            ..Default::default()
        };
        MatrixClient::new(&server.url(), "tok", ROOM, &options).unwrap()
    }

    fn png_candidate(dir: &Path) -> CandidateFile {
        let path = dir.join("holiday.png");
        image::RgbImage::new(32, 24).save_with_format(&path, image::ImageFormat::Png).unwrap();
        CandidateFile {
            path,
            mime_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upload_without_conversion() {
        let temp_dir = TempDir::new().unwrap();
        let candidate = png_candidate(temp_dir.path());
        let size = std::fs::metadata(&candidate.path).unwrap().len();

        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/_matrix/media/v3/upload")
            .match_header("content-type", "image/png")
            .with_body(r#"{"content_uri":"mxc://example.org/pic"}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", SEND_PATH)
            .match_body(Matcher::PartialJson(json!({
                "msgtype": "m.image",
                "url": "mxc://example.org/pic",
                "info": {"w": 32, "h": 24, "mimetype": "image/png", "size": size}
            })))
            .with_body(r#"{"event_id":"$ev1"}"#)
            .create_async()
            .await;

        let pipeline = UploadPipeline::new(client(&server), None);
        let receipt = pipeline.upload(&candidate).await.unwrap();

        assert_eq!(receipt.event_id, "$ev1");
        assert_eq!(receipt.content_uri, "mxc://example.org/pic");
        assert_eq!(receipt.bytes, size);
        assert!(!receipt.converted);
        assert!(receipt.file_name.ends_with(".png"));
        assert!(candidate.path.exists());
        upload.assert_async().await;
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_webp_is_not_converted() {
        let temp_dir = TempDir::new().unwrap();
        // Declared type drives the decision; the bytes only need readable dimensions
        let path = temp_dir.path().join("already.webp");
        image::RgbImage::new(4, 4).save_with_format(&path, image::ImageFormat::Png).unwrap();
        let candidate = CandidateFile {
            path,
            mime_type: "image/webp".to_string(),
        };

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_matrix/media/v3/upload")
            .match_header("content-type", "image/webp")
            .with_body(r#"{"content_uri":"mxc://example.org/w"}"#)
            .create_async()
            .await;
        server
            .mock("POST", SEND_PATH)
            .with_body(r#"{"event_id":"$w"}"#)
            .create_async()
            .await;

        // An empty tools dir: any attempt to convert would fail
        let tools = TempDir::new().unwrap();
        let converter = WebpConverter::with_resolver(Vec::new(), ToolPathResolver::only_in(tools.path()));
        let pipeline = UploadPipeline::new(client(&server), Some(converter));

        let receipt = pipeline.upload(&candidate).await.unwrap();
        assert!(!receipt.converted);
        assert!(receipt.file_name.ends_with(".webp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converted_file_is_uploaded() {
        use std::os::unix::fs::PermissionsExt;

        let tools = TempDir::new().unwrap();
        let script = tools.path().join("cwebp");
        std::fs::write(
            &script,
            "#!/bin/sh\nwhile [ \"$1\" != \"-o\" ]; do in=\"$1\"; shift; done\ncp \"$in\" \"$2\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let candidate = png_candidate(temp_dir.path());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_matrix/media/v3/upload")
            .with_body(r#"{"content_uri":"mxc://example.org/c"}"#)
            .create_async()
            .await;
        server
            .mock("POST", SEND_PATH)
            .with_body(r#"{"event_id":"$c"}"#)
            .create_async()
            .await;

        let converter = WebpConverter::with_resolver(Vec::new(), ToolPathResolver::only_in(tools.path()));
        let pipeline = UploadPipeline::new(client(&server), Some(converter));

        let receipt = pipeline.upload(&candidate).await.unwrap();
        assert!(receipt.converted);
        assert_eq!(receipt.source, candidate.path);
        assert!(candidate.path.exists());
    }

    #[tokio::test]
    async fn test_rejected_message_fails_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let candidate = png_candidate(temp_dir.path());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_matrix/media/v3/upload")
            .with_body(r#"{"content_uri":"mxc://example.org/pic"}"#)
            .create_async()
            .await;
        server
            .mock("POST", SEND_PATH)
            .with_status(403)
            .with_body(r#"{"errcode":"M_FORBIDDEN","error":"not in room"}"#)
            .create_async()
            .await;

        let pipeline = UploadPipeline::new(client(&server), None);
        let result = pipeline.upload(&candidate).await;

        assert!(matches!(result, Err(UploaderError::UploadRejected(_))));
        assert!(candidate.path.exists());
    }
}
