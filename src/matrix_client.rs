//! Matrix client for the two endpoints the uploader needs.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication:
//! - `POST /_matrix/media/v3/upload` returns a `content_uri` (`mxc://…`)
//! - `POST /_matrix/client/v3/rooms/{room_id}/send/m.room.message` posts the `m.image` event
//!
//! A message is only considered delivered when the response body has the exact
//! shape `{"event_id":"$…"}`. A differently formatted success body, even if valid
//! JSON, counts as a rejection.

use crate::config::Config;
use crate::error::{Result, UploaderError};
use crate::image_processor::ImageMetadata;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const UPLOAD_PATH: &str = "/_matrix/media/v3/upload";
const EVENT_PREFIX: &str = "{\"event_id\":\"$";
const EVENT_SUFFIX: &str = "\"}";

/// HTTP client settings derived from curl-style `curl_args`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    pub headers: Vec<(String, String)>,
    pub insecure: bool,
    pub proxy: Option<String>,
    pub no_proxy: bool,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Translate the curl options that have a `reqwest` equivalent.
    ///
    /// Anything else is logged and ignored.
    pub fn from_curl_args(args: &[String]) -> Self {
        let mut options = Self::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
                _ => (arg.as_str(), None),
            };

            match flag {
                "-k" | "--insecure" => options.insecure = true,
                "-H" | "--header" | "-x" | "--proxy" | "--noproxy" | "-A" | "--user-agent" | "-m"
                | "--max-time" | "--connect-timeout" => {
                    let Some(value) = inline.or_else(|| iter.next().cloned()) else {
                        warn!("Ignoring curl argument '{}' without a value", flag);
                        continue;
                    };
                    options.apply_valued(flag, value);
                }
                other => warn!("Ignoring unsupported curl argument '{}'", other),
            }
        }

        options
    }

    fn apply_valued(&mut self, flag: &str, value: String) {
        match flag {
            "-H" | "--header" => match value.split_once(':') {
                Some((name, val)) => self.headers.push((name.trim().to_string(), val.trim().to_string())),
                None => warn!("Ignoring malformed header '{}'", value),
            },
            "-x" | "--proxy" => self.proxy = Some(value),
            "--noproxy" => self.no_proxy = value.trim() == "*",
            "-A" | "--user-agent" => self.user_agent = Some(value),
            "-m" | "--max-time" | "--connect-timeout" => match value.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    let duration = Duration::from_secs_f64(secs);
                    if flag == "--connect-timeout" {
                        self.connect_timeout = Some(duration);
                    } else {
                        self.timeout = Some(duration);
                    }
                }
                _ => warn!("Ignoring invalid {} value '{}'", flag, value),
            },
            _ => {}
        }
    }
}

/// Matrix client bound to one homeserver and one room
#[derive(Debug, Clone)]
pub struct MatrixClient {
    http: reqwest::Client,
    base_url: String,
    room_id: String,
}

impl MatrixClient {
    /// Creates a new client with the given access token
    pub fn new(base_url: &str, token: &str, room_id: &str, options: &ClientOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| UploaderError::invalid("token", "not usable in an HTTP header"))?,
        );
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UploaderError::invalid("curl_args", format!("bad header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| UploaderError::invalid("curl_args", format!("bad header value '{value}'")))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout.unwrap_or(Duration::from_secs(30)));
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(ref agent) = options.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        if options.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if options.no_proxy {
            builder = builder.no_proxy();
        } else if let Some(ref proxy) = options.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| UploaderError::invalid("curl_args", format!("bad proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            room_id: room_id.to_string(),
        })
    }

    /// Client for the homeserver and room named in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let options = ClientOptions::from_curl_args(&config.curl_args);
        Self::new(&config.homeserver_url(), &config.token, &config.room_id, &options)
    }

    /// Upload raw media bytes and return the `mxc://` content URI
    pub async fn upload_media(&self, data: Vec<u8>, mime_type: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, UPLOAD_PATH);
        let size = data.len();
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, mime_type)
            .body(data)
            .send()
            .await
            .map_err(|e| UploaderError::UploadFailed(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| UploaderError::UploadFailed(e.to_string()))?;
        debug!("Upload of {} bytes answered {}: {}", size, status, body.trim());

        if !status.is_success() {
            return Err(UploaderError::UploadFailed(format!("HTTP {}: {}", status, body.trim())));
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| UploaderError::UploadFailed(format!("unexpected response '{}': {}", body.trim(), e)))?;
        match parsed.content_uri {
            Some(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(UploaderError::UploadFailed(format!("no content_uri in '{}'", body.trim()))),
        }
    }

    /// Post an `m.image` event to the room and return its event id
    pub async fn send_image(&self, message: &ImageMessage) -> Result<String> {
        let url = self.message_url()?;
        let resp = self
            .http
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| UploaderError::UploadRejected(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| UploaderError::UploadRejected(e.to_string()))?;
        debug!("Message send answered {}: {}", status, body.trim());

        event_id_from_response(&body)
            .map(str::to_string)
            .ok_or_else(|| UploaderError::UploadRejected(format!("HTTP {}: {}", status, body.trim())))
    }

    /// Room message endpoint, with the room id percent-encoded as one path segment
    fn message_url(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| UploaderError::invalid("server", format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| UploaderError::invalid("server", format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3", "rooms", self.room_id.as_str(), "send", "m.room.message"]);
        Ok(url)
    }
}

/// Event id of a send response, only if it has the exact shape `{"event_id":"$…"}`
pub fn event_id_from_response(body: &str) -> Option<&str> {
    let body = body.trim();
    let id = body.strip_prefix(EVENT_PREFIX)?.strip_suffix(EVENT_SUFFIX)?;
    if id.is_empty() {
        return None;
    }
    // include the leading '$'
    let start = EVENT_PREFIX.len() - 1;
    Some(&body[start..start + 1 + id.len()])
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    content_uri: Option<String>,
}

/// `m.room.message` content for an image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMessage {
    pub msgtype: String,
    pub body: String,
    pub info: ImageInfo,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub w: u32,
    pub h: u32,
    pub mimetype: String,
    pub size: u64,
    pub thumbnail_url: String,
    pub thumbnail_info: ThumbnailInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailInfo {
    pub w: u32,
    pub h: u32,
    pub mimetype: String,
    pub size: u64,
}

impl ImageMessage {
    /// Build the message; the thumbnail fields mirror the full image
    pub fn new(file_name: String, metadata: &ImageMetadata, content_uri: &str) -> Self {
        Self {
            msgtype: "m.image".to_string(),
            body: file_name,
            info: ImageInfo {
                w: metadata.width,
                h: metadata.height,
                mimetype: metadata.mime_type.clone(),
                size: metadata.size,
                thumbnail_url: content_uri.to_string(),
                thumbnail_info: ThumbnailInfo {
                    w: metadata.width,
                    h: metadata.height,
                    mimetype: metadata.mime_type.clone(),
                    size: metadata.size,
                },
            },
            url: content_uri.to_string(),
        }
    }
}
