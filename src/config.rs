//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` immutabile, costruita una sola volta all'avvio
//! - Parsing rigoroso di un file `key=value` (solo dati, mai codice eseguito)
//! - Validazione completa: ogni errore nomina il campo colpevole
//! - Applica gli override da command line per timeout, watch e one-shot
//!
//! ## Formato del file:
//! ```text
//! # commento
//! token=syt_abc123
//! server=matrix.example.org
//! room_id='!abcDEF:example.org'
//! dir=~/Pictures/outbox
//! timeout=5m
//! watch=true
//! one_shot=false
//! cwebp_convert=true
//! move_to=/srv/sent
//! curl_args=(-H "X-Forwarded-For: 10.0.0.1" --max-time 60)
//! cwebp_args=(-q 85 -metadata icc)
//! ```
//!
//! ## Precedenza:
//! - `timeout`, `watch`, `one_shot`: command line > file > default
//! - tutti gli altri campi arrivano solo dal file
//!
//! ## Validazione:
//! - `room_id` deve essere `!<alnum>:<dominio senza ':'>`
//! - `token` solo caratteri alfanumerici e underscore
//! - `server` non vuoto e con almeno un `.`
//! - `dir` e `move_to` devono esistere, e `move_to` deve essere diversa da `dir`
//! - booleani letteralmente `true` / `false`
//! - timeout numerico con suffisso opzionale `s`, `m`, `h`, `d`

use crate::error::{Result, UploaderError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Delay between two uploads when nothing else is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Values given on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub timeout: Option<String>,
    pub watch: Option<bool>,
    pub one_shot: Option<bool>,
}

/// Validated uploader configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination room, `!localpart:domain`
    pub room_id: String,
    /// Homeserver host (no scheme), e.g. `matrix.example.org`
    pub server: String,
    /// Static bearer token
    pub token: String,
    /// Source directory (canonical, absolute)
    pub dir: PathBuf,
    /// Delay between two consecutive uploads
    pub timeout: Duration,
    /// Keep watching the directory after the initial snapshot
    pub watch: bool,
    /// Stop after the first uploaded file
    pub one_shot: bool,
    /// Convert non-WebP images before upload
    pub cwebp_convert: bool,
    /// Move uploaded files here instead of trashing them
    pub move_to: Option<PathBuf>,
    /// Extra HTTP client arguments, curl style
    pub curl_args: Vec<String>,
    /// Extra arguments passed verbatim to the converter
    pub cwebp_args: Vec<String>,
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("matrix-uploader").join("config"))
    }

    /// Load and validate configuration from file
    pub async fn load(path: &Path, overrides: &CliOverrides) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| UploaderError::ConfigUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content, overrides)
    }

    /// Parse and validate configuration from the text of a config file
    pub fn parse(content: &str, overrides: &CliOverrides) -> Result<Self> {
        RawConfig::from_source(content)?.resolve(overrides)
    }

    /// Base URL of the homeserver client/media API
    pub fn homeserver_url(&self) -> String {
        format!("https://{}", self.server)
    }
}

/// Unvalidated key/value pairs as found in the file
#[derive(Debug, Default)]
struct RawConfig {
    token: Option<String>,
    server: Option<String>,
    room_id: Option<String>,
    dir: Option<String>,
    timeout: Option<String>,
    watch: Option<String>,
    one_shot: Option<String>,
    cwebp_convert: Option<String>,
    move_to: Option<String>,
    curl_args: Vec<String>,
    cwebp_args: Vec<String>,
}

impl RawConfig {
    fn from_source(content: &str) -> Result<Self> {
        let mut raw = RawConfig::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

            let (key, value) = line.split_once('=').ok_or_else(|| {
                UploaderError::invalid(format!("line {}", index + 1), "expected key=value")
            })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "curl_args" => raw.curl_args = parse_array(key, value)?,
                "cwebp_args" => raw.cwebp_args = parse_array(key, value)?,
                "token" => raw.token = Some(unquote(value).to_string()),
                "server" => raw.server = Some(unquote(value).to_string()),
                "room_id" | "ROOM_ID" => raw.room_id = Some(unquote(value).to_string()),
                "dir" => raw.dir = Some(unquote(value).to_string()),
                "timeout" => raw.timeout = Some(unquote(value).to_string()),
                "watch" => raw.watch = Some(unquote(value).to_string()),
                "one_shot" => raw.one_shot = Some(unquote(value).to_string()),
                "cwebp_convert" => raw.cwebp_convert = Some(unquote(value).to_string()),
                "move_to" => raw.move_to = Some(unquote(value).to_string()),
                other => debug!("Ignoring unknown configuration key '{}'", other),
            }
        }

        Ok(raw)
    }

    fn resolve(self, overrides: &CliOverrides) -> Result<Config> {
        let token = required("token", self.token)?;
        if !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(UploaderError::invalid(
                "token",
                "only letters, digits and underscores are allowed",
            ));
        }

        let server = required("server", self.server)?;
        if !server.contains('.') {
            return Err(UploaderError::invalid("server", "expected a domain such as matrix.org"));
        }
        if server.contains('/') || server.chars().any(char::is_whitespace) {
            return Err(UploaderError::invalid("server", "expected a bare host name without scheme or path"));
        }

        let room_id = required("room_id", self.room_id)?;
        if !is_valid_room_id(&room_id) {
            return Err(UploaderError::invalid("room_id", format!("'{}' does not match !localpart:domain", room_id)));
        }

        let dir = existing_dir("dir", &required("dir", self.dir)?)?;

        // Il valore del file viene validato anche quando la CLI lo sovrascrive
        let file_timeout = self.timeout.as_deref().map(timeout_field).transpose()?;
        let cli_timeout = overrides.timeout.as_deref().map(timeout_field).transpose()?;
        let timeout = cli_timeout.or(file_timeout).unwrap_or(DEFAULT_TIMEOUT);

        let file_watch = bool_field("watch", self.watch.as_deref())?;
        let file_one_shot = bool_field("one_shot", self.one_shot.as_deref())?;
        let watch = overrides.watch.or(file_watch).unwrap_or(false);
        let one_shot = overrides.one_shot.or(file_one_shot).unwrap_or(false);
        let cwebp_convert = bool_field("cwebp_convert", self.cwebp_convert.as_deref())?.unwrap_or(false);

        let move_to = match self.move_to.as_deref() {
            Some(value) if !value.is_empty() => {
                let target = existing_dir("move_to", value)?;
                if target == dir {
                    return Err(UploaderError::invalid("move_to", "must differ from dir"));
                }
                Some(target)
            }
            _ => None,
        };

        Ok(Config {
            room_id,
            server,
            token,
            dir,
            timeout,
            watch,
            one_shot,
            cwebp_convert,
            move_to,
            curl_args: self.curl_args,
            cwebp_args: self.cwebp_args,
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(UploaderError::invalid(field, "missing value")),
    }
}

fn existing_dir(field: &str, value: &str) -> Result<PathBuf> {
    let path = expand_home(value);
    if !path.is_dir() {
        return Err(UploaderError::invalid(
            field,
            format!("directory does not exist: {}", path.display()),
        ));
    }
    path.canonicalize()
        .map_err(|e| UploaderError::invalid(field, format!("{}: {}", path.display(), e)))
}

fn timeout_field(value: &str) -> Result<Duration> {
    parse_timeout(value).ok_or_else(|| {
        UploaderError::invalid("timeout", format!("'{}' is not a number with optional s/m/h/d suffix", value))
    })
}

fn bool_field(field: &str, value: Option<&str>) -> Result<Option<bool>> {
    match value {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(UploaderError::invalid(field, format!("expected true or false, got '{}'", other))),
    }
}

/// Parse a delay such as `30`, `30s`, `5m`, `2h` or `1d`
pub fn parse_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().last()? {
        (i, 's') => (&value[..i], 1),
        (i, 'm') => (&value[..i], 60),
        (i, 'h') => (&value[..i], 60 * 60),
        (i, 'd') => (&value[..i], 24 * 60 * 60),
        (_, c) if c.is_ascii_digit() => (value, 1),
        _ => return None,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    amount.checked_mul(unit).map(Duration::from_secs)
}

/// Check a room identifier against `!<alnum>:<non-colon>`
pub fn is_valid_room_id(room_id: &str) -> bool {
    let Some(rest) = room_id.strip_prefix('!') else {
        return false;
    };
    let Some((localpart, domain)) = rest.split_once(':') else {
        return false;
    };
    !localpart.is_empty()
        && localpart.chars().all(|c| c.is_ascii_alphanumeric())
        && !domain.is_empty()
        && !domain.contains(':')
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if value == "~" {
            return home;
        }
        if let Some(rest) = value.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_array(field: &str, value: &str) -> Result<Vec<String>> {
    let inner = match value.strip_prefix('(') {
        Some(rest) => rest
            .strip_suffix(')')
            .ok_or_else(|| UploaderError::invalid(field, "unterminated array, missing ')'"))?,
        None => value,
    };
    split_words(inner).ok_or_else(|| UploaderError::invalid(field, "unterminated quote"))
}

/// Split shell-style words, honouring single quotes, double quotes and backslashes
fn split_words(input: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => current.push(chars.next()?),
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                current.push(chars.next()?);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}
