//! # File Management Module
//!
//! Questo modulo gestisce la discovery dei file e la classificazione delle immagini.
//!
//! ## Responsabilità:
//! - `FileStream`: produce la sequenza di path candidati
//!   1. snapshot iniziale, mescolato in ordine casuale, dei file regolari della directory
//!   2. (solo in watch mode) stream infinito dei file che arrivano dopo
//! - `ImageClassifier`: tiene solo file regolari con estensione immagine e
//!   content type `image/*` rilevato dai magic bytes e di cui si sanno leggere le dimensioni
//! - Utilità per la formattazione human-readable delle dimensioni
//!
//! ## Eventi osservati in watch mode:
//! - rename verso la directory
//! - chiusura dopo scrittura
//! - creazione di un file, solo dove il backend non segnala la chiusura dopo
//!   scrittura (tutto tranne Linux/Android). Lì un file ancora in scrittura può
//!   essere visto troppo presto: se l'header è incompleto viene scartato, se è già
//!   completo il file viene caricato troncato.
//!
//! ## Note:
//! - Il watcher viene armato prima dello snapshot, così i file che arrivano durante
//!   la fase 1 non vanno persi. Un path emesso di nuovo dopo l'upload viene scartato
//!   a valle perché non esiste più.
//! - Il file di lock non viene mai emesso.
//!
//! ## Esempio:
//! ```rust,no_run
//! # async fn demo(dir: &std::path::Path) -> matrix_dir_uploader::error::Result<()> {
//! use futures::StreamExt;
//! use matrix_dir_uploader::file_manager::{FileStream, ImageClassifier};
//!
//! let mut files = FileStream::open(dir, false)?;
//! while let Some(path) = files.next().await {
//!     if let Some(candidate) = ImageClassifier::classify(&path).await {
//!         println!("{} ({})", candidate.path.display(), candidate.mime_type);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::lock::LOCK_FILE_NAME;
use futures::stream::{self, BoxStream, StreamExt};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions accepted by the classifier (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Content types whose dimensions can be read before upload
pub const DECODABLE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
];

/// inotify reports close-after-write, so there a bare create is not an arrival
const CREATE_IS_ARRIVAL: bool = !cfg!(any(target_os = "linux", target_os = "android"));

/// Lazy sequence of candidate paths for one source directory
pub struct FileStream;

impl FileStream {
    /// Open the stream: shuffled snapshot, then live arrivals if `watch` is set.
    ///
    /// The returned stream is finite without `watch` and never ends with it.
    pub fn open(dir: &Path, watch: bool) -> Result<BoxStream<'static, PathBuf>> {
        let live = if watch {
            Some(watch_directory(dir)?)
        } else {
            None
        };

        let snapshot = Self::snapshot(dir);
        info!("Found {} files in {}", snapshot.len(), dir.display());
        let snapshot = stream::iter(snapshot);

        Ok(match live {
            Some((watcher, receiver)) => {
                let arrivals = stream::unfold((watcher, receiver), |(watcher, mut receiver)| async move {
                    let path = receiver.recv().await?;
                    Some((path, (watcher, receiver)))
                });
                snapshot.chain(arrivals).boxed()
            }
            None => snapshot.boxed(),
        })
    }

    /// Regular files directly inside `dir`, in random order
    pub fn snapshot(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| !is_lock_file(path))
            .collect();

        files.shuffle(&mut rand::thread_rng());
        files
    }
}

/// Start a non-recursive watcher on `dir` forwarding arrival paths to a channel.
///
/// The watcher must be kept alive for as long as the receiver is used.
fn watch_directory(dir: &Path) -> Result<(RecommendedWatcher, mpsc::Receiver<PathBuf>)> {
    let (tx, rx) = mpsc::channel::<PathBuf>(256);
    let watched = dir.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in arrival_paths(&event, &watched) {
                    // Runs on notify's thread; a closed channel means we are shutting down
                    let _ = tx.blocking_send(path);
                }
            }
            Err(e) => warn!("Watcher error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    info!("👀 Watching {} for new files", dir.display());
    Ok((watcher, rx))
}

/// Paths of files that arrived in `dir` according to `event`
fn arrival_paths(event: &Event, dir: &Path) -> Vec<PathBuf> {
    let paths: Vec<&PathBuf> = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) if CREATE_IS_ARRIVAL => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1).into_iter().collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event.paths.iter().collect(),
        _ => Vec::new(),
    };

    paths
        .into_iter()
        .filter(|path| path.parent() == Some(dir) && !is_lock_file(path))
        .cloned()
        .collect()
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name().map_or(false, |name| name == LOCK_FILE_NAME)
}

/// A file accepted for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub mime_type: String,
}

/// Filters the file stream down to real images
pub struct ImageClassifier;

impl ImageClassifier {
    /// Accept `path` iff it is a regular file with an image extension and image content
    pub async fn classify(path: &Path) -> Option<CandidateFile> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                debug!("Skipping {}: not a regular file", path.display());
                return None;
            }
            Err(_) => {
                debug!("Skipping {}: no longer exists", path.display());
                return None;
            }
        }

        if !Self::has_image_extension(path) {
            debug!("Skipping {}: unsupported extension", path.display());
            return None;
        }

        let mime_type = match detect_mime_type(path).await {
            Ok(mime) => mime,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };
        if !mime_type.starts_with("image/") {
            debug!("Skipping {}: content type {}", path.display(), mime_type);
            return None;
        }
        if !is_decodable(&mime_type) {
            debug!("Skipping {}: cannot read {} dimensions", path.display(), mime_type);
            return None;
        }

        Some(CandidateFile {
            path: path.to_path_buf(),
            mime_type,
        })
    }

    /// Check the extension against [`IMAGE_EXTENSIONS`], case-insensitively
    pub fn has_image_extension(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        } else {
            false
        }
    }
}

/// Whether the metadata reader understands `mime_type`
pub fn is_decodable(mime_type: &str) -> bool {
    DECODABLE_MIME_TYPES.contains(&mime_type)
}

/// Detect the content type of a file from its leading bytes
pub async fn detect_mime_type(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(64);
    (&mut file).take(64).read_to_end(&mut header).await?;
    Ok(mime_from_bytes(&header))
}

fn mime_from_bytes(header: &[u8]) -> String {
    use image::ImageFormat;

    match image::guess_format(header) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".to_string(),
        Ok(ImageFormat::Png) => "image/png".to_string(),
        Ok(ImageFormat::Gif) => "image/gif".to_string(),
        Ok(ImageFormat::WebP) => "image/webp".to_string(),
        Ok(ImageFormat::Bmp) => "image/bmp".to_string(),
        Ok(ImageFormat::Tiff) => "image/tiff".to_string(),
        Ok(ImageFormat::Avif) => "image/avif".to_string(),
        Ok(ImageFormat::Ico) => "image/x-icon".to_string(),
        Ok(other) => match other.extensions_str().first() {
            Some(ext) => format!("image/x-{}", ext),
            None => "application/octet-stream".to_string(),
        },
        Err(_) if header.is_empty() => "application/x-empty".to_string(),
        Err(_) if std::str::from_utf8(header).is_ok() => "text/plain".to_string(),
        Err(_) => "application/octet-stream".to_string(),
    }
}

/// File extension matching a detected image mime type
pub fn extension_for_mime(mime_type: &str) -> &str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/x-icon" => "ico",
        other => other.strip_prefix("image/").unwrap_or("bin"),
    }
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn canonical_tempdir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().canonicalize().unwrap();
        (temp_dir, dir)
    }

    #[tokio::test]
    async fn test_snapshot_yields_every_file_once() {
        let (_guard, dir) = canonical_tempdir();
        let mut expected = HashSet::new();
        for i in 0..7 {
            let path = dir.join(format!("file{i}.bin"));
            std::fs::write(&path, b"x").unwrap();
            expected.insert(path);
        }
        std::fs::create_dir(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested").join("deep.png"), PNG_MAGIC).unwrap();
        std::fs::write(dir.join(LOCK_FILE_NAME), "1\n").unwrap();

        let paths: Vec<PathBuf> = FileStream::open(&dir, false).unwrap().collect().await;

        assert_eq!(paths.len(), 7);
        assert!(paths.iter().all(|p| p.is_absolute()));
        assert_eq!(paths.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn test_empty_directory_ends_immediately() {
        let (_guard, dir) = canonical_tempdir();
        let mut files = FileStream::open(&dir, false).unwrap();
        assert!(files.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_mode_sees_new_files() {
        let (_guard, dir) = canonical_tempdir();
        std::fs::write(dir.join("existing.png"), PNG_MAGIC).unwrap();

        let mut files = FileStream::open(&dir, true).unwrap();
        let first = files.next().await.unwrap();
        assert_eq!(first.file_name().unwrap(), "existing.png");

        let new_file = dir.join("arrived.png");
        std::fs::write(&new_file, PNG_MAGIC).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(path) = files.next().await {
                if path == new_file {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(seen);
    }

    #[test]
    fn test_arrival_paths_filters_event_kinds() {
        let dir = PathBuf::from("/watched");
        let inside = dir.join("a.png");
        let elsewhere = PathBuf::from("/other/b.png");

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(inside.clone());
        if CREATE_IS_ARRIVAL {
            assert_eq!(arrival_paths(&create, &dir), vec![inside.clone()]);
        } else {
            assert!(arrival_paths(&create, &dir).is_empty());
        }

        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path(dir.join("sub"));
        assert!(arrival_paths(&folder, &dir).is_empty());

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(elsewhere.clone())
            .add_path(inside.clone());
        assert_eq!(arrival_paths(&renamed, &dir), vec![inside.clone()]);

        let closed = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(inside.clone());
        assert_eq!(arrival_paths(&closed, &dir), vec![inside.clone()]);

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(inside.clone());
        assert!(arrival_paths(&removed, &dir).is_empty());

        let outside = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(elsewhere);
        assert!(arrival_paths(&outside, &dir).is_empty());

        let lock = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(dir.join(LOCK_FILE_NAME));
        assert!(arrival_paths(&lock, &dir).is_empty());
    }

    #[tokio::test]
    async fn test_classifier_accepts_real_images() {
        let (_guard, dir) = canonical_tempdir();
        let path = dir.join("Photo.PNG");
        image::RgbImage::new(4, 3).save_with_format(&path, image::ImageFormat::Png).unwrap();

        let candidate = ImageClassifier::classify(&path).await.unwrap();
        assert_eq!(candidate.path, path);
        assert_eq!(candidate.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_classifier_rejects_txt_even_with_image_content() {
        let (_guard, dir) = canonical_tempdir();
        let path = dir.join("notes.txt");
        std::fs::write(&path, PNG_MAGIC).unwrap();

        assert_eq!(detect_mime_type(&path).await.unwrap(), "image/png");
        assert!(ImageClassifier::classify(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_classifier_rejects_fake_images_and_missing_files() {
        let (_guard, dir) = canonical_tempdir();
        let fake = dir.join("fake.jpg");
        std::fs::write(&fake, "just some text").unwrap();
        assert!(ImageClassifier::classify(&fake).await.is_none());

        assert!(ImageClassifier::classify(&dir.join("gone.png")).await.is_none());

        let folder = dir.join("folder.png");
        std::fs::create_dir(&folder).unwrap();
        assert!(ImageClassifier::classify(&folder).await.is_none());
    }

    #[tokio::test]
    async fn test_bmp_with_jpg_name_is_accepted_and_readable() {
        let (_guard, dir) = canonical_tempdir();
        let path = dir.join("scan.jpg");
        image::RgbImage::new(5, 2).save_with_format(&path, image::ImageFormat::Bmp).unwrap();

        let candidate = ImageClassifier::classify(&path).await.unwrap();
        assert_eq!(candidate.mime_type, "image/bmp");

        let metadata = crate::image_processor::probe_metadata(&path, &candidate.mime_type).await.unwrap();
        assert_eq!((metadata.width, metadata.height), (5, 2));
    }

    #[tokio::test]
    async fn test_classifier_skips_unreadable_image_types() {
        let (_guard, dir) = canonical_tempdir();
        // OpenEXR magic: recognised as an image but not readable here
        let path = dir.join("render.png");
        std::fs::write(&path, b"\x76\x2f\x31\x01\x02\x00\x00\x00").unwrap();

        assert_eq!(detect_mime_type(&path).await.unwrap(), "image/x-exr");
        assert!(ImageClassifier::classify(&path).await.is_none());
    }

    #[test]
    fn test_extension_and_mime_helpers() {
        assert!(ImageClassifier::has_image_extension(Path::new("a.JPeG")));
        assert!(ImageClassifier::has_image_extension(Path::new("a.webp")));
        assert!(!ImageClassifier::has_image_extension(Path::new("a.txt")));
        assert!(!ImageClassifier::has_image_extension(Path::new("png")));

        assert_eq!(mime_from_bytes(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(mime_from_bytes(b"hello"), "text/plain");
        assert_eq!(mime_from_bytes(b""), "application/x-empty");

        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");

        assert!(is_decodable("image/x-icon"));
        assert!(!is_decodable("image/avif"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
