//! # Utility Functions Module
//!
//! Piccoli helper condivisi tra converter, cleanup e generazione dei servizi:
//! costruzione di argomenti per i tool esterni e nomi di file casuali.

use rand::Rng;
use std::path::Path;

/// Converts any iterable of string-like items to `Vec<String>`.
///
/// # Example
/// ```rust
/// use matrix_dir_uploader::utils::to_string_vec;
///
/// let args = to_string_vec(["--user", "daemon-reload"]);
/// assert_eq!(args, vec!["--user".to_string(), "daemon-reload".to_string()]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from mixed displayable values.
///
/// ```rust
/// use matrix_dir_uploader::args;
///
/// let quality = 85;
/// assert_eq!(args!["-q", quality], vec!["-q".to_string(), "85".to_string()]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec([$($item.to_string()),*])
    };
}

/// Pseudo-random file name with the given extension, e.g. `2836151932.webp`.
///
/// Collisions are unlikely but possible; only used as cosmetic metadata.
pub fn random_file_name(extension: &str) -> String {
    let n: u32 = rand::thread_rng().gen();
    format!("{}.{}", n, extension)
}

/// `photo.jpg` -> `photo-3fa9c1.jpg`
pub fn with_random_suffix(path: &Path) -> String {
    let suffix = rand::thread_rng().gen::<u32>() & 0x00ff_ffff;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}-{:06x}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{:06x}", stem, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_macro_mixed_types() {
        let quality = 85;
        let result = args!["-q", quality, "-mt"];
        assert_eq!(result, vec!["-q".to_string(), "85".to_string(), "-mt".to_string()]);
    }

    #[test]
    fn test_random_file_name() {
        let name = random_file_name("webp");
        let (number, ext) = name.split_once('.').unwrap();
        assert_eq!(ext, "webp");
        assert!(number.parse::<u32>().is_ok());
    }

    #[test]
    fn test_with_random_suffix() {
        let renamed = with_random_suffix(Path::new("/tmp/cat.photo.png"));
        assert!(renamed.starts_with("cat.photo-"));
        assert!(renamed.ends_with(".png"));
        assert_eq!(renamed.len(), "cat.photo-".len() + 6 + ".png".len());

        let bare = with_random_suffix(Path::new("README"));
        assert!(bare.starts_with("README-"));
        assert_eq!(bare.len(), "README-".len() + 6);
    }
}
