//! # Cleanup Handler
//!
//! Destinazione finale del file originale dopo un upload confermato.
//!
//! ## Strategie:
//! - `move_to` configurata: il file viene spostato lì; in caso di collisione il nome
//!   diventa `stem-xxxxxx.ext` finché non è libero. Se la rename fallisce (es. device
//!   diversi) si ripiega su copia + rimozione.
//! - altrimenti: cestino di sistema con `gio trash` o `trash-put`; se nessuno dei due
//!   funziona e il file esiste ancora, viene cancellato.
//!
//! Un fallimento qui è fatale: il file è già nella room e non deve essere ricaricato.

use crate::error::{Result, UploaderError};
use crate::tool_resolver::ToolPathResolver;
use crate::utils::with_random_suffix;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What happened to an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposal {
    Moved { from: PathBuf, to: PathBuf },
    Trashed(PathBuf),
    Deleted(PathBuf),
}

/// Trash programs tried in order, with the arguments preceding the path
const TRASH_COMMANDS: &[(&str, &[&str])] = &[("gio", &["trash"]), ("trash-put", &[])];

/// Disposes of original files after upload
#[derive(Debug, Clone)]
pub struct CleanupHandler {
    move_to: Option<PathBuf>,
    resolver: ToolPathResolver,
}

impl CleanupHandler {
    pub fn new(move_to: Option<PathBuf>) -> Self {
        Self::with_resolver(move_to, ToolPathResolver::new())
    }

    pub fn with_resolver(move_to: Option<PathBuf>, resolver: ToolPathResolver) -> Self {
        Self { move_to, resolver }
    }

    /// Move, trash or delete `path`
    pub async fn dispose(&self, path: &Path) -> Result<Disposal> {
        match self.move_to {
            Some(ref dest_dir) => self.move_into(path, dest_dir).await,
            None => self.trash_or_delete(path).await,
        }
    }

    async fn move_into(&self, path: &Path, dest_dir: &Path) -> Result<Disposal> {
        let name = path.file_name().ok_or_else(|| cleanup_failed(path, "path has no file name"))?;

        let mut target = dest_dir.join(name);
        while fs::try_exists(&target).await? {
            debug!("{} already exists, picking another name", target.display());
            target = dest_dir.join(with_random_suffix(path));
        }

        if let Err(rename_err) = fs::rename(path, &target).await {
            debug!("rename failed ({}), copying instead", rename_err);
            fs::copy(path, &target)
                .await
                .map_err(|e| cleanup_failed(path, format!("cannot move to {}: {}", target.display(), e)))?;
            fs::remove_file(path)
                .await
                .map_err(|e| cleanup_failed(path, format!("copied but cannot remove original: {}", e)))?;
        }

        info!(
            "📁 Moved {} -> {}",
            display_name(path),
            display_name(&target)
        );
        Ok(Disposal::Moved {
            from: path.to_path_buf(),
            to: target,
        })
    }

    async fn trash_or_delete(&self, path: &Path) -> Result<Disposal> {
        for (tool_name, args) in TRASH_COMMANDS {
            let Some(tool) = self.resolver.resolve_tool(tool_name) else {
                continue;
            };

            match Command::new(&tool).args(*args).arg(path).output().await {
                Ok(output) if output.status.success() && !path.exists() => {
                    info!("🗑️  Trashed {}", display_name(path));
                    return Ok(Disposal::Trashed(path.to_path_buf()));
                }
                Ok(output) => warn!(
                    "{} could not trash {}: {}",
                    tool_name,
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("Failed to run {}: {}", tool_name, e),
            }
        }

        if !path.exists() {
            return Ok(Disposal::Trashed(path.to_path_buf()));
        }

        fs::remove_file(path)
            .await
            .map_err(|e| cleanup_failed(path, e.to_string()))?;
        info!("🗑️  Deleted {}", display_name(path));
        Ok(Disposal::Deleted(path.to_path_buf()))
    }
}

fn cleanup_failed(path: &Path, reason: impl Into<String>) -> UploaderError {
    UploaderError::CleanupFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Resolver that finds no trash tool
    fn no_tools() -> (TempDir, ToolPathResolver) {
        let tools = TempDir::new().unwrap();
        let resolver = ToolPathResolver::only_in(tools.path());
        (tools, resolver)
    }

    #[tokio::test]
    async fn test_move_into_destination() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let file = src.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let handler = CleanupHandler::new(Some(dest.path().to_path_buf()));
        let disposal = handler.dispose(&file).await.unwrap();

        assert_eq!(
            disposal,
            Disposal::Moved {
                from: file.clone(),
                to: dest.path().join("a.jpg")
            }
        );
        assert!(!file.exists());
        assert_eq!(std::fs::read(dest.path().join("a.jpg")).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_move_collision_gets_new_name() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let file = src.path().join("a.jpg");
        std::fs::write(&file, b"new").unwrap();
        std::fs::write(dest.path().join("a.jpg"), b"old").unwrap();

        let handler = CleanupHandler::new(Some(dest.path().to_path_buf()));
        let Disposal::Moved { to, .. } = handler.dispose(&file).await.unwrap() else {
            panic!("expected a move");
        };

        assert_ne!(to, dest.path().join("a.jpg"));
        let name = to.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("a-") && name.ends_with(".jpg"), "{name}");
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
        assert_eq!(std::fs::read(dest.path().join("a.jpg")).unwrap(), b"old");
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_without_trash_tools() {
        let src = TempDir::new().unwrap();
        let file = src.path().join("b.png");
        std::fs::write(&file, b"png").unwrap();

        let (_tools, resolver) = no_tools();
        let handler = CleanupHandler::with_resolver(None, resolver);

        assert_eq!(handler.dispose(&file).await.unwrap(), Disposal::Deleted(file.clone()));
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trash_tool_is_used() {
        use std::os::unix::fs::PermissionsExt;

        // Fake gio: `gio trash <path>` moves the file into a bin directory
        let tools = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        let script = tools.path().join("gio");
        std::fs::write(&script, format!("#!/bin/sh\nmv \"$2\" '{}'\n", bin.path().display())).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let src = TempDir::new().unwrap();
        let file = src.path().join("c.gif");
        std::fs::write(&file, b"gif").unwrap();

        let handler = CleanupHandler::with_resolver(None, ToolPathResolver::only_in(tools.path()));
        assert_eq!(handler.dispose(&file).await.unwrap(), Disposal::Trashed(file.clone()));
        assert!(!file.exists());
        assert!(bin.path().join("c.gif").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_trash_falls_back_to_delete() {
        use std::os::unix::fs::PermissionsExt;

        let tools = TempDir::new().unwrap();
        for name in ["gio", "trash-put"] {
            let script = tools.path().join(name);
            std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let src = TempDir::new().unwrap();
        let file = src.path().join("d.webp");
        std::fs::write(&file, b"webp").unwrap();

        let handler = CleanupHandler::with_resolver(None, ToolPathResolver::only_in(tools.path()));
        assert_eq!(handler.dispose(&file).await.unwrap(), Disposal::Deleted(file.clone()));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_missing_file_cannot_be_moved() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let handler = CleanupHandler::new(Some(dest.path().to_path_buf()));

        let result = handler.dispose(&src.path().join("gone.png")).await;
        assert!(matches!(result, Err(UploaderError::CleanupFailed { .. })));
    }
}
