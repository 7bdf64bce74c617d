//! # Directory Lock Module
//!
//! Garantisce al massimo un worker attivo per directory sorgente.
//!
//! ## Funzionamento:
//! - Un file `.matrix-uploader.lock` dentro la directory contiene il PID del proprietario
//! - La directory è occupata se il file esiste e il PID risponde a `kill(pid, 0)`
//! - `acquire()` sovrascrive un lock stale (PID morto) con il PID corrente
//! - Il lock non viene rilasciato esplicitamente: alla prossima esecuzione il PID morto
//!   viene riconosciuto come stale
//!
//! ## Limiti noti:
//! - Lock advisory, non imposto dal sistema operativo
//! - Un PID riciclato da un altro processo dà un falso positivo
//! - Tra il controllo di liveness e la scrittura c'è una piccola race (check-then-write)

use crate::error::{Result, UploaderError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the lock marker inside the watched directory
pub const LOCK_FILE_NAME: &str = ".matrix-uploader.lock";

/// PID-bearing marker file guarding one source directory
#[derive(Debug, Clone)]
pub struct DirectoryLock {
    dir: PathBuf,
    path: PathBuf,
}

impl DirectoryLock {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(LOCK_FILE_NAME),
        }
    }

    /// Path of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the marker, if the marker exists and is readable
    pub async fn recorded_owner(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.path).await.ok()?;
        content.trim().parse().ok()
    }

    /// PID of the live process holding the directory, if any
    pub async fn live_owner(&self) -> Option<u32> {
        self.recorded_owner().await.filter(|pid| is_process_running(*pid))
    }

    /// True when a live process holds the directory
    pub async fn is_occupied(&self) -> bool {
        self.live_owner().await.is_some()
    }

    /// Claim the directory for the current process
    pub async fn acquire(&self) -> Result<()> {
        if let Some(pid) = self.live_owner().await {
            return Err(UploaderError::DirectoryBusy {
                dir: self.dir.clone(),
                pid,
            });
        }

        if let Some(stale) = self.recorded_owner().await {
            debug!("Reclaiming stale lock left by PID {}", stale);
        }

        let pid = std::process::id();
        fs::write(&self.path, format!("{}\n", pid)).await?;
        info!("🔒 Locked {} (PID {})", self.dir.display(), pid);
        Ok(())
    }
}

/// Check if a process is running
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // pid 0 e valori negativi indirizzano gruppi di processi
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) returns 0 if the process exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // Fallback: assume running to be safe
    true
}
