//! # User Service Module
//!
//! Genera e installa una coppia di unit systemd utente (`.service` + `.timer`)
//! che esegue l'uploader in modalità one-shot a intervalli regolari.
//!
//! ## Naming:
//! Ogni file di configurazione ha la sua coppia di unit: il nome è
//! `matrix-uploader-<hash>` dove `<hash>` sono i primi 12 caratteri esadecimali
//! dello SHA-256 del path della configurazione.
//!
//! ## File generati (`$XDG_CONFIG_HOME/systemd/user/`):
//! ```text
//! matrix-uploader-1a2b3c4d5e6f.service   Type=oneshot, --one-shot true --watch false
//! matrix-uploader-1a2b3c4d5e6f.timer     OnBootSec / OnUnitInactiveSec = intervallo
//! ```

use crate::error::UploaderError;
use crate::tool_resolver::ToolPathResolver;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

const UNIT_PREFIX: &str = "matrix-uploader";

/// Unit base name for a configuration file
pub fn unit_name(config_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_path.to_string_lossy().as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}-{}", UNIT_PREFIX, &hash[..12])
}

/// Default directory for user units
pub fn default_units_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("systemd").join("user"))
}

/// A oneshot service plus the timer that triggers it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub interval: Duration,
}

impl ServiceUnit {
    pub fn new(executable: PathBuf, config_path: PathBuf, interval: Duration) -> Self {
        Self {
            name: unit_name(&config_path),
            executable,
            config_path,
            interval,
        }
    }

    pub fn service_file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    pub fn timer_file_name(&self) -> String {
        format!("{}.timer", self.name)
    }

    pub fn render_service(&self) -> String {
        format!(
            "[Unit]\n\
             Description=Upload one image from {config} to Matrix\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart=\"{exe}\" --config \"{config}\" --one-shot true --watch false\n",
            exe = self.executable.display(),
            config = self.config_path.display(),
        )
    }

    pub fn render_timer(&self) -> String {
        // systemd rejects a zero OnUnitInactiveSec
        let secs = self.interval.as_secs().max(1);
        format!(
            "[Unit]\n\
             Description=Periodic Matrix upload for {config}\n\
             \n\
             [Timer]\n\
             OnBootSec={secs}s\n\
             OnUnitInactiveSec={secs}s\n\
             Unit={service}\n\
             \n\
             [Install]\n\
             WantedBy=timers.target\n",
            config = self.config_path.display(),
            service = self.service_file_name(),
        )
    }
}

/// Installs and removes units through `systemctl --user`
#[derive(Debug, Clone)]
pub struct ServiceManager {
    units_dir: PathBuf,
    resolver: ToolPathResolver,
}

impl ServiceManager {
    pub fn new() -> Result<Self> {
        let units_dir = default_units_dir().context("Could not determine the user configuration directory")?;
        Ok(Self::with_units_dir(units_dir, ToolPathResolver::new()))
    }

    pub fn with_units_dir(units_dir: PathBuf, resolver: ToolPathResolver) -> Self {
        Self { units_dir, resolver }
    }

    /// Write both units, reload systemd and start the timer
    pub async fn install(&self, unit: &ServiceUnit) -> Result<PathBuf> {
        let systemctl = self.systemctl()?;

        fs::create_dir_all(&self.units_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.units_dir.display()))?;

        let service_path = self.units_dir.join(unit.service_file_name());
        let timer_path = self.units_dir.join(unit.timer_file_name());
        fs::write(&service_path, unit.render_service())
            .await
            .with_context(|| format!("Failed to write {}", service_path.display()))?;
        fs::write(&timer_path, unit.render_timer())
            .await
            .with_context(|| format!("Failed to write {}", timer_path.display()))?;
        debug!("Wrote {} and {}", service_path.display(), timer_path.display());

        run_systemctl(&systemctl, &["daemon-reload"]).await?;
        run_systemctl(&systemctl, &["enable", "--now", &unit.timer_file_name()]).await?;

        info!("⏱️  Installed {} (every {:?})", unit.timer_file_name(), unit.interval);
        Ok(timer_path)
    }

    /// Stop the timer and delete both units for `config_path`
    pub async fn remove(&self, config_path: &Path) -> Result<()> {
        let systemctl = self.systemctl()?;
        let name = unit_name(config_path);
        let timer = format!("{}.timer", name);

        if let Err(e) = run_systemctl(&systemctl, &["disable", "--now", &timer]).await {
            warn!("Could not disable {}: {:#}", timer, e);
        }

        let mut removed = 0;
        for file in [format!("{}.service", name), timer.clone()] {
            let path = self.units_dir.join(file);
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
            }
        }

        run_systemctl(&systemctl, &["daemon-reload"]).await?;
        if removed == 0 {
            warn!("No units found for {}", config_path.display());
        } else {
            info!("🧹 Removed {}", name);
        }
        Ok(())
    }

    fn systemctl(&self) -> Result<PathBuf> {
        Ok(self
            .resolver
            .check_tool_with_instructions("systemctl")
            .map_err(UploaderError::SupervisorToolMissing)?)
    }
}

async fn run_systemctl(systemctl: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new(systemctl)
        .arg("--user")
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", systemctl.display()))?;

    if !output.status.success() {
        bail!(
            "systemctl --user {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
