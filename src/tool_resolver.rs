//! # External Tool Resolver
//!
//! Finds the external programs the uploader delegates to:
//! - `cwebp` / `gif2webp` for WebP conversion
//! - `gio` / `trash-put` for moving files to the trash
//! - `systemctl` for user service installation
//!
//! Lookup order: `MATRIX_UPLOADER_TOOLS_DIR` override, then the system `PATH`.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing at a directory of bundled tools
pub const TOOLS_DIR_ENV: &str = "MATRIX_UPLOADER_TOOLS_DIR";

/// Tool path resolver
#[derive(Debug, Clone, Default)]
pub struct ToolPathResolver {
    /// Directory searched before `PATH`
    tools_dir: Option<PathBuf>,
    /// Never fall back to the system `PATH`
    skip_system_path: bool,
}

impl ToolPathResolver {
    /// Create a resolver honouring the tools directory override
    pub fn new() -> Self {
        let tools_dir = env::var_os(TOOLS_DIR_ENV)
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir());
        Self {
            tools_dir,
            skip_system_path: false,
        }
    }

    /// Create a resolver searching `dir` first, then `PATH`
    pub fn with_tools_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: Some(dir.into()),
            skip_system_path: false,
        }
    }

    /// Create a resolver that never looks outside `dir`
    pub fn only_in(dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: Some(dir.into()),
            skip_system_path: true,
        }
    }

    /// Resolve the path to a specific tool
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            let bundled = tools_dir.join(executable_name(tool_name));
            if bundled.is_file() {
                debug!("Using bundled tool: {} -> {:?}", tool_name, bundled);
                return Some(bundled);
            }
        }

        if self.skip_system_path {
            debug!("Tool not found in tools dir: {}", tool_name);
            return None;
        }

        let found = find_in_system_path(tool_name);
        match found {
            Some(ref path) => debug!("Using system tool: {} -> {:?}", tool_name, path),
            None => debug!("Tool not found: {}", tool_name),
        }
        found
    }

    /// Check if a specific tool is available
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Resolve a tool, or explain how to install it
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        self.resolve_tool(tool_name).ok_or_else(|| {
            format!(
                "'{}' not found in PATH (install with: {})",
                tool_name,
                install_instructions(tool_name)
            )
        })
    }
}

fn executable_name(tool_name: &str) -> String {
    let extension = if cfg!(windows) { ".exe" } else { "" };
    format!("{}{}", tool_name, extension)
}

/// Find tool in system PATH
fn find_in_system_path(tool_name: &str) -> Option<PathBuf> {
    let tool_with_ext = executable_name(tool_name);
    env::split_paths(&env::var_os("PATH")?)
        .map(|dir| dir.join(&tool_with_ext))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Installation hint for a tool on Debian-like systems
fn install_instructions(tool_name: &str) -> &'static str {
    match tool_name {
        "cwebp" | "gif2webp" => "sudo apt-get install webp",
        "gio" => "sudo apt-get install libglib2.0-bin",
        "trash-put" => "sudo apt-get install trash-cli",
        "systemctl" => "a systemd-based distribution",
        _ => "your package manager",
    }
}
