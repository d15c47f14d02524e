//! Adapter configuration
//!
//! Where to find the 7z binary, how long to let it run, and where scratch
//! files go. Values come from code, the environment or CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};
use tracing::warn;

/// Path or name of the 7z binary.
pub const ENV_ARCHIVER: &str = "P7ZFS_ARCHIVER";
/// Seconds before a running 7z process is killed.
pub const ENV_TIMEOUT: &str = "P7ZFS_TIMEOUT";
/// Parent directory for temporary files and folders.
pub const ENV_TEMP_DIR: &str = "P7ZFS_TEMP_DIR";

const TEMP_PREFIX: &str = ".p7zfs_";

/// Configuration for the archive adapters
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// 7z binary; searched on PATH when unset
    pub archiver: Option<PathBuf>,

    /// Upper bound on a single 7z invocation. Unbounded when unset.
    pub timeout: Option<Duration>,

    /// Where scratch files are created (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

impl AdapterConfig {
    /// Read configuration from `P7ZFS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let archiver = std::env::var_os(ENV_ARCHIVER)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let timeout = match std::env::var(ENV_TIMEOUT) {
            Ok(value) if !value.trim().is_empty() => Some(parse_timeout(&value)?),
            _ => None,
        };

        let temp_dir = std::env::var_os(ENV_TEMP_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let config = Self {
            archiver,
            timeout,
            temp_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidTimeout("0".to_string()));
        }

        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::TempDirNotFound(dir.clone()));
            }
        }

        Ok(())
    }

    /// Fresh scratch directory, removed when dropped.
    pub(crate) fn tempdir(&self) -> std::io::Result<ScratchDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let dir = match &self.temp_dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        Ok(ScratchDir { dir })
    }

    /// Fresh scratch file, removed when dropped.
    pub(crate) fn tempfile(&self, suffix: &str) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(suffix);
        match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

/// Temporary directory that is removed even when it holds read-only folders.
///
/// Extracted archives and flushed trees can carry modes such as `0o555`,
/// which would stop `TempDir` from deleting their children.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        make_owner_writable(self.dir.path());
    }
}

/// Give the owner full access to `dir` and every folder below it.
#[cfg(unix)]
fn make_owner_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::symlink_metadata(dir) else {
        return;
    };
    if !metadata.is_dir() {
        return;
    }

    let mode = metadata.permissions().mode();
    if mode & 0o700 != 0o700 {
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode | 0o700)) {
            warn!("Failed to make {} writable for cleanup: {}", dir.display(), e);
            return;
        }
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            make_owner_writable(&entry.path());
        }
    }
}

#[cfg(not(unix))]
fn make_owner_writable(_dir: &Path) {}

/// Parse a timeout in whole seconds.
pub fn parse_timeout(value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidTimeout(value.to_string())),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid timeout '{0}': expected a positive number of seconds")]
    InvalidTimeout(String),

    #[error("Temp directory not found: {}", .0.display())]
    TempDirNotFound(PathBuf),
}
