//! Log output for the binary.
//!
//! Records go to stderr, or to the configured log file, since stdout carries
//! the MCP protocol. `RUST_LOG` takes precedence over the configured level.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use env_logger::{Builder, Env, Target, WriteStyle};
use log::LevelFilter;

use crate::config::LoggingSettings;

/// Installs the global logger.
pub fn init(settings: &LoggingSettings, debug: bool) -> Result<()> {
    builder(settings, debug)?
        .try_init()
        .context("Failed to initialize logger")
}

/// Logger configuration without installing it. Opens (and rotates) the log
/// file when one is configured.
pub fn builder(settings: &LoggingSettings, debug: bool) -> Result<Builder> {
    let level = level_filter(&settings.level, debug)?;
    let default_filter = level.to_string().to_lowercase();

    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }

    match settings.log_file_path() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
            rotate(&path, settings.max_bytes, settings.backup_count)?;

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .target(Target::Pipe(Box::new(file)))
                .write_style(WriteStyle::Never);
        }
        None => {
            builder.target(Target::Stderr);
        }
    }

    Ok(builder)
}

pub fn level_filter(level: &str, debug: bool) -> Result<LevelFilter> {
    if debug {
        return Ok(LevelFilter::Debug);
    }
    let name = match level.trim() {
        name if name.eq_ignore_ascii_case("warning") => "warn",
        name => name,
    };
    LevelFilter::from_str(name).map_err(|_| anyhow!("Invalid log level: '{}'", level))
}

/// Shifts `path` to `path.1` (and older backups up by one) once it has
/// reached `max_bytes`. Backups past `backup_count` are deleted. Returns
/// whether a rotation happened.
pub fn rotate(path: &Path, max_bytes: u64, backup_count: u32) -> Result<bool> {
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return Ok(false),
    };
    if max_bytes == 0 || size < max_bytes {
        return Ok(false);
    }

    if backup_count == 0 {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove log file {}", path.display()))?;
        return Ok(true);
    }

    let oldest = backup_path(path, backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest)
            .with_context(|| format!("Failed to remove {}", oldest.display()))?;
    }
    for index in (1..backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            let to = backup_path(path, index + 1);
            fs::rename(&from, &to)
                .with_context(|| format!("Failed to rename {} to {}", from.display(), to.display()))?;
        }
    }

    let first = backup_path(path, 1);
    fs::rename(path, &first)
        .with_context(|| format!("Failed to rotate log file {}", path.display()))?;
    Ok(true)
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}
