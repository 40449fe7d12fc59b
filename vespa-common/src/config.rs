//! Configuration loading and root folder resolution
//!
//! Resolution priority for every value: command line > environment variable
//! > TOML config file > compiled default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Service configuration
///
/// All durations are plain seconds in the TOML file; the pipeline converts
/// them where it needs `chrono::Duration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root folder for the database and all generated blobs
    pub root_folder: PathBuf,
    /// Base URL of the external photometry archive
    pub archive_base_url: String,
    /// Bind host for the status/artifact HTTP surface
    pub host: String,
    /// Bind port for the status/artifact HTTP surface
    pub port: u16,
    /// Seconds after which a pending job is presumed abandoned
    pub job_liveness_window_secs: u64,
    /// Archive download attempts before a star is given up on
    pub fetch_max_attempts: u32,
    /// Per-request archive download timeout
    pub fetch_timeout_secs: u64,
    /// Absolute flux window for outlier clipping
    pub clip_flux_bound: f64,
    /// Sigma multiple for statistical outlier clipping
    pub clip_sigma: f64,
    pub sweep: SweepConfig,
}

/// Periodic sweep intervals and batch caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub image_interval_secs: u64,
    pub image_batch: u32,
    pub stats_interval_secs: u64,
    pub stats_batch: u32,
    pub coords_interval_secs: u64,
    pub coords_batch: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            archive_base_url: "https://wasp.warwick.ac.uk/archive".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5850,
            job_liveness_window_secs: 300,
            fetch_max_attempts: 5,
            fetch_timeout_secs: 30,
            clip_flux_bound: 2.0e5,
            clip_sigma: 5.0,
            sweep: SweepConfig::default(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            image_interval_secs: 120,
            image_batch: 10,
            stats_interval_secs: 300,
            stats_batch: 10,
            coords_interval_secs: 60,
            coords_batch: 500,
        }
    }
}

impl Config {
    /// Load configuration, applying the resolution priority order.
    ///
    /// `cli_config` is an explicit `--config` path; `cli_root` an explicit
    /// `--root-folder` override.
    pub fn load(cli_config: Option<&Path>, cli_root: Option<&Path>) -> Result<Self> {
        let mut config = match config_file_path(cli_config) {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?
            }
            None => Config::default(),
        };

        if let Ok(url) = std::env::var("VESPA_ARCHIVE_URL") {
            config.archive_base_url = url;
        }
        if let Ok(root) = std::env::var("VESPA_ROOT_FOLDER") {
            config.root_folder = PathBuf::from(root);
        }
        if let Some(root) = cli_root {
            config.root_folder = root.to_path_buf();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.archive_base_url.is_empty() {
            return Err(Error::Config("archive_base_url must not be empty".to_string()));
        }
        if self.fetch_max_attempts == 0 {
            return Err(Error::Config("fetch_max_attempts must be at least 1".to_string()));
        }
        if self.clip_sigma <= 0.0 {
            return Err(Error::Config("clip_sigma must be positive".to_string()));
        }
        Ok(())
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("vespa.db")
    }

    /// Directory holding downloaded raw photometry blobs
    pub fn photometry_dir(&self) -> PathBuf {
        self.root_folder.join("photometry")
    }

    /// Directory holding rendered lightcurve images and thumbnails
    pub fn images_dir(&self) -> PathBuf {
        self.root_folder.join("images")
    }

    /// Create the root folder tree if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.photometry_dir())?;
        std::fs::create_dir_all(self.images_dir())?;
        Ok(())
    }
}

/// Locate the TOML config file, if any.
///
/// An explicitly requested file that does not exist is an error elsewhere;
/// a missing default file just means compiled defaults.
fn config_file_path(cli_config: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_config {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("VESPA_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let user_config = dirs::config_dir().map(|d| d.join("vespa").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    let system_config = PathBuf::from("/etc/vespa/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }
    None
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vespa"))
        .unwrap_or_else(|| PathBuf::from("./vespa_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_defaults() {
        let config = Config::default();
        assert_eq!(config.job_liveness_window_secs, 300);
        assert_eq!(config.fetch_max_attempts, 5);
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.sweep.image_interval_secs, 120);
        assert_eq!(config.sweep.image_batch, 10);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            archive_base_url = "http://archive.test"

            [sweep]
            image_batch = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.archive_base_url, "http://archive.test");
        assert_eq!(config.sweep.image_batch, 3);
        assert_eq!(config.sweep.stats_interval_secs, 300);
        assert_eq!(config.fetch_max_attempts, 5);
    }

    #[test]
    fn missing_explicit_config_file_names_the_path() {
        let err = Config::load(Some(Path::new("/nonexistent/vespa.toml")), None).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("/nonexistent/vespa.toml")),
            other => panic!("unexpected error kind: {other}"),
        }
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = Config {
            fetch_max_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
