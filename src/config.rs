//! Configuration management for artisync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of parallel jobs (0 = auto)
pub const DEFAULT_JOBS: usize = 0;

/// Default capacity of the listing and walker queues
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Files at least this large are uploaded in parts (64 MiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Default part size of multipart uploads (16 MiB)
pub const DEFAULT_MULTIPART_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ==================== Transfer Options ====================

    /// Number of parallel transfer jobs (0 = auto-detect CPU count)
    pub jobs: usize,

    /// Bound of the queues between producers and the diff loop
    pub channel_capacity: usize,

    /// Perform a dry run (no actual changes)
    pub dry_run: bool,

    /// Show progress bars
    pub progress: bool,

    // ==================== Comparison Options ====================

    /// Modify-time comparison window in seconds
    pub modify_window: u64,

    /// After an upload, stamp the local file with the object's modified time
    pub align_mtime: bool,

    // ==================== Upload Options ====================

    /// Files at least this many bytes are uploaded in parts
    pub multipart_threshold: u64,

    /// Part size of multipart uploads in bytes
    pub multipart_chunk_size: usize,

    // ==================== Retry ====================

    /// Maximum retries for failed operations
    pub max_retries: u32,

    /// Retry delay base in milliseconds
    pub retry_delay_ms: u64,

    // ==================== Cloud Storage ====================

    /// Custom S3 endpoint for S3-compatible storage (MinIO, R2, etc.)
    pub s3_endpoint: Option<String>,

    /// S3 region override
    pub s3_region: Option<String>,

    /// Service account JSON for GCS (Application Default Credentials otherwise)
    pub gcs_service_account_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            dry_run: false,
            progress: false,

            modify_window: 0,
            align_mtime: true,

            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunk_size: DEFAULT_MULTIPART_CHUNK_SIZE,

            max_retries: 3,
            retry_delay_ms: 1000,

            s3_endpoint: None,
            s3_region: None,
            gcs_service_account_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("reading config", e))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("creating config dir", e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("serializing config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| Error::io("writing config", e))?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("artisync").join("config.toml"))
            .ok_or_else(|| Error::config("could not determine config directory"))
    }

    /// Get the effective number of jobs (resolves 0 to CPU count)
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be at least 1"));
        }
        if self.multipart_chunk_size == 0 {
            return Err(Error::config("multipart_chunk_size must be at least 1"));
        }
        Ok(())
    }
}
