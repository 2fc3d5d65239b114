//! CLI argument parsing for artisync

use crate::config::Config;
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// artisync - keep object-store prefixes in step with local directories
#[derive(Parser, Debug)]
#[command(name = "artisync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make a remote prefix mirror a local directory (uploads and deletes)
    Sync(SyncArgs),

    /// Upload every file of a local directory
    Upload(SyncArgs),

    /// Download every object under a remote prefix
    Download(DownloadArgs),

    /// List objects under a remote prefix
    Ls(LsArgs),

    /// Rename an object within one bucket
    Mv(MvArgs),

    /// Print one metadata tag of an object
    Tag(TagArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Options shared by the transfer commands
#[derive(Args, Debug, Clone, Default)]
pub struct TransferOptions {
    /// Perform a trial run with no changes made
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show progress
    #[arg(short = 'P', long)]
    pub progress: bool,

    /// Number of parallel transfers [default: auto]
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Allowed mtime difference in seconds when comparing
    #[arg(long)]
    pub modify_window: Option<u64>,

    /// Do not stamp uploaded files with the object's modified time
    #[arg(long)]
    pub no_align_mtime: bool,

    /// Configuration file path
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

impl TransferOptions {
    /// Load the config file and apply CLI overrides
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        // CLI args override config file
        config.dry_run |= self.dry_run;
        config.progress |= self.progress;
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(window) = self.modify_window {
            config.modify_window = window;
        }
        if self.no_align_mtime {
            config.align_mtime = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the sync and upload commands
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Local directory
    pub local: PathBuf,

    /// Remote URI (s3://, gs://, az://, or a directory used as a bucket)
    pub remote: String,

    #[command(flatten)]
    pub options: TransferOptions,
}

/// Arguments for the download command
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Remote URI (s3://, gs://, az://, or a directory used as a bucket)
    pub remote: String,

    /// Local directory
    pub local: PathBuf,

    #[command(flatten)]
    pub options: TransferOptions,
}

/// Arguments for the ls command
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote URI; its path is used as a raw key prefix
    pub remote: String,

    /// Configuration file path
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the mv command
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Object to rename
    pub from: String,

    /// New name (same bucket)
    pub to: String,

    /// Configuration file path
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the tag command
#[derive(Args, Debug)]
pub struct TagArgs {
    /// Object URI
    pub object: String,

    /// Tag name
    pub tag: String,

    /// Configuration file path
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show the configuration file path
    #[arg(long)]
    pub path: bool,

    /// Create default configuration file
    #[arg(long)]
    pub init: bool,
}

/// Load the config file named on the command line, or the default one
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sync() {
        let cli = Cli::parse_from(["artisync", "sync", "./out", "gs://bucket/run-1", "-n", "-j", "4"]);
        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.local, PathBuf::from("./out"));
                assert_eq!(args.remote, "gs://bucket/run-1");
                assert!(args.options.dry_run);
                assert_eq!(args.options.jobs, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "jobs = 2\nmodify_window = 1\n").unwrap();

        let options = TransferOptions {
            jobs: Some(16),
            no_align_mtime: true,
            config: Some(path),
            ..Default::default()
        };
        let config = options.to_config().unwrap();

        assert_eq!(config.jobs, 16);
        assert_eq!(config.modify_window, 1);
        assert!(!config.align_mtime);
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
