//! artisync - keep object-store prefixes in step with local directories

use anyhow::{bail, Context};
use artisync::cli::{self, Cli, Commands, ConfigArgs, DownloadArgs, SyncArgs};
use artisync::config::Config;
use artisync::progress::{format_size, print_summary};
use artisync::storage;
use artisync::uri::Location;
use artisync::SyncEngine;
use clap::Parser;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json);

    // Handle Ctrl+C gracefully
    let cancel = CancellationToken::new();
    let shutdown = setup_shutdown_handler(cancel.clone());

    let result = run(cli.command, cancel).await;

    drop(shutdown);
    result
}

async fn run(command: Commands, cancel: CancellationToken) -> anyhow::Result<()> {
    match command {
        Commands::Sync(args) => {
            let (engine, prefix) = engine_for(&args, cancel).await?;
            let stats = engine.sync_dir_upload(&args.local, &prefix).await?;
            print_summary("Sync", &stats, engine.config().dry_run);
        }

        Commands::Upload(args) => {
            let (engine, prefix) = engine_for(&args, cancel).await?;
            let stats = engine.upload_dir(&args.local, &prefix).await?;
            print_summary("Upload", &stats, engine.config().dry_run);
        }

        Commands::Download(args) => handle_download(args, cancel).await?,

        Commands::Ls(args) => {
            let config = cli::load_config(args.config.as_ref())?;
            let location = Location::parse(&args.remote)?;
            let (storage, prefix) = storage::open(&location, &config).await?;

            let mut objects = storage.list(&prefix);
            while let Some(object) = objects.try_next().await? {
                let modified = object
                    .info
                    .modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                println!("{:>12}  {:>10}  {}", format_size(object.info.size), modified, object.key);
            }
        }

        Commands::Mv(args) => {
            let config = cli::load_config(args.config.as_ref())?;
            let from = Location::parse(&args.from)?;
            let to = Location::parse(&args.to)?;
            if !from.same_store(&to) {
                bail!("{} and {} are not in the same bucket", from, to);
            }

            let (storage, old_key) = storage::open(&from, &config).await?;
            storage
                .rename(&old_key, to.prefix())
                .await
                .with_context(|| format!("renaming {} to {}", from, to))?;
            tracing::info!(from = %from, to = %to, "Renamed");
        }

        Commands::Tag(args) => {
            let config = cli::load_config(args.config.as_ref())?;
            let location = Location::parse(&args.object)?;
            let (storage, key) = storage::open(&location, &config).await?;
            println!("{}", storage.get_metadata_tag(&key, &args.tag).await?);
        }

        Commands::Config(args) => handle_config_command(args)?,
    }

    Ok(())
}

/// Open the remote of a sync or upload and build an engine for it
async fn engine_for(
    args: &SyncArgs,
    cancel: CancellationToken,
) -> anyhow::Result<(SyncEngine, String)> {
    let config = args.options.to_config()?;
    let location = Location::parse(&args.remote)?;
    let (storage, prefix) = storage::open(&location, &config).await?;

    tracing::info!(
        local = %args.local.display(),
        remote = %location,
        dry_run = config.dry_run,
        "Opened remote"
    );

    Ok((
        SyncEngine::new(config, storage).with_cancellation(cancel),
        prefix,
    ))
}

async fn handle_download(args: DownloadArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = args.options.to_config()?;
    let location = Location::parse(&args.remote)?;
    let (storage, prefix) = storage::open(&location, &config).await?;

    let engine = SyncEngine::new(config, storage).with_cancellation(cancel);
    let stats = engine.download_dir(&prefix, &args.local).await?;
    print_summary("Download", &stats, engine.config().dry_run);
    Ok(())
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("artisync=info"),
        1 => EnvFilter::new("artisync=debug"),
        2 => EnvFilter::new("artisync=trace"),
        _ => EnvFilter::new("trace"),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::sync::oneshot::Sender<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Received Ctrl+C, cancelling...");
                cancel.cancel();
            }
            _ = rx => {
                // Normal shutdown
            }
        }
    });

    tx
}

fn handle_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    if args.path {
        println!("{}", Config::default_config_path()?.display());
    } else if args.init {
        let config = Config::default();
        config.save()?;
        println!(
            "Created default configuration at {}",
            Config::default_config_path()?.display()
        );
    } else {
        // Show current config
        let config = Config::load()?;
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
