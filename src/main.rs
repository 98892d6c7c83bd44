//! tuneforge: a local music library and playback engine.
//!
//! The Indexer and Playback Service are library APIs; this binary is a
//! thin CLI front-end for manual exercising (§1 GUI Non-goal — there is no
//! GUI shipped here, matching the donor's own `tracing_subscriber` init
//! shape but replacing its `iced` application launch).

pub mod catalog;
pub mod config;
pub mod error;
pub mod indexer;
pub mod metadata_proxy;
pub mod model;
pub mod playback_service;
pub mod plugin_host;
pub mod track_list;
pub mod track_record;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::plugin_host::builtin::{BuiltinAudioOutput, BuiltinMetadataReader};
use crate::plugin_host::capability::PluginCapabilities;
use crate::plugin_host::PluginHost;
use crate::playback_service::PlaybackService;
use crate::transport::{PlaybackState, Transport};

#[derive(Parser)]
#[command(author, version, about = "local music library and playback engine", long_about = None)]
struct Cli {
    /// Library id; selects `<user_data_dir>/tuneforge/<id>/` for the
    /// catalog, thumbnails, and preferences (§6 "Configured paths").
    #[arg(long, default_value = "default", global = true)]
    library: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add `path` as a scan root and run one indexing pass to completion.
    Index { path: PathBuf },
    /// Run a one-shot scan over every already-configured path and exit.
    Scan,
    /// Play a single file through the built-in audio output.
    Play { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("tuneforge=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| error::Error::config(format!("failed to start async runtime: {e}")))?;

    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let library_dir = Config::library_dir(&cli.library)
        .ok_or_else(|| error::Error::config("could not determine a data directory for this platform"))?;
    std::fs::create_dir_all(&library_dir)?;

    let db_path = library_dir.join(catalog::CATALOG_FILE_NAME);
    let catalog = Catalog::open(&db_path, 2000).await?;

    let mut plugin_host = PluginHost::new();
    let mut builtin_caps = PluginCapabilities::default();
    builtin_caps.metadata_reader = Some(Arc::new(BuiltinMetadataReader));
    builtin_caps.audio_output = Some(Arc::new(parking_lot::Mutex::new(BuiltinAudioOutput::new()?)));
    plugin_host.register_builtin("tuneforge-builtin", builtin_caps);
    if let Some(dir) = &config.plugin_host.plugin_dir {
        let loaded = plugin_host.load_directory(dir)?;
        tracing::info!(count = loaded, dir = %dir.display(), "loaded external plugins");
    }
    let plugin_host = Arc::new(plugin_host);

    match cli.command {
        Commands::Index { path } => cmd_index(&catalog, &library_dir, &config, &plugin_host, path).await,
        Commands::Scan => cmd_scan(&catalog, &library_dir, &config, &plugin_host).await,
        Commands::Play { path } => cmd_play(&catalog, plugin_host, path).await,
    }
}

/// Adds `path` as a configured root, then runs the Indexer to completion
/// (one `Finished` signal) rather than leaving it running on its sleep
/// loop, matching the CLI's one-shot framing (§4.4 "Resolved for this
/// implementation").
async fn cmd_index(
    catalog: &Catalog,
    library_dir: &std::path::Path,
    config: &Config,
    plugin_host: &Arc<PluginHost>,
    path: PathBuf,
) -> Result<()> {
    catalog::paths::add_path(catalog.pool(), &path.to_string_lossy()).await?;
    run_one_scan(catalog, library_dir, config, plugin_host).await
}

async fn cmd_scan(
    catalog: &Catalog,
    library_dir: &std::path::Path,
    config: &Config,
    plugin_host: &Arc<PluginHost>,
) -> Result<()> {
    run_one_scan(catalog, library_dir, config, plugin_host).await
}

async fn run_one_scan(
    catalog: &Catalog,
    library_dir: &std::path::Path,
    config: &Config,
    plugin_host: &Arc<PluginHost>,
) -> Result<()> {
    let (handle, join) = indexer::spawn(
        catalog.clone(),
        library_dir.to_path_buf(),
        config.library.sync_timeout_seconds,
        Arc::clone(plugin_host),
    );

    let mut signals = handle.subscribe();

    loop {
        match signals.recv().await {
            Ok(indexer::IndexerSignal::Finished(count)) => {
                println!("indexed {count} tracks");
                break;
            }
            Ok(indexer::IndexerSignal::Progress(_)) => {
                tracing::info!("{}", handle.get_status().localized());
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    handle.stop();
    drop(handle);
    let _ = tokio::task::spawn_blocking(move || join.join()).await;
    Ok(())
}

async fn cmd_play(catalog: &Catalog, plugin_host: Arc<PluginHost>, path: PathBuf) -> Result<()> {
    let transport = Arc::new(Transport::new(Arc::clone(&plugin_host)));
    let _service = PlaybackService::spawn(catalog.pool().clone(), Arc::clone(&transport), &plugin_host);

    let uri = path.to_string_lossy().to_string();
    transport.start(&uri)?;

    println!("playing {uri}");
    while !matches!(transport.get_playback_state(), PlaybackState::Stopped) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Ok(())
}
