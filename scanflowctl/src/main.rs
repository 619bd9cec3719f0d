//! `scanflowctl`: run library scans against local directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use scanflow_config::{ScannerConfig, ScannerConfigSource};
use scanflow_core::scan::{
    InMemoryLibraryRepository, InProcScanEventBus, JobGraph, LibraryRepository,
    RealFs, ScanCoordinator,
};
use scanflow_model::{
    LibraryId, LibraryRecord, ScanEvent, ScanIdentity, ScanRequest, UserId,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scanflowctl", about = "Scan media library folders through the scan job graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan one or more directories as a single library
    Scan {
        /// Content location to scan; repeat for several roots
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,
        /// Include hidden files and directories
        #[arg(long)]
        include_hidden: bool,
        /// Scanner config file (TOML or JSON); defaults to $SCANNER_CONFIG_PATH
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print events and the summary as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the stages of the library scan graph
    Graph,
}

fn init_tracing(config: &ScannerConfig) {
    let fallback = config.log_filter.clone().unwrap_or_else(|| "info".into());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<(ScannerConfig, ScannerConfigSource)> {
    match path {
        Some(path) => {
            let config = ScannerConfig::load_from_file(path)?;
            Ok((config, ScannerConfigSource::File(path.to_path_buf())))
        }
        None => ScannerConfig::load_from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            paths,
            include_hidden,
            config,
            json,
        } => {
            let (config, source) = load_config(config.as_deref())?;
            init_tracing(&config);
            info!(?source, "scanner config loaded");
            run_scan(paths, include_hidden, config, json).await
        }
        Command::Graph => {
            let graph = JobGraph::library_scan()?;
            print_graph(&graph);
            Ok(())
        }
    }
}

fn print_graph(graph: &JobGraph) {
    for stage in graph.topological_order() {
        let children = graph.children_of(&stage);
        if children.is_empty() {
            println!("{stage} (terminal)");
        } else {
            let names: Vec<String> = children.iter().map(ToString::to_string).collect();
            println!("{stage} -> {}", names.join(", "));
        }
    }
}

async fn run_scan(
    paths: Vec<PathBuf>,
    include_hidden: bool,
    config: ScannerConfig,
    json: bool,
) -> Result<()> {
    let mut locations = Vec::with_capacity(paths.len());
    for path in &paths {
        let root = path
            .canonicalize()
            .with_context(|| format!("failed to resolve content location {}", path.display()))?;
        locations.push(root.to_string_lossy().to_string());
    }

    let library_id = LibraryId::new();
    let repository = InMemoryLibraryRepository::new();
    repository
        .insert(LibraryRecord {
            id: library_id,
            name: "cli".into(),
            content_locations: locations.clone(),
            indexed_files: Vec::new(),
        })
        .await;

    let bus = Arc::new(InProcScanEventBus::new(config.scan.events.channel_capacity));
    let printer = tokio::spawn(print_events(bus.subscribe(), json));

    let coordinator = ScanCoordinator::new(
        Arc::new(repository.clone()),
        bus.clone(),
        Arc::new(RealFs),
        config.scan,
    )?;
    let mut request = ScanRequest::new(library_id, ScanIdentity::for_user(UserId::new()));
    if include_hidden {
        request = request.with_hidden(true);
    }

    let handle = coordinator.spawn(request);
    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            token.cancel();
        }
    });
    let outcome = handle.join().await;
    interrupt.abort();

    // Closing every sender ends the printer.
    drop(coordinator);
    drop(bus);
    printer.await.context("event printer panicked")?;

    match outcome {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => return Err(anyhow!("scan cancelled")),
        Err(err) => return Err(err).context("scan failed"),
    }

    let stored = repository
        .get_by_id(library_id)
        .await?
        .ok_or_else(|| anyhow!("library {library_id} vanished during the scan"))?;
    let indexed = stored.indexed_files.len();
    if json {
        let summary = serde_json::json!({
            "type": "Summary",
            "payload": {
                "library_id": library_id.to_string(),
                "locations": locations,
                "indexed_files": indexed,
            }
        });
        println!("{summary}");
    } else {
        println!(
            "scan finished: {indexed} files indexed in {} location(s)",
            locations.len()
        );
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<ScanEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to encode event"),
            },
            Ok(event) => println!("{}", describe(&event)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe(event: &ScanEvent) -> String {
    match event {
        ScanEvent::JobProgressChanged(changed) => format!(
            "{:<18} {} {}/{}",
            event.event_name(),
            changed.progress.stage_name(),
            changed.progress.completed_items(),
            changed.progress.total_items()
        ),
        ScanEvent::ScanProgressChanged(changed) => {
            format!("{:<18} {} done", event.event_name(), changed.stage)
        }
        ScanEvent::ScanFailed(failed) => format!(
            "{:<18} {}: {}",
            event.event_name(),
            failed
                .stage
                .as_ref()
                .map_or_else(|| "library".to_string(), ToString::to_string),
            failed.reason
        ),
        ScanEvent::ScanFinished(finished) => {
            format!("{:<18} {}", event.event_name(), finished.meta.identity)
        }
    }
}
