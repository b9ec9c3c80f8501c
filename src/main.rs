//! stow - drive the stowage scheduler from the command line.
//!
//! Usage:
//!   stow import <DIR>             Import a directory into a fresh workspace
//!   stow archive <DIR> -o <ZIP>   Import a directory, then download it as a zip
//!   stow --json ...               Print events as JSON lines
//!   stow --help                   Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use jwalk::WalkDir;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use stowage_core::{DuplicatePolicy, FsPath, SchedulerConfig, WorkspaceHandle};
use stowage_ops::memory::{MemoryProvider, MemoryWorkspace};
use stowage_ops::{
    ImportSource, LocalFile, LocalFileDestination, OperationEvent, Scheduler, Workspace,
};

#[derive(Parser)]
#[command(
    name = "stow",
    version,
    about = "Queue bulk transfers against a versioned workspace",
    long_about = "stow seeds an in-memory workspace from a local directory and runs \
                  transfer operations against it through the stowage scheduler, \
                  printing every lifecycle event as it happens."
)]
struct Cli {
    /// Scheduler configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a local directory into a fresh workspace
    Import {
        /// Directory to import
        dir: PathBuf,

        /// Workspace folder to import into
        #[arg(long, default_value = "/")]
        into: String,

        /// Collision policy: ignore_existing, add_counter or replace
        #[arg(short, long, default_value = "ignore_existing")]
        policy: DuplicatePolicy,
    },

    /// Import a local directory, then download it as one zip archive
    Archive {
        /// Directory to archive
        dir: PathBuf,

        /// Zip file to write
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Scheduler wired to a single in-memory workspace.
struct Session {
    workspace: MemoryWorkspace,
    handle: WorkspaceHandle,
    scheduler: Scheduler,
    events: UnboundedReceiver<OperationEvent>,
    json: bool,
}

impl Session {
    fn new(name: &str, config: SchedulerConfig, json: bool) -> Self {
        let provider = Arc::new(MemoryProvider::new());
        let workspace = MemoryWorkspace::with_chunk_size(name, config.chunk_size);
        let handle = provider.insert(workspace.clone());
        let scheduler = Scheduler::with_config(provider, config);
        let (_, events) = scheduler.subscribe_channel();
        Self {
            workspace,
            handle,
            scheduler,
            events,
            json,
        }
    }

    async fn import(&mut self, dir: &Path, into: FsPath, policy: DuplicatePolicy) -> Result<()> {
        let sources = collect_sources(dir)?;
        if sources.is_empty() {
            eprintln!("Nothing to import in {}", dir.display());
        }
        self.scheduler
            .import(self.handle, sources, into, policy)
            .await
            .ok_or_else(|| eyre!("Workspace rejected the import"))?;
        self.wait().await
    }

    async fn archive(&mut self, output: &Path) -> Result<()> {
        let root = FsPath::root();
        let tree = self
            .workspace
            .list_tree(&root)
            .await
            .context("Failed to list workspace")?;
        let destination = Arc::new(LocalFileDestination::new(output));
        self.scheduler
            .download_archive(self.handle, vec![tree], destination, root)
            .await
            .ok_or_else(|| eyre!("Workspace rejected the archive download"))?;
        self.wait().await
    }

    /// Print events until the scheduler is idle; fail if any operation did.
    async fn wait(&mut self) -> Result<()> {
        let mut failure = None;
        while let Some(event) = self.events.recv().await {
            if self.json {
                print_json(&event)?;
            } else {
                print_text(&event);
            }
            match &event {
                OperationEvent::Failed { error, .. } => failure = Some(error.message.clone()),
                OperationEvent::Cancelled(operation) => {
                    failure = Some(format!("{} was cancelled", operation.summary()));
                }
                OperationEvent::AllFinished => break,
                _ => {}
            }
        }
        match failure {
            Some(message) => Err(eyre!(message)),
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Import { dir, into, policy } => {
            let dir = dir.canonicalize().context("Invalid path")?;
            let into = FsPath::parse(&into).context("Invalid workspace folder")?;
            let mut session = Session::new(&workspace_name(&dir), config, cli.json);
            let result = session.import(&dir, into, policy).await;
            session.scheduler.stop().await;
            result
        }
        Command::Archive { dir, output } => {
            let dir = dir.canonicalize().context("Invalid path")?;
            let mut session = Session::new(&workspace_name(&dir), config, cli.json);
            let mut result = session
                .import(&dir, FsPath::root(), DuplicatePolicy::Replace)
                .await;
            if result.is_ok() {
                result = session.archive(&output).await;
                if result.is_ok() && !cli.json {
                    eprintln!("Wrote {}", output.display());
                }
            }
            session.scheduler.stop().await;
            result
        }
    }
}

/// Read a JSON configuration file, or fall back to defaults.
fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let Some(path) = path else {
        return Ok(SchedulerConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: SchedulerConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    config
        .validate()
        .map_err(|e| eyre!("Invalid configuration in {}: {e}", path.display()))?;
    Ok(config)
}

fn workspace_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string())
}

/// Every regular file below `dir`, keyed by its `/`-separated relative path.
fn collect_sources(dir: &Path) -> Result<Vec<ImportSource>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).skip_hidden(false).sort(true) {
        let entry = entry.context("Failed to walk directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(dir)
            .context("Walked outside the import directory")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        sources.push(ImportSource::new(relative, size, Arc::new(LocalFile::new(path))));
    }
    Ok(sources)
}

fn print_text(event: &OperationEvent) {
    match event {
        OperationEvent::Added(op) => println!("queued    {}", op.summary()),
        OperationEvent::Started(op) => println!("started   {}", op.summary()),
        OperationEvent::Progress { progress, .. } => {
            let global = &progress.global;
            println!(
                "{:>3}%      {} / {}  [{}/{}] {}",
                global.percent,
                format_size(global.done),
                format_size(global.total),
                global.current_file + 1,
                global.file_count,
                progress.file.name
            );
        }
        OperationEvent::Finalizing(op) => println!("finishing {}", op.summary()),
        OperationEvent::Finished(op) => println!("done      {}", op.summary()),
        OperationEvent::Cancelled(op) => println!("cancelled {}", op.summary()),
        OperationEvent::Failed { operation, error } => {
            println!("failed    {}: {}", operation.summary(), error.message);
        }
        OperationEvent::AllFinished => {}
    }
}

fn print_json(event: &OperationEvent) -> Result<()> {
    let mut line = json!({ "event": event.kind().as_ref() });
    if let Some(operation) = event.operation() {
        line["operation"] = json!(operation.id.to_string());
        line["type"] = json!(operation.operation_type());
        line["workspace"] = json!(operation.workspace_name);
    }
    match event {
        OperationEvent::Progress { progress, .. } => line["progress"] = serde_json::to_value(progress)?,
        OperationEvent::Failed { error, .. } => line["error"] = serde_json::to_value(error)?,
        _ => {}
    }
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
