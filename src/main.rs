//! Trellis CLI - declarative cluster management for Talos Linux

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trellis::apply::{with_cascading_machine_destruction, ApplyOptions, Executor};
use trellis::compiler;
use trellis::diff;
use trellis::store::InMemoryStore;
use trellis::template::Template;

/// Trellis - declarative cluster management for Talos Linux
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about, long_about = None)]
struct Cli {
    /// Path of the local cluster state snapshot
    ///
    /// Mutating commands load the store from this file and write it
    /// back after a successful run. A missing file is an empty store.
    #[arg(
        long,
        global = true,
        env = "TRELLIS_STATE",
        default_value = ".trellis-state.yaml"
    )]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a cluster template without touching any state
    Validate(ValidateArgs),

    /// Compile a template and print the resources it produces
    Render(RenderArgs),

    /// Show what a sync would change, without mutating anything
    Diff(DiffArgs),

    /// Converge the cluster to the template
    Sync(SyncArgs),

    /// Tear down a cluster and everything belonging to it
    Delete(DeleteArgs),
}

/// Validate mode arguments
#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Path to the cluster template file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
}

/// Render mode arguments
#[derive(Parser, Debug)]
struct RenderArgs {
    /// Path to the cluster template file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Output format for the compiled resources
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

/// Diff mode arguments
#[derive(Parser, Debug)]
struct DiffArgs {
    /// Path to the cluster template file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Also print resource bodies and field-level diffs
    #[arg(short, long)]
    verbose: bool,
}

/// Sync mode arguments
#[derive(Parser, Debug)]
struct SyncArgs {
    /// Path to the cluster template file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Compute and print the changes without applying them
    #[arg(long)]
    dry_run: bool,

    /// Also print resource bodies and field-level diffs
    #[arg(short, long)]
    verbose: bool,
}

/// Delete mode arguments
#[derive(Parser, Debug)]
struct DeleteArgs {
    /// Template naming the cluster to delete
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Name of the cluster to delete, instead of a template
    #[arg(long)]
    cluster: Option<String>,

    /// Also destroy disconnected machines and their config patches
    #[arg(long)]
    destroy_disconnected_machines: bool,

    /// Compute and print the teardown without applying it
    #[arg(long)]
    dry_run: bool,

    /// Also print resource bodies
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Multi-document YAML, one document per resource
    Yaml,
    /// One JSON array holding every resource
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // First interrupt aborts after the current step; teardown waits are
    // cancellation points, so a stuck finalizer cannot hold the CLI
    // hostage.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, aborting");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Render(args) => run_render(args),
        Commands::Diff(args) => run_diff(&cli.state, args).await,
        Commands::Sync(args) => run_sync(&cli.state, args, cancel).await,
        Commands::Delete(args) => run_delete(&cli.state, args, cancel).await,
    }
}

/// Validate a template and report every problem found
fn run_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let template = load_template(&args.file)?;
    template.validate()?;
    let cluster = template.cluster_name().unwrap_or("unknown");
    println!("template for cluster {cluster:?} is valid");
    Ok(())
}

/// Compile a template and print the resulting resources
fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let template = load_template(&args.file)?;
    let resources = compiler::compile(&template)?;

    match args.output {
        OutputFormat::Yaml => {
            for resource in &resources {
                println!("---");
                print!("{}", serde_yaml::to_string(resource)?);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&resources)?);
        }
    }
    Ok(())
}

/// Compile, diff against the store and print the change set
async fn run_diff(state: &Path, args: DiffArgs) -> anyhow::Result<()> {
    let template = load_template(&args.file)?;
    let resources = compiler::compile(&template)?;
    let cluster = cluster_name(&template)?;

    let store = load_store(state)?;
    let changes = diff::diff(&store, &cluster, &resources).await?;
    print!("{}", diff::render(&changes, args.verbose)?);
    Ok(())
}

/// Compile, diff and apply, then persist the store snapshot
async fn run_sync(state: &Path, args: SyncArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let template = load_template(&args.file)?;
    let resources = compiler::compile(&template)?;
    let cluster = cluster_name(&template)?;

    let store = load_store(state)?;
    let changes = diff::diff(&store, &cluster, &resources).await?;
    print!("{}", diff::render(&changes, args.verbose)?);
    if changes.is_empty() {
        return Ok(());
    }

    Executor::with_cancellation(&store, cancel)
        .apply(&changes, ApplyOptions { dry_run: args.dry_run })
        .await?;

    if args.dry_run {
        println!("dry run, nothing was applied");
    } else {
        save_store(state, &store)?;
        println!("cluster {cluster} synced");
    }
    Ok(())
}

/// Tear down a whole cluster, optionally cascading to its machines
async fn run_delete(
    state: &Path,
    args: DeleteArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let cluster = match (&args.cluster, &args.file) {
        (Some(name), _) => name.clone(),
        (None, Some(file)) => cluster_name(&load_template(file)?)?,
        (None, None) => {
            return Err(anyhow::anyhow!("either --cluster or --file is required"));
        }
    };

    let store = load_store(state)?;

    // an empty target turns every live resource into a phased destroy
    let mut changes = diff::diff(&store, &cluster, &[]).await?;
    if args.destroy_disconnected_machines {
        changes = with_cascading_machine_destruction(&store, changes).await?;
    }

    print!("{}", diff::render(&changes, args.verbose)?);
    if changes.is_empty() {
        return Ok(());
    }

    Executor::with_cancellation(&store, cancel)
        .apply(&changes, ApplyOptions { dry_run: args.dry_run })
        .await?;

    if args.dry_run {
        println!("dry run, nothing was applied");
    } else {
        save_store(state, &store)?;
        println!("cluster {cluster} deleted");
    }
    Ok(())
}

fn load_template(path: &Path) -> anyhow::Result<Template> {
    Template::load(path).map_err(|e| anyhow::anyhow!("failed to load template {path:?}: {e}"))
}

fn cluster_name(template: &Template) -> anyhow::Result<String> {
    template
        .cluster_name()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("template has no Cluster document"))
}

fn load_store(path: &Path) -> anyhow::Result<InMemoryStore> {
    match std::fs::read_to_string(path) {
        Ok(contents) => InMemoryStore::from_snapshot(&contents)
            .map_err(|e| anyhow::anyhow!("failed to load state {path:?}: {e}")),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(InMemoryStore::new()),
        Err(err) => Err(anyhow::anyhow!("failed to read state {path:?}: {err}")),
    }
}

fn save_store(path: &Path, store: &InMemoryStore) -> anyhow::Result<()> {
    let snapshot = serde_yaml::to_string(&store.snapshot())?;
    std::fs::write(path, snapshot)
        .map_err(|e| anyhow::anyhow!("failed to write state {path:?}: {e}"))
}
