// flagforge-cli/src/main.rs
// ============================================================================
// Module: Flagforge CLI Entry Point
// Description: Command dispatcher for the Hub, Edge, key admin, and config
//              documentation operations.
// Purpose: One binary operators use to run and administer a Flagforge
//          deployment.
// Dependencies: clap, flagforge-config, flagforge-core, flagforge-edge,
//               flagforge-hub, flagforge-store-sqlite, thiserror, tokio.
// ============================================================================

//! ## Overview
//! `flagforge-cli` never implements control-plane or data-plane logic
//! itself: every subcommand loads a [`flagforge_config::FlagforgeConfig`],
//! wires the already-built crates together, and hands off. Exit codes are
//! significant for operational tooling: `0` normal, `1` config error, `2`
//! the durable store is unreachable at startup, `3` a dirty migration was
//! detected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use flagforge_broker::ChangeBroker;
use flagforge_config::FlagforgeConfig;
use flagforge_core::ApiKeyStore as _;
use flagforge_core::ChangeSink;
use flagforge_core::model::Permission;
use flagforge_hub::AppState;
use flagforge_hub::PreloadedTable;
use flagforge_hub::ResponseCache;
use flagforge_hub::SessionRegistry;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "flagforge", arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Hub control-plane/data-plane operations.
    Hub {
        /// Selected hub subcommand.
        #[command(subcommand)]
        command: HubCommand,
    },
    /// Edge data-plane operations.
    Edge {
        /// Selected edge subcommand.
        #[command(subcommand)]
        command: EdgeCommand,
    },
    /// API key administration.
    Keys {
        /// Selected key subcommand.
        #[command(subcommand)]
        command: KeysCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Hub subcommands.
#[derive(Subcommand, Debug)]
enum HubCommand {
    /// Starts the Hub (store + broker + RPC surface + sync server).
    Serve(ConfigArg),
}

/// Edge subcommands.
#[derive(Subcommand, Debug)]
enum EdgeCommand {
    /// Starts an Edge process syncing from a Hub.
    Serve(EdgeServeCommand),
}

/// Key administration subcommands.
#[derive(Subcommand, Debug)]
enum KeysCommand {
    /// Creates a new API key and prints its plaintext once.
    Create(KeysCreateCommand),
}

/// Config utility subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Renders the config schema to Markdown.
    Docs(ConfigDocsCommand),
}

/// A bare `--config <path>` argument shared by commands that only need the
/// full [`FlagforgeConfig`].
#[derive(Args, Debug)]
struct ConfigArg {
    /// Config file path (defaults to `flagforge.toml` or the
    /// `FLAGFORGE_CONFIG` environment variable).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `edge serve`.
#[derive(Args, Debug)]
struct EdgeServeCommand {
    /// Config file path; only `[edge]` and `[logging]` are consulted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// API key this Edge authenticates to the Hub's sync server with.
    #[arg(long, value_name = "KEY")]
    api_key: String,
    /// Overrides `edge.hub_url` from the config file.
    #[arg(long, value_name = "URL")]
    hub_url: Option<String>,
    /// Socket address this Edge's RPC surface binds to.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8081")]
    bind_addr: String,
}

/// Arguments for `keys create`.
#[derive(Args, Debug)]
struct KeysCreateCommand {
    /// Config file path, used to locate the durable store.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Project the new key is scoped to.
    #[arg(long, value_name = "PROJECT")]
    project: String,
    /// Environment the new key is scoped to.
    #[arg(long, value_name = "ENV")]
    env: String,
    /// One or more permissions the key is granted.
    #[arg(long = "permissions", value_enum, value_delimiter = ',', num_args = 1..)]
    permissions: Vec<CliPermission>,
}

/// `clap`-facing mirror of [`Permission`] (which is not itself a
/// [`ValueEnum`], since `flagforge-core` has no `clap` dependency).
#[derive(ValueEnum, Copy, Clone, Debug)]
enum CliPermission {
    /// May read flag/segment/rollout definitions.
    Read,
    /// May call evaluation RPCs.
    Evaluate,
    /// May mutate flags/segments/rollouts.
    Write,
    /// May manage API keys and project/environment settings.
    Admin,
}

impl From<CliPermission> for Permission {
    fn from(value: CliPermission) -> Self {
        match value {
            CliPermission::Read => Self::Read,
            CliPermission::Evaluate => Self::Evaluate,
            CliPermission::Write => Self::Write,
            CliPermission::Admin => Self::Admin,
        }
    }
}

/// Arguments for `config docs`.
#[derive(Args, Debug)]
struct ConfigDocsCommand {
    /// Output file path; prints to stdout when omitted.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper, carrying the exit code its message implies.
#[derive(Debug, Error)]
enum CliError {
    /// Config could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),
    /// The durable store could not be opened at startup.
    #[error("store unreachable: {0}")]
    Store(String),
    /// A required operation against the store failed.
    #[error("operation failed: {0}")]
    Operation(String),
    /// Writing CLI output failed.
    #[error("output error: {0}")]
    Output(String),
}

impl CliError {
    const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(1),
            Self::Store(_) => ExitCode::from(2),
            Self::Operation(_) | Self::Output(_) => ExitCode::FAILURE,
        }
    }
}

type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ignored = write_stderr_line(&err.to_string());
            err.exit_code()
        }
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Hub { command: HubCommand::Serve(args) } => command_hub_serve(args).await,
        Commands::Edge { command: EdgeCommand::Serve(args) } => command_edge_serve(args).await,
        Commands::Keys { command: KeysCommand::Create(args) } => command_keys_create(&args),
        Commands::Config { command: ConfigCommand::Docs(args) } => command_config_docs(&args),
    }
}

// ============================================================================
// SECTION: Hub Serve
// ============================================================================

async fn command_hub_serve(args: ConfigArg) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    init_logging(&config.logging);

    let broker = Arc::new(ChangeBroker::builder().channel_capacity(config.broker.channel_capacity).build());
    let (flag_store, api_key_store) = flagforge_store_sqlite::open_stores(&config.store, Some(Arc::clone(&broker) as Arc<dyn ChangeSink>))
        .map_err(|err| CliError::Store(err.to_string()))?;

    let state = AppState {
        flag_store: Arc::new(flag_store),
        api_key_store: Arc::new(api_key_store),
        broker,
        response_cache: Arc::new(ResponseCache::new(config.cache.shard_count, flagforge_hub::DEFAULT_TTL)),
        preloaded_table: Arc::new(PreloadedTable::empty()),
        session_registry: Arc::new(SessionRegistry::new()),
        auth: config.auth.clone(),
    };

    flagforge_hub::serve(&config, state).await.map_err(|err| CliError::Operation(err.to_string()))
}

// ============================================================================
// SECTION: Edge Serve
// ============================================================================

async fn command_edge_serve(args: EdgeServeCommand) -> CliResult<()> {
    let mut config = load_config(args.config.as_deref())?;
    init_logging(&config.logging);

    if let Some(hub_url) = args.hub_url {
        config.edge.hub_url = hub_url;
    }

    let cache = Arc::new(flagforge_edge::EdgeCache::new(config.edge.cache_capacity, DEFAULT_EDGE_TTL_MS));
    let state = flagforge_edge::EdgeState { cache };

    flagforge_edge::serve(&args.bind_addr, config.edge, args.api_key, state)
        .await
        .map_err(|err| CliError::Operation(err.to_string()))
}

/// Default per-entry TTL the Edge Cache applies to snapshot-derived
/// entries, matching the Hub Response Cache's own default lifetime.
const DEFAULT_EDGE_TTL_MS: u64 = 5 * 60 * 1000;

// ============================================================================
// SECTION: Keys Create
// ============================================================================

fn command_keys_create(args: &KeysCreateCommand) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;

    let (_flag_store, api_key_store) =
        flagforge_store_sqlite::open_stores(&config.store, None).map_err(|err| CliError::Store(err.to_string()))?;

    let project_id = flagforge_core::model::ProjectId::new(args.project.clone());
    let environment_key = flagforge_core::model::EnvironmentKey::new(args.env.clone());
    let permissions: Vec<Permission> = args.permissions.iter().copied().map(Permission::from).collect();

    let created =
        api_key_store.create_api_key(&project_id, &environment_key, &permissions, None).map_err(|err| CliError::Operation(err.to_string()))?;

    write_stdout_line(&format!(
        "created api key {} for project={} env={} permissions={:?}",
        created.record.id, args.project, args.env, created.record.permissions
    ))
    .map_err(|err| CliError::Output(err.to_string()))?;
    write_stdout_line(&format!("plaintext (shown once): {}", created.plaintext)).map_err(|err| CliError::Output(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Config Docs
// ============================================================================

fn command_config_docs(args: &ConfigDocsCommand) -> CliResult<()> {
    match &args.output {
        Some(path) => flagforge_config::docs::write_config_docs(path).map_err(|err| CliError::Operation(err.to_string())),
        None => {
            let markdown = flagforge_config::docs::config_docs_markdown();
            write_stdout_line(&markdown).map_err(|err| CliError::Output(err.to_string()))
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn load_config(path: Option<&std::path::Path>) -> CliResult<FlagforgeConfig> {
    FlagforgeConfig::load(path).map_err(|err| CliError::Config(err.to_string()))
}

/// Installs the global `tracing` subscriber from `[logging]`. Only called
/// once per process, before any other subsystem logs.
fn init_logging(logging: &flagforge_config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        let _ignored = subscriber.json().try_init();
    } else {
        let _ignored = subscriber.try_init();
    }
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}
