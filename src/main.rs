mod cli;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{LogLevel, Verbosity};
use fleet::agent::ConfigPatch;
use macros_rs::{str, string};

#[derive(Copy, Clone, Debug, Default)]
struct NoneLevel;
impl LogLevel for NoneLevel {
    fn default() -> Option<log::Level> { None }
}

#[derive(Parser)]
#[command(version = str!(cli::get_version()))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: Verbosity<NoneLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a remote agent
    #[command(visible_alias = "register")]
    Add {
        /// Agent host or ip
        #[arg(long)]
        host: String,
        /// Agent port
        #[arg(long)]
        port: u16,
        /// Agent api key
        #[arg(long)]
        key: String,
        /// Free-text label
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Change an agent's address, key or remarks
    Edit {
        /// Agent id
        id: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Remove an agent
    #[command(visible_alias = "rm", visible_alias = "delete")]
    Remove {
        /// Agent id
        id: String,
    },
    /// List all agents
    #[command(visible_alias = "ls")]
    List {
        /// Format output
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
    /// Reconnect an agent
    Link {
        /// Agent id
        id: String,
    },
    /// Send one command to one agent
    Relay {
        /// Agent id
        id: String,
        /// Protocol command, e.g. instance/select
        command: String,
        /// JSON parameters
        #[arg(long)]
        params: Option<String>,
    },
    /// Send one command to every agent
    Broadcast {
        /// Protocol command, e.g. info/overview
        command: String,
        /// JSON parameters
        #[arg(long)]
        params: Option<String>,
        /// Only print successful responses
        #[arg(long)]
        successes: bool,
    },
    /// Agents joined with their instance overview
    Overview {
        /// Protocol command to aggregate
        #[arg(long, default_value_t = string!("instance/overview"))]
        command: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut env = env_logger::Builder::new();
    env.filter_level(cli.verbose.log_level_filter()).init();

    let registry = cli::open();

    match &cli.command {
        Commands::Add { host, port, key, remarks } => cli::add(&registry, host, *port, key, remarks).await,
        Commands::Edit { id, host, port, key, remarks } => cli::edit(
            &registry,
            id,
            ConfigPatch {
                host: host.clone(),
                port: *port,
                credential: key.clone(),
                remarks: remarks.clone(),
            },
        ),
        Commands::Remove { id } => cli::remove(&registry, id),
        Commands::List { format } => cli::list(&registry, format).await,
        Commands::Link { id } => cli::link(&registry, id).await,
        Commands::Relay { id, command, params } => cli::relay(&registry, id, command, params).await,
        Commands::Broadcast { command, params, successes } => cli::broadcast(&registry, command, params, *successes).await,
        Commands::Overview { command } => cli::overview(&registry, command).await,
    };

    registry.flush().await;
}
