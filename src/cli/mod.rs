use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod demo;
pub mod history;
pub mod join;
pub mod reset;
pub mod status;
pub mod version;

use clipmesh::history::StateFile;
use config::{default_config_path, ClipMeshConfig};

#[derive(Parser)]
#[command(name = "clipmesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "End-to-end encrypted clipboard sync across a small device group",
    long_about = None
)]
pub struct Cli {
    /// Path to config file (default: ~/.local/share/clipmesh/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Path to state file (overrides `[state] path` from the config)
    #[arg(long, global = true)]
    pub state: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Propose a new sync code
    GenerateCode,

    /// Join a sync group and optionally share a text with it
    Join {
        /// Sync code (defaults to the saved one)
        #[arg(long)]
        code: Option<String>,

        /// Text to sync once connected
        #[arg(long)]
        text: Option<String>,
    },

    /// Show the saved sync group and history summary
    Status,

    /// Inspect or edit clipboard history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Forget the sync code and all history
    Reset {
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Run several in-process devices and sync a text between them
    Demo {
        /// Number of devices to start
        #[arg(long, default_value_t = 3)]
        devices: usize,

        /// Text sent by the first device
        #[arg(long, default_value = "copied text")]
        text: String,

        /// Sync code (a fresh one is generated if omitted)
        #[arg(long)]
        code: Option<String>,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum HistoryAction {
    /// List history, newest first
    List,

    /// Show the most recent item
    Latest,

    /// Delete one item by id
    Delete {
        /// Item id
        id: String,
    },

    /// Delete all items
    Clear,
}

/// Resolved config and state file for a command.
pub struct Context {
    pub config: ClipMeshConfig,
    pub state: StateFile,
}

impl Context {
    pub fn load(
        config_path: Option<&str>,
        state_path: Option<&str>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let config = ClipMeshConfig::load_or_create(&config_path)?;

        let state_path = state_path
            .map(PathBuf::from)
            .unwrap_or_else(|| config.state.path.clone());

        Ok(Self {
            config,
            state: StateFile::new(state_path),
        })
    }
}

/// Log level from the config file, if one exists at the selected path.
pub fn configured_log_level(cli: &Cli) -> Option<String> {
    let path = cli
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    if !path.exists() {
        return None;
    }
    ClipMeshConfig::load(&path).ok().map(|c| c.logging.level)
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let context = || Context::load(cli.config.as_deref(), cli.state.as_deref());

    match cli.command {
        Commands::GenerateCode => {
            println!("{}", clipmesh::sync::generate_code());
            Ok(())
        }
        Commands::Join { code, text } => join::execute(&context()?, code, text).await,
        Commands::Status => status::execute(&context()?),
        Commands::History { action } => history::execute(&context()?, action),
        Commands::Reset { yes } => reset::execute(&context()?, yes),
        Commands::Demo {
            devices,
            text,
            code,
        } => demo::execute(&context()?, devices, text, code).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
