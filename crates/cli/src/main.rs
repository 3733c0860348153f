//! memtier CLI — the main entry point.
//!
//! Commands:
//! - `init`     — Write the default config file
//! - `config`   — Show or validate the configuration
//! - `memory`   — Add, inspect and organise stored memories
//! - `prompt`   — Build a budgeted prompt from stored memories
//! - `assemble` — Build a prompt from a JSON request (file or stdin)

use clap::{Args, Parser, Subcommand};
use memtier_core::memory::MemoryTier;
use memtier_core::strategy::SelectorKind;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "memtier",
    about = "memtier — token-budgeted tiered memory for AI agent prompts",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use this config file instead of ~/.memtier/config.toml
    #[arg(long, global = true, env = "MEMTIER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Stored memory management
    Memory {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Build a budgeted prompt from stored memories
    Prompt {
        #[command(flatten)]
        scope: ScopeArgs,

        /// System message placed first in the prompt
        #[arg(short, long, default_value = "")]
        system: String,

        /// The user query placed last in the prompt
        #[arg(short, long)]
        query: String,

        /// Total token budget (defaults to the configured global limit)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Most recent conversation turns to consider
        #[arg(long, default_value_t = 10)]
        max_turns: usize,

        /// Leave working memories out
        #[arg(long)]
        no_working: bool,

        /// Leave long-term memories out
        #[arg(long)]
        no_long_term: bool,

        /// Selection strategy (priority | relevance)
        #[arg(long)]
        selector: Option<SelectorKind>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a prompt from a JSON request
    Assemble {
        /// Request file; reads stdin when omitted or `-`
        input: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

/// Session and component the command acts on.
#[derive(Args, Clone)]
struct ScopeArgs {
    /// Session id
    #[arg(long, global = true, default_value = "default", env = "MEMTIER_SESSION")]
    session: String,

    /// Component id
    #[arg(long, global = true, default_value = "default")]
    component: String,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Store a new memory
    Add {
        content: String,

        #[arg(short, long, default_value = "working")]
        tier: MemoryTier,

        /// Importance in [0, 1] (defaults to the tier setting)
        #[arg(short, long)]
        importance: Option<f32>,

        /// Metadata entry as key=value (repeatable)
        #[arg(short, long = "meta")]
        meta: Vec<String>,
    },

    /// Show one memory as JSON
    Get {
        id: String,

        #[arg(short, long)]
        tier: Option<MemoryTier>,
    },

    /// List memories, most recently accessed first
    List {
        #[arg(short, long)]
        tier: Option<MemoryTier>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Delete a memory
    Delete {
        id: String,

        #[arg(short, long)]
        tier: Option<MemoryTier>,
    },

    /// Find memories whose metadata matches every key=value filter
    Search {
        /// Filter entry as key=value (repeatable)
        #[arg(short, long = "meta", required = true)]
        meta: Vec<String>,

        #[arg(short, long)]
        tier: Option<MemoryTier>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Record a conversation turn, or show recent turns
    Turn {
        /// Turn content; shows the recent turns when omitted
        content: Option<String>,

        #[arg(short, long, default_value = "user")]
        role: String,

        /// How many recent turns to show
        #[arg(short = 'n', long, default_value_t = 5)]
        last: usize,
    },

    /// Set or show session context entries
    Context {
        /// Context key; shows every entry when omitted
        key: Option<String>,

        /// New value; shows the entry when omitted
        value: Option<String>,
    },

    /// Move a memory to another tier
    Migrate {
        id: String,

        #[arg(long)]
        from: MemoryTier,

        #[arg(long)]
        to: MemoryTier,
    },

    /// Run the configured progression rules now
    Progress,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so prompts on stdout stay clean
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
        Commands::Memory { scope, action } => {
            let scope = scope.into_scope();
            let manager = commands::build_manager(config_path)?;
            match action {
                MemoryAction::Add {
                    content,
                    tier,
                    importance,
                    meta,
                } => commands::memory::add(&manager, &scope, tier, content, &meta, importance).await?,
                MemoryAction::Get { id, tier } => {
                    commands::memory::get(&manager, &scope, &id, tier).await?
                }
                MemoryAction::List {
                    tier,
                    limit,
                    offset,
                } => commands::memory::list(&manager, &scope, tier, limit, offset).await?,
                MemoryAction::Delete { id, tier } => {
                    commands::memory::delete(&manager, &scope, &id, tier).await?
                }
                MemoryAction::Search { meta, tier, limit } => {
                    commands::memory::search(&manager, &scope, &meta, tier, limit).await?
                }
                MemoryAction::Turn {
                    content,
                    role,
                    last,
                } => commands::memory::turn(&manager, &scope, content, &role, last).await?,
                MemoryAction::Context { key, value } => {
                    commands::memory::context(&manager, &scope, key.as_deref(), value).await?
                }
                MemoryAction::Migrate { id, from, to } => {
                    commands::memory::migrate(&manager, &scope, &id, from, to).await?
                }
                MemoryAction::Progress => commands::memory::progress(&manager, &scope).await?,
            }
        }
        Commands::Prompt {
            scope,
            system,
            query,
            budget,
            max_turns,
            no_working,
            no_long_term,
            selector,
            json,
        } => {
            let manager = commands::build_manager(config_path)?;
            let args = commands::prompt::PromptArgs {
                system,
                query,
                budget,
                max_turns,
                include_working: !no_working,
                include_long_term: !no_long_term,
                selector,
                json,
            };
            commands::prompt::run(&manager, &scope.into_scope(), args).await?
        }
        Commands::Assemble { input, json } => {
            commands::assemble::run(config_path, input.as_deref(), json).await?
        }
    }

    Ok(())
}

impl ScopeArgs {
    fn into_scope(self) -> memtier_memory::SessionScope {
        memtier_memory::SessionScope::new(self.session).with_component(self.component)
    }
}
