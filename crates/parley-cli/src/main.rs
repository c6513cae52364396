//! Parley CLI - chat with Claude from the terminal
//!
//! Runs an interactive shell around a `parley_core::ChatSession`, or a
//! single prompt with `--one-shot`.

mod commands;
mod display;
mod repl;
mod setup;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use parley_core::config::{Config, ConfigManager};
use parley_core::session::persistence;
use parley_core::{ChatSession, ToolRegistryBuilder};

use repl::Shell;

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with Claude from the terminal, with tool use", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to daily rotated files in this directory instead of stderr
    #[arg(long, value_name = "DIR")]
    log_file: Option<PathBuf>,

    /// Model to use (defaults to the configured model)
    #[arg(short, long)]
    model: Option<String>,

    /// Start with tool use disabled
    #[arg(long)]
    no_tools: bool,

    /// Start with extended thinking disabled
    #[arg(long)]
    no_thinking: bool,

    /// Execute a single prompt and exit (non-interactive mode)
    #[arg(long)]
    one_shot: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat mode
    Chat,

    /// Show available tools
    Tools,

    /// Show configuration
    Config,

    /// Configure API keys
    Setup,

    /// List saved conversations
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config_manager = ConfigManager::new()?;
    let mut config = config_manager.config().clone();
    apply_overrides(&mut config, &cli);

    if let Some(prompt) = cli.one_shot.as_deref() {
        return run_one_shot(config_manager, &config, prompt).await;
    }

    match cli.command {
        Some(Commands::Chat) | None => run_chat(config_manager, config).await?,
        Some(Commands::Tools) => {
            let registry = ToolRegistryBuilder::new(config.clone()).build()?;
            display::tools(&registry.list_specs(), config.tools.enabled);
        }
        Some(Commands::Config) => display::config(&config, config_manager.path()),
        Some(Commands::Setup) => {
            setup::run(&mut config_manager)?;
        }
        Some(Commands::List) => display::conversations(&persistence::list()?),
    }

    Ok(())
}

/// Install the tracing subscriber
///
/// Logs stay at `warn` so they do not interfere with the prompt; `RUST_LOG`
/// overrides the level. The returned guard flushes file logs on drop.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info,parley_core=debug" } else { "warn" }));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "parley.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Command-line flags win over the config file for this run only
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if cli.no_tools {
        config.tools.enabled = false;
    }
    if cli.no_thinking {
        config.thinking.enabled = false;
    }
}

/// Run a single prompt non-interactively (for scripting)
async fn run_one_shot(config_manager: ConfigManager, config: &Config, prompt: &str) -> anyhow::Result<()> {
    if config.model.get_api_key().is_none() {
        setup::show_instructions(&config_manager);
        anyhow::bail!("no API key configured");
    }

    let session = ChatSession::from_config(config)?;
    let mut shell = Shell::new(session, config_manager, config.thinking.show);
    shell.turn(prompt).await?;
    Ok(())
}

async fn run_chat(mut config_manager: ConfigManager, mut config: Config) -> anyhow::Result<()> {
    if config.model.get_api_key().is_none() {
        setup::show_instructions(&config_manager);
        if !console::Term::stdout().is_term() {
            return Ok(());
        }
        println!();
        let run_setup = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Run setup now?")
            .default(true)
            .interact()?;
        if !run_setup || !setup::run(&mut config_manager)? {
            return Ok(());
        }

        let saved = config_manager.config();
        config.model.api_key = saved.model.api_key.clone();
        config.web_search.api_key = saved.web_search.api_key.clone();
        if config.model.get_api_key().is_none() {
            println!("{}", style("Still no API key; exiting.").yellow());
            return Ok(());
        }
    }

    let session = ChatSession::from_config(&config)?;
    let mut shell = Shell::new(session, config_manager, config.thinking.show);
    shell.run().await
}
