//! Drover CLI - drive agent-built features from the terminal

mod commands;

use clap::{Parser, Subcommand};
use drover_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::RunArgs;

/// Drover: dependency-ordered, review-gated feature development with agents
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the agent executable (overrides config and env)
    #[arg(long, global = true, env = "DROVER_AGENT_PATH")]
    agent_path: Option<String>,

    /// Model to use (overrides config and env)
    #[arg(long, global = true, env = "DROVER_MODEL")]
    model: Option<String>,

    /// Maximum concurrently active tasks (overrides config and env)
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run a feature through the scheduler
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = Config::load_with_overrides(
        cli.agent_path.clone(),
        cli.model.clone(),
        cli.max_concurrent,
    )?;

    if cli.verbose {
        tracing::info!(
            agent_path = %config.agent.agent_path,
            model = ?config.agent.model,
            max_concurrent = config.scheduler.max_concurrent_tasks,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("drover {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => {
            println!("Drover Configuration");
            println!("====================");
            println!();
            println!("Agent:");
            println!("  agent_path: {}", config.agent.agent_path);
            println!(
                "  model: {}",
                config.agent.model.as_deref().unwrap_or("(default)")
            );
            println!("  timeout: {:?}", config.agent.timeout);
            println!();
            println!("Scheduler:");
            println!(
                "  max_concurrent_tasks: {}",
                config.scheduler.max_concurrent_tasks
            );
            println!("  max_attempts: {}", config.scheduler.max_attempts);
            println!(
                "  reviewer_profiles: {}",
                config.scheduler.reviewer_profiles.join(", ")
            );
            println!();
            if let Some(path) = Config::default_config_path() {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("Drover - agent-driven feature development");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
