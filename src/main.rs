use clap::{Parser, Subcommand};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use weatherfx::cli::commands;
use weatherfx::config::EngineConfig;

#[derive(Parser)]
#[command(name = "weatherfx")]
#[command(about = "Rule-based environmental effects driven by weather, time, zone and light")]
#[command(version)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "weatherfx.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a rule directory
    Check {
        /// Rule directory (defaults to rule_directory from the config)
        #[arg(short, long)]
        rules: Option<String>,
    },

    /// Run the engine headless against a seeded in-memory world
    Simulate {
        #[arg(short, long, default_value_t = 1200)]
        ticks: u64,

        #[arg(short, long, default_value_t = 8)]
        entities: usize,
    },

    /// Run the engine in real time and serve the operator endpoints
    Run {
        #[arg(short, long, default_value_t = 8)]
        entities: usize,
    },
}

fn load_config(path: &str) -> EngineConfig {
    let path = Path::new(path);
    if !path.exists() {
        eprintln!("{} not found, using defaults", path.display());
        return EngineConfig::default();
    }
    match EngineConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &EngineConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("weatherfx={}", config.log_level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli.config);
    init_logging(&config, cli.json_logs);

    let result = match cli.command {
        Commands::Check { rules } => commands::check_rules(&config, rules.as_deref()).map(|_| ()),
        Commands::Simulate { ticks, entities } => {
            commands::simulate(&config, ticks, entities).map(|_| ())
        }
        Commands::Run { entities } => commands::run_engine(&config, entities).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
