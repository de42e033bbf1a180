use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;

/// Shannon, an LLM-driven conversational agent.
#[derive(Parser)]
#[command(name = "shannon", version)]
struct Cli {
    /// Path to the config YAML file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Don't call the LLM; echo what would be processed.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match shannon_config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = app::run(config, cli.dry_run).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
