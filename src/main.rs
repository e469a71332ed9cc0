//! Binary entry point for `ai-shell`.

use clap::Parser;

use aishell::bootstrap;
use aishell::cli::{Cli, run};

#[tokio::main]
async fn main() {
    // Env layering: explicit vars > ./.env > ~/.ai-shell/.env.
    let _ = dotenvy::dotenv();
    bootstrap::load_shell_env();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("AI_SHELL_LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = run(cli).await;
    std::process::exit(code);
}
