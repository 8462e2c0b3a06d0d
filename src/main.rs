use std::path::PathBuf;
use std::sync::Arc;

use flottbot::config::{Bot, BotConfig};
use flottbot::metrics::{self, RuleCounter};
use flottbot::models::Service;
use flottbot::pipeline::Pipeline;
use flottbot::remotes::CliRemote;
use flottbot::rules;

/// Locate the `config/` directory: next to the executable first, then the
/// working directory.
fn find_config_dir() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("config");
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
    }
    let cwd = PathBuf::from("config");
    cwd.is_dir().then_some(cwd)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args()
        .skip(1)
        .any(|a| a == "-v" || a == "--version")
    {
        println!("flottbot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_dir = find_config_dir().unwrap_or_else(|| {
        eprintln!("Error: no config/ directory next to the executable or in the working directory");
        std::process::exit(1);
    });

    let config = BotConfig::load(&config_dir).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Log level comes from the bot config unless RUST_LOG overrides it.
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let rule_map = rules::load(&config_dir).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    tracing::info!(
        bot = %config.name,
        rules = rule_map.len(),
        "configuration loaded from {}",
        config_dir.display()
    );

    let metrics_counter = Arc::new(RuleCounter::new(&config.name));
    if config.metrics {
        metrics::serve(Arc::clone(&metrics_counter), config.metrics_port);
    }

    let bot = Arc::new(Bot::new(config));
    let mut pipeline = Pipeline::new(bot.clone(), rule_map, metrics_counter);
    if bot.config.cli {
        pipeline.register(Service::Cli, Arc::new(CliRemote::new()));
    }
    if bot.config.chat {
        tracing::warn!("'chat' is enabled but no chat remote is built in; continuing without it");
    }
    if !bot.config.cli && !bot.config.chat && !bot.config.scheduler {
        tracing::warn!("no event sources enabled (cli, chat, scheduler are all off)");
    }

    pipeline.run().await;
    Ok(())
}
