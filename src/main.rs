//! Command Breaker - Demo Entry Point
//!
//! Registers a command that always fails, installs the breaker in front of
//! it and invokes it on a fixed interval, printing how each invocation was
//! answered.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use command_breaker::Breaker;
use command_breaker::commands::{
    CallArgs, Callback, Command, CommandError, CommandTree, Interaction, ReplyKind, TripCallback,
};
use command_breaker::config::{BreakerSettings, ResetAfter, format_duration};

const DEMO_COMMAND: &str = "test";

/// Drive a failing command through the per-command circuit breaker.
#[derive(Parser, Debug)]
#[command(name = "command_breaker")]
#[command(about = "Drive a failing command through the per-command circuit breaker")]
#[command(version)]
struct Args {
    /// Path to a JSON settings file (replaces environment settings).
    #[arg(short, long)]
    settings: Option<String>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Consecutive failures that trip the command.
    #[arg(short, long)]
    threshold: Option<u32>,

    /// Cooldown before the command is restored (minutes, or e.g. 30s, 1h 30m).
    #[arg(short, long)]
    reset_after: Option<ResetAfter>,

    /// Number of invocations to run.
    #[arg(short = 'n', long, default_value_t = 8)]
    invocations: u32,

    /// Delay between invocations in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Do not watch hybrid command failures.
    #[arg(long)]
    no_hybrid: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write an example settings file and exit.
    #[arg(long)]
    generate_settings: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    if args.generate_settings {
        return generate_example_settings();
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let settings = load_settings(&args)?;

    let tree = Arc::new(CommandTree::new());
    tree.add_command(Command::new(
        DEMO_COMMAND,
        "A command that always fails",
        Callback::from_async(|_| async { Err(anyhow!("This command always fails!")) }),
    ))?;

    let breaker = Breaker::builder(&tree)
        .settings(settings)
        .trip_callback(TripCallback::from_async(on_tripped))?
        .install()
        .context("Breaker settings validation failed")?;

    info!(
        "Invoking '{}' {} times every {}ms",
        DEMO_COMMAND, args.invocations, args.interval_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for id in 1..=u64::from(args.invocations) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }

        let interaction = Interaction::new(id, "demo_user").with_command(DEMO_COMMAND);
        let result = tree
            .invoke(DEMO_COMMAND, CallArgs::for_interaction(interaction.clone()))
            .await;
        report(id, &breaker, result, &interaction).await;
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Builds settings from the file or environment, then applies flags.
fn load_settings(args: &Args) -> Result<BreakerSettings> {
    let mut settings = match &args.settings {
        Some(path) => BreakerSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {path}"))?,
        None => BreakerSettings::from_env_with_defaults()
            .context("Failed to load breaker settings from environment")?,
    };

    if let Some(threshold) = args.threshold {
        settings.threshold = threshold;
    }
    if let Some(reset_after) = args.reset_after {
        settings.set_reset_after(reset_after);
    }
    if args.no_hybrid {
        settings.hybrid_support = false;
    }

    Ok(settings)
}

/// Answers invocations of a tripped command.
///
/// Only replies to the user: whatever made the command fail may still be
/// down, so no database or network work belongs here.
async fn on_tripped(interaction: Interaction) -> Result<()> {
    let notice = "⚡ Breaker tripped! This command is temporarily disabled \
                  due to encountering too many errors.";

    match interaction.reply(notice).await {
        ReplyKind::Initial => debug!("Sent breaker notice for interaction {}", interaction.id),
        ReplyKind::Followup => debug!("Sent breaker followup for interaction {}", interaction.id),
    }
    Ok(())
}

/// Prints how one invocation went.
async fn report(
    id: u64,
    breaker: &Breaker,
    result: Result<(), CommandError>,
    interaction: &Interaction,
) {
    let outcome = match result {
        Ok(()) => interaction
            .replies()
            .await
            .last()
            .cloned()
            .unwrap_or_else(|| "ok".to_owned()),
        Err(e) => format!("✗ {e}"),
    };

    let state = match breaker.tripped_since(DEMO_COMMAND) {
        Some(since) => format!("tripped since {}", since.format("%H:%M:%S")),
        None => format!(
            "{}/{} failures",
            breaker.error_count(DEMO_COMMAND),
            breaker.threshold()
        ),
    };

    println!("#{id:<3} [{state}] {outcome}");
}

/// Generates an example settings file.
fn generate_example_settings() -> Result<()> {
    let mut example = BreakerSettings::default();
    example.set_reset_after(5_u64);

    let json = serde_json::to_string_pretty(&example)?;
    std::fs::write("breaker.example.json", json)?;

    println!("✓ Example settings written to: breaker.example.json");
    println!("\nReset duration: {}", format_duration(example.reset_after));
    println!("Run: command_breaker --settings breaker.example.json");

    Ok(())
}
