use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use kiosk_guard::{
    CapabilitySnapshot, EnforcementPhase, EnforcementState, ForcedRunEngine, ForcedRunMode,
    NoopPlatform, EXAMPLE_CONFIG, load_config,
};

/// Kiosk Guard
///
/// Forced-run enforcement engine: locks an app shell into kiosk mode for
/// a configured schedule or countdown, with password-gated emergency exit.
#[derive(Parser, Debug)]
#[command(name = "kiosk-guard")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an example configuration file
    Init {
        /// Path to write
        #[arg(short, long, default_value = "kiosk-config.yaml")]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "kiosk-config.yaml")]
        config: PathBuf,
    },
    /// Query schedule access without running the engine
    Check {
        /// Path to the configuration file
        #[arg(short, long, default_value = "kiosk-config.yaml")]
        config: PathBuf,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the enforcement engine in the foreground
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "kiosk-config.yaml")]
        config: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Init { config, force } => cmd_init(&config, force),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Check { config, at, json } => cmd_check(&config, at.as_deref(), json),
        Commands::Run { config } => cmd_run(&config),
    }
}

/// Initialize logging
fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn cmd_init(path: &PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    println!("✓ Example configuration written to: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the schedule, blocking flags and emergency password");
    println!("  2. Check it: kiosk-guard validate --config {}", path.display());

    Ok(())
}

fn cmd_validate(path: &PathBuf) -> Result<()> {
    let config = load_config(path).context("Configuration is invalid")?;

    println!("✓ Configuration is valid: {}", path.display());
    println!("  Enabled:    {}", config.enabled);
    match config.mode {
        ForcedRunMode::Countdown => {
            println!("  Mode:       countdown ({} seconds)", config.countdown_seconds);
        }
        ForcedRunMode::Schedule => {
            println!("  Mode:       schedule ({} windows)", config.windows.len());
            if config.windows.is_empty() {
                println!("  Warning:    no windows configured - the app will never open");
            }
        }
    }
    println!("  Protection: {:?}", config.protection_level);
    println!(
        "  Emergency:  {}",
        if config.emergency_exit.allow { "allowed" } else { "disabled" }
    );

    Ok(())
}

fn cmd_check(path: &PathBuf, at: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(path)?;

    let now = match at {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .with_context(|| format!("Invalid RFC 3339 timestamp: {}", value))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let can_enter = kiosk_guard::can_enter_app(&config, now);
    let in_period = kiosk_guard::is_in_forced_run_period(&config, now);
    let until_next = kiosk_guard::time_until_next_access(&config, now);
    let never = until_next == kiosk_guard::NO_UPCOMING_ACCESS;

    if json {
        let verdict = serde_json::json!({
            "at": now.to_rfc3339(),
            "can_enter_app": can_enter,
            "in_forced_run_period": in_period,
            "seconds_until_next_access": if never { None } else { Some(until_next.num_seconds()) },
            "blocked_indefinitely": never,
        });
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    println!("At:                {}", now.format("%Y-%m-%d %H:%M:%S %Z"));
    println!("Can enter app:     {}", if can_enter { "yes" } else { "no" });
    println!("Forced-run period: {}", if in_period { "yes" } else { "no" });
    if can_enter {
        println!("Next access:       now");
    } else if never {
        println!("Next access:       never (no upcoming window)");
    } else {
        println!("Next access:       in {}", format_duration(until_next.num_seconds()));
    }

    Ok(())
}

fn cmd_run(path: &PathBuf) -> Result<()> {
    let config = load_config(path)?;

    println!("Kiosk Guard v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", path.display());
    println!("Press Ctrl+C to stop");
    println!();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let engine = ForcedRunEngine::new(
            config.clone(),
            Arc::new(NoopPlatform),
            // a host-less run reports no granted capabilities
            Arc::new(CapabilitySnapshot::default()),
        );
        engine.start()?;

        let session = Uuid::new_v4();
        engine.start_forced_run_mode(config, session)?;

        let mut state = engine.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = state.borrow().clone();
                    print_state(&snapshot);
                }
            }
        }

        engine.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })?;

    println!("Stopped");
    Ok(())
}

fn print_state(state: &EnforcementState) {
    let degraded = if state.degraded { " [degraded]" } else { "" };
    match state.phase {
        EnforcementPhase::Inactive => println!("INACTIVE{}", degraded),
        EnforcementPhase::Active if state.remaining_seconds > 0 => println!(
            "ACTIVE   remaining {}{}",
            format_duration(state.remaining_seconds),
            degraded
        ),
        EnforcementPhase::Active => println!("ACTIVE{}", degraded),
        EnforcementPhase::Blocked if state.blocked_indefinitely() => {
            println!("BLOCKED  no upcoming window{}", degraded)
        }
        EnforcementPhase::Blocked => println!(
            "BLOCKED  next window in {}{}",
            format_duration(state.remaining_seconds),
            degraded
        ),
    }
}

/// Format a second count for display
fn format_duration(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
