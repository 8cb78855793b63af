//! reel-post - publish one staged asset to Instagram and the Facebook Page
//!
//! Picks the first eligible file from the staging folder, runs it through
//! every required destination and deletes it only when all of them
//! confirmed the post.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use libreelcast::logging::{LogFormat, LoggingConfig};
use libreelcast::notify::{LogNotifier, Notifier, TelegramNotifier};
use libreelcast::transport::http::ReqwestTransport;
use libreelcast::transport::HttpTransport;
use libreelcast::{Config, ExecutionMode, ReelcastError, RetentionDecision, RunOptions, RunStatus, RunSummary, Runner, Secrets};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reel-post")]
#[command(version)]
#[command(about = "Publish one staged media asset to Instagram and the Facebook Page")]
#[command(long_about = "\
reel-post - Publish one staged media asset to Instagram and the Facebook Page

DESCRIPTION:
    reel-post takes the first eligible file (.mp4, .mov, .jpg, .jpeg, .png)
    from the Dropbox staging folder and publishes it. Videos go to Instagram
    as a reel and to the Facebook Page; images go to Instagram only.

    Every destination is driven through create, process, publish and verify.
    The staged file is deleted only when every required destination
    confirmed the post is live; otherwise it is kept for the next run.

USAGE:
    # Publish the next asset
    reel-post

    # See what would be published
    reel-post --dry-run

    # Give up after ten minutes, print a JSON summary
    reel-post --deadline 10m --format json

SIGNALS:
    SIGTERM, SIGINT - Cancel the run (the staged file is kept)

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml (or REELCAST_CONFIG)

    Secrets are read from the environment:
    META_TOKEN, DROPBOX_APP_KEY, DROPBOX_APP_SECRET, DROPBOX_REFRESH_TOKEN,
    TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID (optional)

EXIT CODES:
    0   - Published everywhere, or nothing to do
    1   - A required destination failed, or a runtime error
    2   - Credential error
    3   - Invalid input
    130 - Cancelled
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH", env = "REELCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT", default_value = "text", env = "REELCAST_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log level when --verbose is not given
    #[arg(long, value_name = "LEVEL", default_value = "info", env = "REELCAST_LOG_LEVEL")]
    log_level: String,

    /// Cancel the run after this long (e.g. "90s", "10m")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,

    /// Publish to destinations one after another instead of concurrently
    #[arg(long)]
    sequential: bool,

    /// List eligible assets and today's caption without publishing
    #[arg(long)]
    dry_run: bool,

    /// Format of the summary printed to stdout
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, cli.log_level.clone(), cli.verbose).init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ReelcastError>()
                .map(ReelcastError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let mut secrets = Secrets::from_env()?;

    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new().context("failed to set up HTTP client")?);
    let notifier = build_notifier(&config, &mut secrets, &transport, cli.dry_run);

    let cancel = CancellationToken::new();
    if let Err(e) = spawn_signal_listener(cancel.clone()) {
        warn!(error = %e, "Signal handling unavailable; the run cannot be interrupted cleanly");
    }

    let options = RunOptions {
        deadline: cli.deadline,
        mode: cli.sequential.then_some(ExecutionMode::Sequential),
        dry_run: cli.dry_run,
    };

    info!(account = %config.account.key, dry_run = cli.dry_run, "reel-post starting");
    let runner = Runner::new(config, secrets, transport, notifier);
    let summary = runner.run(options, cancel).await?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text(&summary),
    }
    Ok(summary.exit_code())
}

fn build_notifier(
    config: &Config,
    secrets: &mut Secrets,
    transport: &Arc<dyn HttpTransport>,
    dry_run: bool,
) -> Arc<dyn Notifier> {
    let label = config.account.label().to_string();
    // Dry runs stay local
    let telegram = if dry_run {
        None
    } else {
        secrets.telegram_bot_token.take().zip(secrets.telegram_chat_id.take())
    };
    match telegram {
        Some((token, chat_id)) => Arc::new(TelegramNotifier::new(
            Arc::clone(transport),
            config.notify.telegram_api_url.as_str(),
            token,
            chat_id,
            label,
        )),
        None => Arc::new(LogNotifier::new(label)),
    }
}

fn print_text(summary: &RunSummary) {
    match summary.status {
        RunStatus::Idle => println!("No eligible assets."),
        RunStatus::DryRun => {
            println!("Eligible assets ({}):", summary.eligible.len());
            for name in &summary.eligible {
                println!("  {}", name);
            }
            println!("Caption: {}", summary.captions.caption);
            println!("Description: {}", summary.captions.description);
        }
        RunStatus::Completed => {
            if let Some(result) = &summary.result {
                println!("{} ({})", result.asset_name, result.kind);
                for (id, outcome) in &result.outcomes {
                    let mark = if outcome.success { "✅" } else { "❌" };
                    println!("  {} {}: {}", mark, id, outcome.detail);
                }
            }
            match summary.retention {
                Some(RetentionDecision::Delete) if summary.deleted => println!("Staged asset deleted."),
                Some(RetentionDecision::Delete) => println!("Staged asset could not be deleted."),
                Some(RetentionDecision::Keep { review: true }) => {
                    println!("Staged asset kept: needs manual review before retrying.")
                }
                Some(RetentionDecision::Keep { review: false }) | None => println!("Staged asset kept."),
            }
            if summary.cancelled {
                println!("Run was cancelled.");
            }
        }
    }
    println!("Run {} finished in {:.1}s", summary.run_id, summary.duration_secs);
}

/// Cancel `cancel` on SIGINT or SIGTERM
#[cfg(unix)]
fn spawn_signal_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("signal setup failed")?;
    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, cancelling run");
            cancel.cancel();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, cancelling run");
            cancel.cancel();
        }
    });
    Ok(())
}
