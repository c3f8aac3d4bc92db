mod commands;
mod config;
mod favorites;
mod field;
mod models;
mod parser;
mod refresh;
mod session;
mod store;
mod telegram;
mod web;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use commands::CommandHandler;
use config::{validate_telegram_token, Cli, Command, Config};
use favorites::Favorites;
use models::Snapshot;
use refresh::{RefreshCoordinator, RefreshOutcome};
use session::SessionClient;
use store::import_snapshot;
use telegram::TelegramBot;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();

    let result = match cli.command {
        Command::Check { config } => run_check(config).await,
        Command::Get {
            config,
            id,
            section,
            from_file,
        } => run_get(config, id, section, from_file).await,
        Command::Search {
            config,
            name,
            from_file,
        } => run_search(config, name, from_file).await,
        Command::Start {
            config,
            telegram_token,
            no_web,
        } => run_start(config, telegram_token, no_web).await,
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn log_config(config: &Config) {
    info!(
        url = %config.url,
        stale_secs = config.stale_secs,
        min_payload_bytes = config.min_payload_bytes,
        page_rows = config.page_rows,
        timeout_secs = config.timeout_secs,
        "Core configuration"
    );
}

fn build_coordinator(config: &Config) -> Result<Arc<RefreshCoordinator>> {
    let client = SessionClient::new(config.session())?;
    Ok(Arc::new(RefreshCoordinator::new(
        Arc::new(client),
        config.stale_after(),
    )))
}

/// One fetch for the one-shot subcommands; fails if nothing could be fetched
async fn fetch_once(config: &Config) -> Result<Arc<Snapshot>> {
    config.validate()?;
    log_config(config);

    let coordinator = build_coordinator(config)?;
    let started = Instant::now();
    let refresh = coordinator.ensure_fresh(true).await;

    match (refresh.snapshot, refresh.outcome) {
        (Some(snapshot), _) => {
            info!(
                subjects = snapshot.subject_count(),
                sections = snapshot.section_count(),
                duration_ms = started.elapsed().as_millis(),
                "Timetable fetched"
            );
            Ok(snapshot)
        }
        (None, RefreshOutcome::Failed(e)) => Err(e).context("Could not fetch the timetable"),
        (None, _) => bail!("Could not fetch the timetable"),
    }
}

/// Snapshot for `get` and `search`: an exported file if given, else a live fetch
async fn load_snapshot(config: &Config, from_file: Option<PathBuf>) -> Result<Arc<Snapshot>> {
    match from_file {
        Some(path) => {
            let snapshot = import_snapshot(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            info!(
                path = %path.display(),
                subjects = snapshot.subject_count(),
                "Loaded exported timetable"
            );
            Ok(Arc::new(snapshot))
        }
        None => fetch_once(config).await,
    }
}

async fn run_check(config: Config) -> Result<()> {
    init_logging(config.verbose);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = "check",
        "Running single check"
    );

    let snapshot = fetch_once(&config).await?;
    snapshot
        .export(&config.export)
        .with_context(|| format!("Failed to export to {}", config.export.display()))?;

    println!(
        "{} subjects, {} sections -> {}",
        snapshot.subject_count(),
        snapshot.section_count(),
        config.export.display()
    );
    Ok(())
}

async fn run_get(
    config: Config,
    id: String,
    section: Option<String>,
    from_file: Option<PathBuf>,
) -> Result<()> {
    init_logging(config.verbose);
    let snapshot = load_snapshot(&config, from_file).await?;

    let info = match section.as_deref() {
        None => snapshot.all_sections_of(&id),
        Some(section) => snapshot.one_section(&id, section),
    };
    match info {
        Some(info) => print!("{}", info),
        None => println!(
            "'{}' doesn't match any subject{}",
            id,
            section
                .map(|s| format!(" with '{}' as section", s))
                .unwrap_or_default()
        ),
    }
    Ok(())
}

async fn run_search(config: Config, name: String, from_file: Option<PathBuf>) -> Result<()> {
    init_logging(config.verbose);
    let snapshot = load_snapshot(&config, from_file).await?;

    let results = snapshot.search_by_name(&name);
    if results.is_empty() {
        println!("No match found for '{}'", name);
    }
    for (id, subject_name) in &results {
        println!("{}: {}", id, subject_name);
    }
    Ok(())
}

async fn run_start(config: Config, telegram_token: String, no_web: bool) -> Result<()> {
    init_logging(config.verbose);
    config.validate()?;
    validate_telegram_token(&telegram_token)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Edugate timetable bot"
    );
    log_config(&config);

    let coordinator = build_coordinator(&config)?;
    let favorites = Favorites::load(&config.favorites)
        .with_context(|| format!("Failed to load favorites from {}", config.favorites.display()))?;

    // Warm the cache so the first users don't wait on the portal
    let refresh = coordinator.ensure_fresh(false).await;
    if let RefreshOutcome::Failed(e) = &refresh.outcome {
        warn!(error = %e, "Initial fetch failed - will retry on first lookup");
    }

    if !no_web {
        let router = web::create_router(coordinator.clone());
        let port = config.port;
        tokio::spawn(async move {
            if let Err(e) = web::start_server(router, port).await {
                error!(error = %e, "Web server failed");
            }
        });
    }

    let handler = Arc::new(CommandHandler::new(coordinator, favorites));
    let bot = TelegramBot::new(telegram_token)?;

    info!(
        favorites = %config.favorites.display(),
        web = !no_web,
        port = config.port,
        "Entering polling loop (Ctrl+C to stop)"
    );

    tokio::select! {
        _ = telegram::run(bot, handler) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Stopping bot");
        }
    }

    Ok(())
}
