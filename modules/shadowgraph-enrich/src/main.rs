use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shadowgraph_collector::{BrowserSession, CollectorOptions};
use shadowgraph_common::{Config, EnrichmentPolicy, ListType, ShadowError};
use shadowgraph_enrich::coordinator::{ConfirmPreview, Coordinator};
use shadowgraph_enrich::run_log::RunLog;
use shadowgraph_enrich::summarize;
use shadowgraph_store::ShadowStore;
use x_api_client::{SlidingWindowLimiter, XApiClient, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

#[derive(Parser)]
#[command(name = "shadowgraph-enrich", version)]
#[command(about = "Expand the shadow graph: scrape follow lists, backfill profiles")]
struct Cli {
    /// Seed usernames to process (may also come from --seeds-file)
    seeds: Vec<String>,

    /// Prioritize this seed to the front of the batch
    #[arg(long)]
    center: Option<String>,

    /// File with one seed username per line; blanks and # comments ignored
    #[arg(long)]
    seeds_file: Option<PathBuf>,

    /// Consecutive stagnant scroll rounds before a list counts as exhausted
    #[arg(long, default_value_t = 6)]
    max_scrolls: u32,

    /// Minimum pacing delay between scrolls, in seconds
    #[arg(long, default_value_t = 4.0)]
    delay_min: f64,

    /// Maximum pacing delay between scrolls, in seconds
    #[arg(long, default_value_t = 9.0)]
    delay_max: f64,

    /// Skip the reciprocal ("followers you follow") list
    #[arg(long)]
    no_followers_you_follow: bool,

    /// Force a refresh when the last run is older than this many days
    #[arg(long)]
    max_age_days: Option<u32>,

    /// Force a refresh when the claimed count moved more than this percent
    #[arg(long)]
    delta_threshold_pct: Option<f64>,

    /// Prompt before scraping each seed
    #[arg(long)]
    require_confirmation: bool,

    /// With --require-confirmation, skip the prompt for the first seed
    #[arg(long)]
    auto_confirm_first: bool,

    /// JSON policy file; explicit flags override its fields
    #[arg(long)]
    policy_file: Option<PathBuf>,

    /// Backfill missing profile fields through the API after scraping
    #[arg(long)]
    enable_api_fallback: bool,

    /// Bearer token for the API
    #[arg(long, env = "SHADOWGRAPH_BEARER_TOKEN")]
    bearer_token: Option<String>,

    /// Cookie bundle captured from a logged-in browser session
    #[arg(long, env = "SHADOWGRAPH_COOKIES")]
    cookies: Option<PathBuf>,

    /// Chrome/Chromium binary to launch
    #[arg(long, env = "CHROME_BIN")]
    chrome_binary: Option<PathBuf>,

    /// Run the browser headless (headful is the default)
    #[arg(long)]
    headless: bool,

    /// Console shows warnings and errors only
    #[arg(long, short)]
    quiet: bool,

    /// SQLite database path for the shadow store
    #[arg(long, env = "SHADOWGRAPH_DB")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate run metrics over a recent window
    Summary {
        /// Window size in days
        #[arg(long, default_value_t = 30)]
        window_days: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let config_error = e
                .downcast_ref::<ShadowError>()
                .is_some_and(|s| matches!(s, ShadowError::Config(_) | ShadowError::Validation(_)));
            error!("{e:#}");
            if config_error {
                ExitCode::from(3)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env();
    let db_path = cli.db_path.clone().unwrap_or_else(|| config.db_path.clone());

    if let Some(Commands::Summary { window_days }) = cli.command {
        return summary(&db_path, window_days).await;
    }

    if !cli.quiet {
        config.log_redacted();
    }

    let policy = build_policy(&cli)?;
    let seeds = assemble_seeds(&cli)?;
    info!(seeds = seeds.len(), "Seed batch assembled");

    if cli.delay_min > cli.delay_max {
        return Err(ShadowError::Config("--delay-min exceeds --delay-max".to_string()).into());
    }

    let store = ShadowStore::connect(&db_path)
        .await
        .context("opening shadow store")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let collector_opts = CollectorOptions {
        chrome_binary: cli.chrome_binary.clone().or(config.chrome_binary.clone()),
        headless: cli.headless,
        cookies_path: cli.cookies.clone().or(config.cookies_path.clone()),
        max_scroll_rounds: cli.max_scrolls,
        delay_min: Duration::from_secs_f64(cli.delay_min),
        delay_max: Duration::from_secs_f64(cli.delay_max),
        ..CollectorOptions::default()
    };

    let session = Arc::new(
        BrowserSession::launch(collector_opts, cancel.clone())
            .await
            .context("launching browser session")?,
    );

    let api = if cli.enable_api_fallback {
        let token = cli
            .bearer_token
            .clone()
            .or(config.bearer_token.clone())
            .ok_or_else(|| {
                ShadowError::Config("--enable-api-fallback needs a bearer token".to_string())
            })?;
        let limiter = SlidingWindowLimiter::load(
            &config.data_dir.join("rate-limit.json"),
            DEFAULT_MAX_REQUESTS,
            DEFAULT_WINDOW,
        )
        .map_err(|e| ShadowError::Config(e.to_string()))?;
        Some(Arc::new(XApiClient::new(token, limiter, cancel.clone())))
    } else {
        None
    };

    let mut coordinator = Coordinator::new(
        store.clone(),
        session.clone(),
        policy.clone(),
        cancel.clone(),
    )
    .with_auto_confirm_first(cli.auto_confirm_first)
    .with_run_log(RunLog::new(config.data_dir.clone()));
    if let Some(api) = &api {
        coordinator = coordinator.with_api(api.clone());
    }
    if policy.require_confirmation {
        coordinator = coordinator.with_confirm(Box::new(prompt_confirm));
    }

    let outcome = coordinator.run(&seeds).await;

    // Orderly shutdown regardless of how the run went: release the browser,
    // persist limiter state.
    session.close().await;
    if let Some(api) = &api {
        if let Err(e) = api.flush_limiter().await {
            warn!(error = %e, "Failed to flush rate-limiter state");
        }
    }

    let report = outcome?;
    if let Ok(stats) = store.stats().await {
        info!(
            accounts = stats.accounts,
            edges = stats.edges,
            metrics_rows = stats.metrics_rows,
            "Shadow store totals"
        );
    }
    if !cli.quiet {
        println!("{}", report.stats);
    }

    let exit = if cancel.is_cancelled() && report.exit.code() == 0 {
        // Interrupt that landed between seeds still exits non-zero.
        2
    } else {
        report.exit.code()
    };
    Ok(ExitCode::from(exit))
}

async fn summary(db_path: &PathBuf, window_days: i64) -> Result<ExitCode> {
    let store = ShadowStore::connect(db_path)
        .await
        .context("opening shadow store")?;
    let since = chrono::Utc::now() - chrono::Duration::days(window_days);
    let rows = store.metrics_since(since).await?;
    println!("{}", summarize(&rows));
    Ok(ExitCode::SUCCESS)
}

fn build_policy(cli: &Cli) -> Result<EnrichmentPolicy> {
    let mut policy = match &cli.policy_file {
        Some(path) => EnrichmentPolicy::from_file(path)?,
        None => EnrichmentPolicy::default(),
    };

    if let Some(days) = cli.max_age_days {
        policy.max_age_days = days;
    }
    if let Some(pct) = cli.delta_threshold_pct {
        if !(0.0..=1000.0).contains(&pct) {
            return Err(
                ShadowError::Config("--delta-threshold-pct must be in [0, 1000]".to_string()).into(),
            );
        }
        policy.delta_threshold_pct = pct;
    }
    if cli.require_confirmation {
        policy.require_confirmation = true;
    }
    if cli.no_followers_you_follow {
        policy
            .list_types
            .retain(|lt| *lt != ListType::FollowersYouFollow);
    }
    if policy.list_types.is_empty() {
        return Err(ShadowError::Config("no list types left to collect".to_string()).into());
    }
    Ok(policy)
}

fn assemble_seeds(cli: &Cli) -> Result<Vec<String>> {
    let mut seeds: Vec<String> = Vec::new();
    if let Some(center) = &cli.center {
        seeds.push(center.clone());
    }
    if let Some(path) = &cli.seeds_file {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ShadowError::Config(format!("reading {}: {e}", path.display())))?;
        seeds.extend(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    seeds.extend(cli.seeds.iter().cloned());

    // Dedup case-insensitively, keeping first occurrence (and therefore the
    // --center priority).
    let mut seen = std::collections::HashSet::new();
    seeds.retain(|s| seen.insert(shadowgraph_common::normalize_username(s)));

    if seeds.is_empty() {
        return Err(
            ShadowError::Config("no seeds given (positional, --center, or --seeds-file)".to_string())
                .into(),
        );
    }
    Ok(seeds)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down after the current write");
            cancel.cancel();
        }
    });
}

fn prompt_confirm(preview: &ConfirmPreview) -> bool {
    let profile = &preview.profile;
    println!(
        "\nSeed @{} ({})",
        profile.username,
        profile.display_name.as_deref().unwrap_or("-")
    );
    println!(
        "  claimed: {} followers / {} following",
        profile
            .claimed_followers
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string()),
        profile
            .claimed_following
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string()),
    );
    for d in &preview.decisions {
        let action = match d.action {
            shadowgraph_enrich::policy::Action::Refresh => "refresh",
            shadowgraph_enrich::policy::Action::Skip => "skip",
        };
        println!("  {}: {} ({})", d.list_type, action, d.reason);
    }
    for (list_type, coverage) in &preview.last_coverage {
        if let Some(c) = coverage {
            println!("  last coverage {}: {:.0}%", list_type, c * 100.0);
        }
    }
    if !preview.probe.is_empty() {
        let sample: Vec<String> = preview
            .probe
            .iter()
            .map(|m| format!("@{}", m.username))
            .collect();
        println!("  sample: {}", sample.join(", "));
    }

    print!("Proceed with scrape? [y/N] ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
