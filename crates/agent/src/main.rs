use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::FutureExt;

/// Regression Tracker: ingests CI run artifacts into a relational store and
/// serves trend analytics over HTTP.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// URL of the SQLite database.
    #[clap(
        long = "database",
        env = "DATABASE_URL",
        default_value = "sqlite://data/regression_tracker.db"
    )]
    database_url: String,
    /// Directory artifacts are downloaded into before import.
    #[clap(long = "logs-base", env = "LOGS_BASE_PATH", default_value = "./logs")]
    logs_base: PathBuf,
    /// The port to listen on for API requests.
    #[clap(long, default_value = "8000", env = "API_PORT")]
    api_port: u16,
    /// Whether to run the background scheduler in this instance.
    #[clap(long = "serve-scheduler", env = "SERVE_SCHEDULER", default_value = "true")]
    serve_scheduler: bool,
    /// Origin to allow in CORS contexts. May be specified multiple times.
    #[clap(long = "allow-origin")]
    allow_origin: Vec<String>,
    /// SHA-256 hex digest of the admin PIN.
    #[clap(long = "admin-pin-hash", env = "ADMIN_PIN_HASH")]
    admin_pin_hash: Option<String>,
    /// URL of the bug tracker JSON feed.
    #[clap(long = "bug-data-url", env = "BUG_DATA_URL")]
    bug_data_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // Reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let task = runtime.spawn(async move { async_main(args).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    // Bind early so probes don't fail while the store warms up.
    let api_listener = tokio::net::TcpListener::bind(format!("[::]:{}", args.api_port))
        .await
        .context("failed to bind server port")?;

    if let Some(dir) = args
        .database_url
        .strip_prefix("sqlite://")
        .and_then(|p| std::path::Path::new(p).parent().map(PathBuf::from))
    {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&dir).context("failed to create database directory")?;
        }
    }
    std::fs::create_dir_all(&args.logs_base).context("failed to create logs directory")?;

    let pool = tracker_sql::connect(&args.database_url)
        .await
        .context("connecting to database")?;
    tracker_sql::apply_schema(&pool)
        .await
        .context("applying schema")?;
    {
        let mut conn = pool.acquire().await?;
        tracker_sql::settings::seed_defaults(&mut conn)
            .await
            .context("seeding default settings")?;
    }

    let scheduler = agent::Scheduler::new(
        pool.clone(),
        args.logs_base.clone(),
        args.bug_data_url.clone(),
    );
    if args.serve_scheduler {
        scheduler.start().await.context("starting scheduler")?;
    } else {
        tracing::info!("scheduler disabled in this instance");
    }

    let app = Arc::new(agent::api::App {
        pool,
        tracker: agent::JobTracker::new(),
        scheduler: scheduler.clone(),
        logs_base: args.logs_base,
        admin_pin_hash: args.admin_pin_hash,
        bug_data_url: args.bug_data_url,
    });

    // Share-able future which completes when the service should exit.
    let shutdown = tokio::signal::ctrl_c().map(|_| ()).shared();

    let router = agent::api::build_router(app, &args.allow_origin)?;
    let api_server = axum::serve(api_listener, router).with_graceful_shutdown(shutdown);
    tracing::info!("serving API");
    api_server.await?;

    scheduler.shutdown();
    Ok(())
}
