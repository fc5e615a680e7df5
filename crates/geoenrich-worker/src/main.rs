//! geoenrich - batch address enrichment worker

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geoenrich_common::logging::{init_logging, LogConfig, LogLevel};
use geoenrich_common::types::JobMessage;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use geoenrich_worker::{
    api::{self, ApiState},
    config::{Config, DatabaseConfig},
    consumer::JobConsumer,
    jobs::{JobQueue, JobStore, PgJobQueue, PgJobStore},
    orchestrator::JobOrchestrator,
    pipeline::Pipeline,
    places::GoogleMapsClient,
    rate_limit::RateLimiter,
    resolver::AddressResolver,
    storage::{object_url, ObjectStore, S3Storage},
};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "geoenrich")]
#[command(author, version, about = "Batch address enrichment worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume jobs from the queue and serve the status API
    Run,

    /// Upload a CSV of addresses and queue it as a new job
    Submit {
        /// CSV file with a header row; the first column is the address
        #[arg(short, long)]
        file: PathBuf,

        /// Use this job id instead of a random one
        #[arg(long)]
        job_id: Option<Uuid>,
    },

    /// Print the current status of a job
    Status {
        job_id: Uuid,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("geoenrich")
        .filter_directives("sqlx=warn,aws_smithy_runtime=info,hyper=info")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Submit { file, job_id } => submit(config, file, job_id).await,
        Command::Status { job_id } => status(config, job_id).await,
        Command::Migrate => {
            let pool = connect(&config.database).await?;
            migrate(&pool).await
        },
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting geoenrich worker");

    let pool = connect(&config.database).await?;
    migrate(&pool).await?;

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));
    let storage: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(&config.storage));

    // One limiter for the whole process, shared by every job.
    let limiter = Arc::new(RateLimiter::new(
        config.places.requests_per_second,
        config.places.burst,
    ));
    let places = Arc::new(GoogleMapsClient::new(&config.places)?);
    let resolver =
        AddressResolver::new(places, limiter).with_radius(config.places.search_radius_meters);

    let orchestrator = Arc::new(JobOrchestrator::new(
        store.clone(),
        storage.clone(),
        Pipeline::new(resolver, config.pipeline),
        config.storage.input_bucket.clone(),
        config.storage.results_bucket.clone(),
    ));

    info!(
        pool_size = config.pipeline.pool_size,
        requests_per_second = config.places.requests_per_second,
        burst = config.places.burst,
        "Worker configured"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let api_task = if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Status API listening on {}", addr);

        let app = api::router(ApiState {
            store: store.clone(),
            storage: storage.clone(),
            db: Some(pool.clone()),
        });
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }))
    } else {
        info!("Status API disabled (API_ENABLED=false)");
        None
    };

    JobConsumer::new(queue, orchestrator, config.queue.clone())
        .run(shutdown.clone())
        .await;

    if let Some(task) = api_task {
        match task.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!("Status API failed: {}", e),
            Err(e) => error!("Status API task failed: {}", e),
        }
    }

    pool.close().await;
    info!("Worker shut down gracefully");
    Ok(())
}

async fn submit(config: Config, file: PathBuf, job_id: Option<Uuid>) -> Result<()> {
    let pool = connect(&config.database).await?;
    let store = PgJobStore::new(pool.clone());
    let queue = PgJobQueue::new(pool);
    let storage = S3Storage::new(&config.storage);

    let job_id = job_id.unwrap_or_else(Uuid::new_v4);
    let key = format!("{job_id}.csv");
    let bucket = &config.storage.input_bucket;

    let mut input = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let mut sink = storage.open_write(bucket, &key, "text/csv").await?;

    let mut chunk = vec![0u8; UPLOAD_CHUNK_BYTES];
    loop {
        let n = match input.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                sink.abort().await.ok();
                return Err(e).context("Failed to read input file");
            },
        };
        if let Err(e) = sink.write(&chunk[..n]).await {
            sink.abort().await.ok();
            return Err(e.into());
        }
    }
    sink.finish().await?;

    store.create(job_id, &key).await?;
    let message_id = queue.enqueue(&JobMessage::new(job_id, key.clone())).await?;

    info!(
        %job_id,
        message_id,
        input = %object_url(bucket, &key),
        "Job submitted"
    );
    println!("{job_id}");
    Ok(())
}

async fn status(config: Config, job_id: Uuid) -> Result<()> {
    let pool = connect(&config.database).await?;
    let job = PgJobStore::new(pool).get(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");
    Ok(pool)
}

async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }
}
