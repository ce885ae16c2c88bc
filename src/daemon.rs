//! Daemon entry point: config, database, engine wiring, and the job
//! dispatcher that drives the reconciliation families.

use miette::{IntoDiagnostic, WrapErr};
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AutoglueConfig, DatabaseConfig, DatabaseCredentials};
use crate::dns::route53::Route53Factory;
use crate::engine::Engine;
use crate::scheduler::{
    queues, ClusterActionPayload, DueJob, EnqueueOptions, JobQueue, LoopPayload, PgQueue,
};
use crate::secrets::EnvelopeVault;
use crate::signing::SigningKeys;
use crate::ssh::Ssh2Executor;
use crate::store::pg::PgStore;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const CLAIM_BATCH: i64 = 16;

#[derive(clap::Args, Debug)]
pub struct RunCommand {
    #[arg(short = 'c', long = "config", env = "AUTOGLUE_CFG_FILE")]
    config: Option<PathBuf>,
}

pub async fn pg_pool_from_config(db_config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pg_options = PgConnectOptions::new()
        .host(&db_config.host)
        .database(&db_config.database)
        .username(&db_config.user);
    let pg_options = match db_config.port {
        None => pg_options,
        Some(port) => pg_options.port(port),
    };
    let pg_options = match &db_config.auth {
        None => pg_options,
        Some(DatabaseCredentials::Password(password)) => pg_options.password(password),
    };
    PgPool::connect_with(pg_options).await
}

/// Seed a reconciliation family's loop job unless one is already queued or
/// running, so restarts do not multiply cadences.
async fn ensure_loop_seeded(
    pool: &PgPool,
    queue: &PgQueue,
    queue_name: &str,
    interval_seconds: u64,
) -> miette::Result<()> {
    let (live,): (bool,) = sqlx::query_as(
        "select exists(select 1 from jobs where queue = $1 and status in ('queued', 'running'))",
    )
    .bind(queue_name)
    .fetch_one(pool)
    .await
    .into_diagnostic()
    .wrap_err("failed to inspect job queue")?;
    if live {
        return Ok(());
    }

    let payload = serde_json::to_value(LoopPayload { interval_seconds })
        .expect("loop payload cannot fail to serialize");
    queue
        .enqueue(
            Uuid::new_v4(),
            queue_name,
            payload,
            EnqueueOptions {
                run_at: None,
                max_retries: 1,
            },
        )
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to seed loop job for '{queue_name}'"))?;
    tracing::info!("Seeded loop job for queue '{queue_name}'");
    Ok(())
}

/// Execute one claimed job. Returns whether it should be marked done.
async fn execute_job(engine: &Engine, job: &DueJob) -> bool {
    match job.queue.as_str() {
        queues::BASTION => {
            let stats = engine.bastion_tick().await;
            tracing::debug!("Bastion tick: {stats:?}");
            true
        }
        queues::CLUSTER_PREPARE => {
            let stats = engine.cluster_prepare_tick().await;
            tracing::debug!("Cluster prepare tick: {stats:?}");
            true
        }
        queues::CLUSTER_CONVERGE => {
            let stats = engine.cluster_converge_tick().await;
            tracing::debug!("Cluster converge tick: {stats:?}");
            true
        }
        queues::DNS => {
            let stats = engine.dns_tick().await;
            tracing::debug!("DNS tick: {stats:?}");
            true
        }
        queues::CLUSTER_ACTION => {
            let payload: ClusterActionPayload =
                match serde_json::from_value(job.payload.0.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!("Malformed cluster action payload for job {}: {e}", job.id);
                        return false;
                    }
                };
            engine.run_cluster_action(&payload, job.id).await.is_ok()
        }
        other => {
            tracing::error!("Job {} targets unknown queue '{other}'", job.id);
            false
        }
    }
}

/// Re-arm a loop family whose tick panicked before it could reschedule
/// itself.
async fn rearm_after_panic(engine: &Engine, job: &DueJob) {
    if let Ok(payload) = serde_json::from_value::<LoopPayload>(job.payload.0.clone()) {
        engine
            .reschedule(&job.queue, payload.interval_seconds)
            .await;
        tracing::warn!("Re-armed queue '{}' after a panicked tick", job.queue);
    }
}

pub async fn run(run_command: RunCommand) -> miette::Result<()> {
    let config_path = run_command
        .config
        .unwrap_or_else(|| PathBuf::from("agd.toml"));
    let config: AutoglueConfig = crate::config::load_configuration(&config_path)?;

    tracing_subscriber::fmt::init();

    let pg_pool = pg_pool_from_config(&config.database)
        .await
        .into_diagnostic()
        .wrap_err("failed to connect to database")?;

    // Apply database migrations automatically; they are embedded in this
    // binary from ./migrations at build time.
    sqlx::migrate!()
        .run(&pg_pool)
        .await
        .into_diagnostic()
        .wrap_err("failed to migrate database")?;

    let store = Arc::new(PgStore::new(pg_pool.clone()));
    let vault = EnvelopeVault::from_base64(&config.secrets.master_key)
        .into_diagnostic()
        .wrap_err("invalid secrets.master_key")?;
    let signing = Arc::new(SigningKeys::new());
    signing
        .refresh(store.as_ref())
        .await
        .into_diagnostic()
        .wrap_err("failed to load signing keys")?;

    let queue = PgQueue::new(pg_pool.clone());
    let engine = Arc::new(Engine {
        store,
        vault: Arc::new(vault),
        exec: Arc::new(Ssh2Executor),
        dns: Arc::new(Route53Factory::new(config.dns.default_region.clone())),
        queue: Arc::new(queue.clone()),
        signing,
        workers: config.workers.clone(),
        dns_cfg: config.dns.clone(),
    });

    for (name, interval) in [
        (queues::BASTION, config.workers.bastion_interval_seconds),
        (
            queues::CLUSTER_PREPARE,
            config.workers.cluster_prepare_interval_seconds,
        ),
        (
            queues::CLUSTER_CONVERGE,
            config.workers.cluster_converge_interval_seconds,
        ),
        (queues::DNS, config.workers.dns_interval_seconds),
    ] {
        ensure_loop_seeded(&pg_pool, &queue, name, interval).await?;
    }

    tracing::info!("Starting job dispatcher...");
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let jobs = match queue.claim_due(CLAIM_BATCH).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to claim due jobs: {e}");
                continue;
            }
        };

        for job in jobs {
            let handle = tokio::spawn({
                let engine = Arc::clone(&engine);
                let job = job.clone();
                async move { execute_job(&engine, &job).await }
            });
            let ok = match handle.await {
                Ok(ok) => ok,
                Err(e) if e.is_panic() => {
                    tracing::error!("Job {} on queue '{}' panicked", job.id, job.queue);
                    rearm_after_panic(&engine, &job).await;
                    false
                }
                Err(e) => {
                    tracing::error!("Job {} task failed: {e}", job.id);
                    false
                }
            };
            if let Err(e) = queue.finish(job.id, ok).await {
                tracing::error!("Failed to finish job {}: {e}", job.id);
            }
        }
    }
}
