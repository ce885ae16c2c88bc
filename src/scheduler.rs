//! Job-queue seam and the self-rescheduling loop convention.
//!
//! Reconciliation families have no persistent cron: each tick's last act is
//! to enqueue its own queue again with a future run time. The daemon's
//! dispatcher only ever runs jobs that are due, so cadence lives entirely in
//! the job rows. Queues are configured single-instance by convention; the
//! claim in [`PgQueue::claim_due`] flips rows to `running` before dispatch,
//! which keeps a misconfigured second instance from doubling work on the
//! same row, but is deliberately not a distributed lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Queue names, one per reconciliation family.
pub mod queues {
    pub const BASTION: &str = "bastion";
    pub const CLUSTER_PREPARE: &str = "cluster_prepare";
    pub const CLUSTER_CONVERGE: &str = "cluster_converge";
    pub const DNS: &str = "dns";
    pub const CLUSTER_ACTION: &str = "cluster_action";
}

/// Payload of a self-rescheduled loop job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPayload {
    pub interval_seconds: u64,
}

/// Payload of a one-shot administrator-triggered cluster action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterActionPayload {
    pub org_id: Uuid,
    pub cluster_id: Uuid,
    pub action: String,
    pub make_target: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub run_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_id: Uuid,
        queue: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError>;
}

/// Counters aggregated over one reconciliation tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl LoopStats {
    pub fn ok(&mut self) {
        self.scanned += 1;
        self.succeeded += 1;
    }

    pub fn err(&mut self) {
        self.scanned += 1;
        self.failed += 1;
    }
}

/// A claimed, due job as handed to the dispatcher.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueJob {
    pub id: Uuid,
    pub queue: String,
    pub payload: sqlx::types::Json<serde_json::Value>,
}

#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim up to `limit` due jobs, flipping them to `running`.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<DueJob>, QueueError> {
        let jobs: Vec<DueJob> = sqlx::query_as(
            "update jobs set status = 'running', attempts = attempts + 1, updated_at = now() \
             where id in (select id from jobs where status = 'queued' and run_at <= now() \
                          order by run_at limit $1 for update skip locked) \
             returning id, queue, payload",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn finish(&self, job_id: Uuid, ok: bool) -> Result<(), QueueError> {
        // A failed attempt goes back to `queued` while retries remain.
        sqlx::query(
            "update jobs set status = case \
                 when $2 then 'done'::job_status \
                 when attempts <= max_retries then 'queued'::job_status \
                 else 'failed'::job_status end, \
             updated_at = now() where id = $1",
        )
        .bind(job_id)
        .bind(ok)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgQueue {
    async fn enqueue(
        &self,
        job_id: Uuid,
        queue: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        sqlx::query(
            "insert into jobs (id, queue, payload, run_at, max_retries) \
             values ($1, $2, $3, $4, $5) on conflict (id) do nothing",
        )
        .bind(job_id)
        .bind(queue)
        .bind(sqlx::types::Json(payload))
        .bind(opts.run_at.unwrap_or_else(Utc::now))
        .bind(opts.max_retries)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Test queue: records every enqueue.
#[derive(Default)]
pub struct MemQueue {
    pub enqueued: Mutex<Vec<(Uuid, String, serde_json::Value, EnqueueOptions)>>,
}

impl MemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued_for(&self, queue: &str) -> usize {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, q, _, _)| q == queue)
            .count()
    }
}

#[async_trait]
impl JobQueue for MemQueue {
    async fn enqueue(
        &self,
        job_id: Uuid,
        queue: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        self.enqueued
            .lock()
            .unwrap()
            .push((job_id, queue.to_string(), payload, opts));
        Ok(())
    }
}
