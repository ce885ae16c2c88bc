//! Shared context for all reconciliation workers.
//!
//! Every collaborator arrives as an injected trait object: the store, the
//! envelope vault, the remote executor, the DNS provider factory, and the
//! job queue. Worker ticks live in their own modules (`cluster::worker`,
//! `bastion`, `dns::reconcile`) as further `impl Engine` blocks.

use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{DnsConfig, WorkersConfig};
use crate::dns::provider::DnsProviderFactory;
use crate::scheduler::{EnqueueOptions, JobQueue, LoopPayload};
use crate::secrets::Vault;
use crate::signing::SigningKeys;
use crate::ssh::RemoteExec;
use crate::store::Store;

/// Persisted error strings are capped so a dumped build log cannot bloat a
/// row.
pub const MAX_ERROR_LEN: usize = 2000;

pub fn truncate_error(msg: &str) -> String {
    if msg.len() <= MAX_ERROR_LEN {
        return msg.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg[..end].to_string()
}

pub struct Engine {
    pub store: Arc<dyn Store>,
    pub vault: Arc<dyn Vault>,
    pub exec: Arc<dyn RemoteExec>,
    pub dns: Arc<dyn DnsProviderFactory>,
    pub queue: Arc<dyn JobQueue>,
    pub signing: Arc<SigningKeys>,
    pub workers: WorkersConfig,
    pub dns_cfg: DnsConfig,
}

impl Engine {
    /// Re-enqueue a loop family. Always the tick's last act, regardless of
    /// per-row outcomes; a failure here is logged and surfaced to the
    /// dispatcher, which re-arms the family itself.
    pub async fn reschedule(&self, queue_name: &str, interval_seconds: u64) {
        let run_at = Utc::now() + TimeDelta::seconds(interval_seconds as i64);
        let payload = serde_json::to_value(LoopPayload { interval_seconds })
            .expect("loop payload cannot fail to serialize");
        if let Err(e) = self
            .queue
            .enqueue(
                Uuid::new_v4(),
                queue_name,
                payload,
                EnqueueOptions {
                    run_at: Some(run_at),
                    max_retries: 1,
                },
            )
            .await
        {
            tracing::error!("Failed to reschedule queue '{queue_name}': {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_bounded_and_boundary_safe() {
        let long = "é".repeat(MAX_ERROR_LEN);
        let out = truncate_error(&long);
        assert!(out.len() <= MAX_ERROR_LEN);
        assert!(long.starts_with(&out));
        assert_eq!(truncate_error("short"), "short");
    }
}
