//! DNS provider seam.
//!
//! The reconciler drives providers exclusively through [`DnsProvider`];
//! a provider is built per domain from that domain's decrypted credential
//! via [`DnsProviderFactory`]. Only the Route53-shaped model is implemented,
//! but the ownership protocol above this trait is provider-agnostic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::model::AwsSecret;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("zone {0} not found")]
    ZoneNotFound(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("credential rejected: {0}")]
    Credential(String),
}

/// One UPSERT in a change batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub record_type: String,
    pub ttl: i64,
    /// Values exactly as they should land (TXT already quoted).
    pub values: Vec<String>,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Resolve a zone id from an apex name, if the provider hosts it.
    async fn find_zone_id(&self, name: &str) -> Result<Option<String>, DnsError>;
    /// Verify a zone id is fetchable.
    async fn check_zone(&self, zone_id: &str) -> Result<(), DnsError>;
    /// Values of the TXT record at `fqdn` (with trailing dot), if present.
    async fn lookup_txt(&self, zone_id: &str, fqdn: &str) -> Result<Option<Vec<String>>, DnsError>;
    /// Apply all changes as one atomic batch of UPSERTs.
    async fn apply(&self, zone_id: &str, changes: &[RecordChange]) -> Result<(), DnsError>;
}

#[async_trait]
pub trait DnsProviderFactory: Send + Sync {
    async fn connect(&self, secret: &AwsSecret) -> Result<Arc<dyn DnsProvider>, DnsError>;
}

/// In-memory provider for tests. Zones are `(zone_id, apex)`
/// pairs; records are keyed by `(zone_id, name, type)`.
#[derive(Default)]
pub struct MemoryDns {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    zones: HashMap<String, String>,
    records: HashMap<(String, String, String), RecordChange>,
    apply_calls: usize,
    fail_apply: bool,
}

impl MemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_zone(&self, zone_id: &str, apex: &str) {
        self.inner
            .lock()
            .unwrap()
            .zones
            .insert(zone_id.to_string(), apex.trim_end_matches('.').to_string());
    }

    /// Plant a record directly, bypassing `apply` (e.g. a competing
    /// controller's marker).
    pub fn seed_record(&self, zone_id: &str, change: RecordChange) {
        self.inner.lock().unwrap().records.insert(
            (
                zone_id.to_string(),
                normalize(&change.name),
                change.record_type.to_ascii_uppercase(),
            ),
            change,
        );
    }

    pub fn fail_next_applies(&self, fail: bool) {
        self.inner.lock().unwrap().fail_apply = fail;
    }

    pub fn record(&self, zone_id: &str, name: &str, record_type: &str) -> Option<RecordChange> {
        self.inner
            .lock()
            .unwrap()
            .records
            .get(&(
                zone_id.to_string(),
                normalize(name),
                record_type.to_ascii_uppercase(),
            ))
            .cloned()
    }

    pub fn apply_calls(&self) -> usize {
        self.inner.lock().unwrap().apply_calls
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl DnsProvider for MemoryDns {
    async fn find_zone_id(&self, name: &str) -> Result<Option<String>, DnsError> {
        let wanted = normalize(name);
        let g = self.inner.lock().unwrap();
        Ok(g.zones
            .iter()
            .find(|(_, apex)| **apex == wanted)
            .map(|(id, _)| id.clone()))
    }

    async fn check_zone(&self, zone_id: &str) -> Result<(), DnsError> {
        let g = self.inner.lock().unwrap();
        if g.zones.contains_key(zone_id) {
            Ok(())
        } else {
            Err(DnsError::ZoneNotFound(zone_id.to_string()))
        }
    }

    async fn lookup_txt(&self, zone_id: &str, fqdn: &str) -> Result<Option<Vec<String>>, DnsError> {
        let g = self.inner.lock().unwrap();
        Ok(g.records
            .get(&(zone_id.to_string(), normalize(fqdn), "TXT".to_string()))
            .map(|r| r.values.clone()))
    }

    async fn apply(&self, zone_id: &str, changes: &[RecordChange]) -> Result<(), DnsError> {
        let mut g = self.inner.lock().unwrap();
        g.apply_calls += 1;
        if g.fail_apply {
            return Err(DnsError::Provider("injected apply failure".to_string()));
        }
        if !g.zones.contains_key(zone_id) {
            return Err(DnsError::ZoneNotFound(zone_id.to_string()));
        }
        // Atomic: validate first, then insert everything.
        for change in changes {
            g.records.insert(
                (
                    zone_id.to_string(),
                    normalize(&change.name),
                    change.record_type.to_ascii_uppercase(),
                ),
                change.clone(),
            );
        }
        Ok(())
    }
}

/// Factory that hands every credential the same shared [`MemoryDns`].
pub struct MemoryDnsFactory {
    provider: Arc<MemoryDns>,
}

impl MemoryDnsFactory {
    pub fn new(provider: Arc<MemoryDns>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DnsProviderFactory for MemoryDnsFactory {
    async fn connect(&self, _secret: &AwsSecret) -> Result<Arc<dyn DnsProvider>, DnsError> {
        Ok(self.provider.clone())
    }
}
