//! The DNS reconciliation tick.
//!
//! Phase A validates pending domains: credential scope, zone-id backfill,
//! zone reachability. Phase B walks pending record sets under ready domains
//! and, after the two ownership preflights, lands each one as a single
//! atomic upsert batch of real record, marker, and poison TXTs.

use std::sync::Arc;
use thiserror::Error;

use super::fingerprint;
use super::marker::{
    external_dns_names, marker_name, parse_heritage_owner, poison_value, Marker,
};
use super::provider::{DnsError, DnsProvider, RecordChange};
use crate::engine::{truncate_error, Engine};
use crate::model::{AwsSecret, Credential, Domain, DomainStatus, RecordOwner, RecordSet, RecordStatus};
use crate::scheduler::{queues, LoopStats};
use crate::secrets::VaultError;
use crate::store::StoreError;

/// Credential scope shape every Route53 domain credential must declare.
const SCOPE_VERSION: u32 = 1;
const SCOPE_PROVIDER: &str = "aws";
const SCOPE_SERVICE: &str = "route53";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("dns error: {0}")]
    Dns(#[from] DnsError),
    #[error("credential rejected: {0}")]
    Credential(String),
}

/// Preflight verdict for one record set.
enum Preflight {
    Clear,
    /// A competing controller already owns the name; message carries the
    /// `ownership_conflict` prefix the API layer keys on.
    Conflict(String),
}

/// Outcome of one record attempt that did not error outright. A conflict is
/// a failed row, not a reconciled one; the tick counts it as such.
enum Reconciled {
    Applied,
    Conflict,
}

impl Engine {
    /// Load, scope-check, and decrypt the domain's credential, then build a
    /// provider client from it.
    async fn domain_provider(
        &self,
        domain: &Domain,
    ) -> Result<Arc<dyn DnsProvider>, ReconcileError> {
        let credential = self
            .store
            .get_credential(domain.credential_id)
            .await?
            .ok_or_else(|| {
                ReconcileError::Credential(format!(
                    "credential {} not found",
                    domain.credential_id
                ))
            })?;
        check_scope(&credential, domain)?;

        let raw = self
            .vault
            .decrypt_for_org(domain.org_id, &credential.secret)
            .await?;
        let secret: AwsSecret = serde_json::from_slice(&raw).map_err(|e| {
            ReconcileError::Credential(format!("credential {} is not an aws secret: {e}", credential.id))
        })?;
        Ok(self.dns.connect(&secret).await?)
    }

    /// Phase A for one domain: backfill the zone id if empty, verify the
    /// zone is fetchable.
    async fn validate_domain(&self, domain: &Domain) -> Result<(), ReconcileError> {
        let provider = self.domain_provider(domain).await?;

        let zone_id = if domain.zone_id.is_empty() {
            let found = provider
                .find_zone_id(&domain.domain_name)
                .await?
                .ok_or_else(|| {
                    ReconcileError::Dns(DnsError::ZoneNotFound(format!(
                        "no hosted zone for {}",
                        domain.domain_name
                    )))
                })?;
            self.store.set_domain_zone_id(domain.id, &found).await?;
            found
        } else {
            domain.zone_id.clone()
        };

        provider.check_zone(&zone_id).await?;
        Ok(())
    }

    /// Both ownership preflights, in order: external-dns heritage names
    /// first, then the autoglue marker.
    async fn preflight(
        &self,
        provider: &dyn DnsProvider,
        domain: &Domain,
        rs: &RecordSet,
        fqdn: &str,
        expected: &Marker,
    ) -> Result<Preflight, ReconcileError> {
        let (plain, typed) = external_dns_names(fqdn, &rs.record_type);
        for name in [&plain, &typed] {
            if let Some(values) = provider.lookup_txt(&domain.zone_id, name).await? {
                for value in &values {
                    if let Some(owner) = parse_heritage_owner(value) {
                        if owner != self.dns_cfg.poison_owner_id {
                            return Ok(Preflight::Conflict(format!(
                                "ownership_conflict: {fqdn} is registered to external-dns \
                                 owner '{owner}' via {name}"
                            )));
                        }
                    }
                }
            }
        }

        let marker = marker_name(fqdn);
        if let Some(values) = provider.lookup_txt(&domain.zone_id, &marker).await? {
            for value in &values {
                if let Some(found) = Marker::parse(value) {
                    if !found.same_owner(rs.org_id, rs.id) {
                        return Ok(Preflight::Conflict(format!(
                            "ownership_conflict: marker at {marker} belongs to org {} record {}",
                            found.org_id, found.record_id
                        )));
                    }
                    if found.short_fp != expected.short_fp {
                        // stale fp self-heals with the upsert below
                        tracing::debug!("Marker at {marker} carries a stale fingerprint");
                    }
                }
            }
        }

        Ok(Preflight::Clear)
    }

    async fn reconcile_record(
        &self,
        provider: &dyn DnsProvider,
        domain: &Domain,
        rs: &RecordSet,
    ) -> Result<Reconciled, ReconcileError> {
        let fqdn = rs.fqdn(domain);
        let fp = fingerprint::fingerprint(
            &domain.zone_id,
            &fqdn,
            &rs.record_type,
            rs.ttl,
            &rs.values,
        );
        let expected = Marker::new(rs.org_id, rs.id, fingerprint::short(&fp));

        match self.preflight(provider, domain, rs, &fqdn, &expected).await? {
            Preflight::Conflict(msg) => {
                tracing::warn!("Record set {}: {msg}", rs.id);
                self.store
                    .update_record_set_result(
                        rs.id,
                        RecordStatus::Failed,
                        RecordOwner::External,
                        None,
                        Some(&truncate_error(&msg)),
                    )
                    .await?;
                return Ok(Reconciled::Conflict);
            }
            Preflight::Clear => {}
        }

        let record_type = rs.record_type.to_ascii_uppercase();
        let values = if record_type == "TXT" {
            rs.values.iter().map(|v| quote_txt(v)).collect()
        } else {
            rs.values.clone()
        };
        let (plain, typed) = external_dns_names(&fqdn, &rs.record_type);
        let poison = vec![quote_txt(&poison_value(&self.dns_cfg.poison_owner_id))];
        let changes = vec![
            RecordChange {
                name: format!("{fqdn}."),
                record_type,
                ttl: rs.ttl,
                values,
            },
            RecordChange {
                name: marker_name(&fqdn),
                record_type: "TXT".to_string(),
                ttl: self.dns_cfg.marker_ttl,
                values: vec![quote_txt(&expected.encode())],
            },
            RecordChange {
                name: plain,
                record_type: "TXT".to_string(),
                ttl: self.dns_cfg.marker_ttl,
                values: poison.clone(),
            },
            RecordChange {
                name: typed,
                record_type: "TXT".to_string(),
                ttl: self.dns_cfg.marker_ttl,
                values: poison,
            },
        ];

        provider.apply(&domain.zone_id, &changes).await?;
        self.store
            .update_record_set_result(
                rs.id,
                RecordStatus::Ready,
                RecordOwner::Autoglue,
                Some(&fp),
                None,
            )
            .await?;
        tracing::info!("Record set {} ({fqdn}) reconciled", rs.id);
        Ok(Reconciled::Applied)
    }

    async fn dns_phase_a(&self, stats: &mut LoopStats) {
        let domains = match self
            .store
            .list_domains(DomainStatus::Pending, self.workers.dns_max_domains)
            .await
        {
            Ok(domains) => domains,
            Err(e) => {
                tracing::error!("Failed to list pending domains: {e}");
                return;
            }
        };
        for domain in domains {
            match self.validate_domain(&domain).await {
                Ok(()) => {
                    if let Err(e) = self
                        .store
                        .update_domain_status(domain.id, DomainStatus::Ready, None)
                        .await
                    {
                        tracing::error!("Failed to mark domain {} ready: {e}", domain.id);
                        stats.err();
                    } else {
                        tracing::info!("Domain {} ({}) validated", domain.id, domain.domain_name);
                        stats.ok();
                    }
                }
                Err(e) => {
                    tracing::warn!("Validating domain {} failed: {e}", domain.id);
                    let msg = truncate_error(&e.to_string());
                    if let Err(e) = self
                        .store
                        .update_domain_status(domain.id, DomainStatus::Failed, Some(&msg))
                        .await
                    {
                        tracing::error!("Failed to mark domain {} failed: {e}", domain.id);
                    }
                    stats.err();
                }
            }
        }
    }

    async fn dns_phase_b(&self, stats: &mut LoopStats) {
        let domains = match self
            .store
            .list_domains(DomainStatus::Ready, self.workers.dns_max_domains)
            .await
        {
            Ok(domains) => domains,
            Err(e) => {
                tracing::error!("Failed to list ready domains: {e}");
                return;
            }
        };
        for domain in domains {
            let records = match self
                .store
                .list_record_sets(domain.id, RecordStatus::Pending, self.workers.dns_max_records)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(
                        "Failed to list pending record sets for domain {}: {e}",
                        domain.id
                    );
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }
            let provider = match self.domain_provider(&domain).await {
                Ok(provider) => provider,
                Err(e) => {
                    // Provider construction failing fails every pending row
                    // under the domain with the same cause.
                    tracing::warn!("Building provider for domain {} failed: {e}", domain.id);
                    let msg = truncate_error(&e.to_string());
                    for rs in &records {
                        if let Err(e) = self
                            .store
                            .update_record_set_result(
                                rs.id,
                                RecordStatus::Failed,
                                rs.owner,
                                None,
                                Some(&msg),
                            )
                            .await
                        {
                            tracing::error!("Failed to mark record set {} failed: {e}", rs.id);
                        }
                        stats.err();
                    }
                    continue;
                }
            };
            for rs in records {
                if rs.owner == RecordOwner::External {
                    // owner=external is terminal regardless of status edits
                    let msg = "ownership_conflict: row is owned by an external controller";
                    if let Err(e) = self
                        .store
                        .update_record_set_result(
                            rs.id,
                            RecordStatus::Failed,
                            RecordOwner::External,
                            None,
                            Some(msg),
                        )
                        .await
                    {
                        tracing::error!("Failed to mark record set {} failed: {e}", rs.id);
                    }
                    stats.err();
                    continue;
                }
                match self.reconcile_record(provider.as_ref(), &domain, &rs).await {
                    Ok(Reconciled::Applied) => stats.ok(),
                    Ok(Reconciled::Conflict) => stats.err(),
                    Err(e) => {
                        tracing::warn!("Reconciling record set {} failed: {e}", rs.id);
                        let msg = truncate_error(&e.to_string());
                        // owner is left as it was; unknown rows stay unknown
                        if let Err(e) = self
                            .store
                            .update_record_set_result(
                                rs.id,
                                RecordStatus::Failed,
                                rs.owner,
                                None,
                                Some(&msg),
                            )
                            .await
                        {
                            tracing::error!("Failed to mark record set {} failed: {e}", rs.id);
                        }
                        stats.err();
                    }
                }
            }
        }
    }

    /// One DNS reconciliation tick: domain validation, then record upserts.
    #[tracing::instrument(name = "dns_tick", skip(self))]
    pub async fn dns_tick(&self) -> LoopStats {
        let mut stats = LoopStats::default();
        self.dns_phase_a(&mut stats).await;
        self.dns_phase_b(&mut stats).await;
        self.reschedule(queues::DNS, self.workers.dns_interval_seconds)
            .await;
        stats
    }
}

fn check_scope(credential: &Credential, domain: &Domain) -> Result<(), ReconcileError> {
    if credential.org_id != domain.org_id {
        return Err(ReconcileError::Credential(format!(
            "credential {} belongs to another organization",
            credential.id
        )));
    }
    let scope = &credential.scope;
    if scope.version != SCOPE_VERSION {
        return Err(ReconcileError::Credential(format!(
            "unsupported scope version {}",
            scope.version
        )));
    }
    if scope.provider != SCOPE_PROVIDER || scope.service != SCOPE_SERVICE {
        return Err(ReconcileError::Credential(format!(
            "scope {}/{} is not {SCOPE_PROVIDER}/{SCOPE_SERVICE}",
            scope.provider, scope.service
        )));
    }
    if let Some(scoped_domain) = scope.domain_id {
        if scoped_domain != domain.id {
            return Err(ReconcileError::Credential(format!(
                "credential {} is scoped to another domain",
                credential.id
            )));
        }
    }
    Ok(())
}

/// Route53 TXT values must arrive quoted; leave already-quoted values alone.
fn quote_txt(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialScope;
    use uuid::Uuid;

    fn credential(org_id: Uuid, scope: CredentialScope) -> Credential {
        Credential {
            id: Uuid::new_v4(),
            org_id,
            name: "dns".into(),
            scope,
            secret: crate::model::Sealed {
                ciphertext: String::new(),
                iv: String::new(),
                tag: String::new(),
            },
        }
    }

    fn domain(org_id: Uuid) -> Domain {
        Domain {
            id: Uuid::new_v4(),
            org_id,
            domain_name: "example.com".into(),
            credential_id: Uuid::new_v4(),
            zone_id: "Z1".into(),
            status: DomainStatus::Pending,
            last_error: None,
        }
    }

    #[test]
    fn scope_enforces_org_provider_service() {
        let org = Uuid::new_v4();
        let d = domain(org);
        let good = CredentialScope {
            version: 1,
            provider: "aws".into(),
            service: "route53".into(),
            domain_id: None,
        };
        assert!(check_scope(&credential(org, good.clone()), &d).is_ok());
        assert!(check_scope(&credential(Uuid::new_v4(), good.clone()), &d).is_err());

        let mut wrong = good.clone();
        wrong.provider = "gcp".into();
        assert!(check_scope(&credential(org, wrong), &d).is_err());

        let mut wrong = good.clone();
        wrong.service = "s3".into();
        assert!(check_scope(&credential(org, wrong), &d).is_err());

        let mut pinned = good;
        pinned.domain_id = Some(d.id);
        assert!(check_scope(&credential(org, pinned.clone()), &d).is_ok());
        pinned.domain_id = Some(Uuid::new_v4());
        assert!(check_scope(&credential(org, pinned), &d).is_err());
    }

    #[test]
    fn txt_quoting_is_idempotent() {
        assert_eq!(quote_txt("abc"), "\"abc\"");
        assert_eq!(quote_txt("\"abc\""), "\"abc\"");
    }
}
