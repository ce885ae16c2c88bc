//! Route53-backed [`DnsProvider`].
//!
//! One client per domain credential; the scope check happens before this
//! layer is ever reached, so the only policy here is mapping SDK errors
//! into [`DnsError`].

use async_trait::async_trait;
use aws_sdk_route53::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use std::sync::Arc;

use super::provider::{DnsError, DnsProvider, DnsProviderFactory, RecordChange};
use crate::model::AwsSecret;

/// Route53 hands back `/hostedzone/Z...`; rows store the bare id.
pub fn strip_zone_prefix(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

fn dotted(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.'))
}

pub struct Route53Dns {
    client: Client,
}

impl Route53Dns {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DnsProvider for Route53Dns {
    async fn find_zone_id(&self, name: &str) -> Result<Option<String>, DnsError> {
        let wanted = dotted(&name.to_ascii_lowercase());
        let out = self
            .client
            .list_hosted_zones_by_name()
            .dns_name(&wanted)
            .max_items(1)
            .send()
            .await
            .map_err(|e| DnsError::Provider(e.to_string()))?;
        Ok(out
            .hosted_zones()
            .iter()
            .find(|z| z.name().eq_ignore_ascii_case(&wanted))
            .map(|z| strip_zone_prefix(z.id()).to_string()))
    }

    async fn check_zone(&self, zone_id: &str) -> Result<(), DnsError> {
        self.client
            .get_hosted_zone()
            .id(zone_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_hosted_zone() {
                    DnsError::ZoneNotFound(zone_id.to_string())
                } else {
                    DnsError::Provider(service_err.to_string())
                }
            })
    }

    async fn lookup_txt(&self, zone_id: &str, fqdn: &str) -> Result<Option<Vec<String>>, DnsError> {
        let wanted = dotted(&fqdn.to_ascii_lowercase());
        let out = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(zone_id)
            .start_record_name(&wanted)
            .start_record_type(RrType::Txt)
            .max_items(1)
            .send()
            .await
            .map_err(|e| DnsError::Provider(e.to_string()))?;
        Ok(out
            .resource_record_sets()
            .iter()
            .find(|set| {
                set.name().eq_ignore_ascii_case(&wanted) && *set.r#type() == RrType::Txt
            })
            .map(|set| {
                set.resource_records()
                    .iter()
                    .map(|r| r.value().to_string())
                    .collect()
            }))
    }

    async fn apply(&self, zone_id: &str, changes: &[RecordChange]) -> Result<(), DnsError> {
        let mut upserts = Vec::with_capacity(changes.len());
        for change in changes {
            let mut records = Vec::with_capacity(change.values.len());
            for value in &change.values {
                records.push(
                    ResourceRecord::builder()
                        .value(value)
                        .build()
                        .map_err(|e| DnsError::Provider(e.to_string()))?,
                );
            }
            let set = ResourceRecordSet::builder()
                .name(dotted(&change.name))
                .r#type(RrType::from(change.record_type.to_ascii_uppercase().as_str()))
                .ttl(change.ttl)
                .set_resource_records(Some(records))
                .build()
                .map_err(|e| DnsError::Provider(e.to_string()))?;
            upserts.push(
                Change::builder()
                    .action(ChangeAction::Upsert)
                    .resource_record_set(set)
                    .build()
                    .map_err(|e| DnsError::Provider(e.to_string()))?,
            );
        }
        let batch = ChangeBatch::builder()
            .set_changes(Some(upserts))
            .build()
            .map_err(|e| DnsError::Provider(e.to_string()))?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DnsError::Provider(e.to_string()))
    }
}

pub struct Route53Factory {
    default_region: String,
}

impl Route53Factory {
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            default_region: default_region.into(),
        }
    }
}

#[async_trait]
impl DnsProviderFactory for Route53Factory {
    async fn connect(&self, secret: &AwsSecret) -> Result<Arc<dyn DnsProvider>, DnsError> {
        if secret.access_key_id.is_empty() || secret.secret_access_key.is_empty() {
            return Err(DnsError::Credential("empty access key material".into()));
        }
        let credentials = Credentials::new(
            secret.access_key_id.clone(),
            secret.secret_access_key.clone(),
            None,
            None,
            "autoglue",
        );
        let region = Region::new(
            secret
                .region
                .clone()
                .unwrap_or_else(|| self.default_region.clone()),
        );
        let config = aws_sdk_route53::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .build();
        Ok(Arc::new(Route53Dns::new(Client::from_conf(config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_prefix_is_stripped() {
        assert_eq!(strip_zone_prefix("/hostedzone/Z0123456789"), "Z0123456789");
        assert_eq!(strip_zone_prefix("Z0123456789"), "Z0123456789");
    }

    #[test]
    fn names_get_trailing_dots() {
        assert_eq!(dotted("api.example.com"), "api.example.com.");
        assert_eq!(dotted("api.example.com."), "api.example.com.");
    }
}
