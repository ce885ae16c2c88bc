//! Persistence seam between the workers and the relational store.
//!
//! Workers only ever see the [`Store`] trait; the daemon wires in
//! [`pg::PgStore`], tests wire in [`mem::MemStore`]. No method here spans an
//! external SSH or DNS call: every row update is its own statement, so a
//! crash between "external action succeeded" and "row updated" leaves a
//! stale row that the next tick retries.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Cluster, ClusterRun, ClusterStatus, Credential, Domain, DomainStatus, NodePool, RecordOwner,
    RecordSet, RecordStatus, RunStatus, Server, ServerRole, ServerStatus, SshKey,
};

pub mod mem;
pub mod pg;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row not found: {0}")]
    NotFound(&'static str),
    #[error("malformed row: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_servers(
        &self,
        role: ServerRole,
        status: ServerStatus,
        limit: i64,
    ) -> Result<Vec<Server>, StoreError>;
    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError>;
    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get_ssh_key(&self, id: Uuid) -> Result<Option<SshKey>, StoreError>;

    async fn list_clusters(
        &self,
        status: ClusterStatus,
        limit: i64,
    ) -> Result<Vec<Cluster>, StoreError>;
    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>, StoreError>;
    async fn update_cluster_status(
        &self,
        id: Uuid,
        status: ClusterStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn node_pools(&self, cluster_id: Uuid) -> Result<Vec<NodePool>, StoreError>;

    async fn insert_cluster_run(&self, run: &ClusterRun) -> Result<(), StoreError>;
    async fn update_cluster_run(
        &self,
        id: Uuid,
        status: RunStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn list_domains(
        &self,
        status: DomainStatus,
        limit: i64,
    ) -> Result<Vec<Domain>, StoreError>;
    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>, StoreError>;
    async fn set_domain_zone_id(&self, id: Uuid, zone_id: &str) -> Result<(), StoreError>;
    async fn update_domain_status(
        &self,
        id: Uuid,
        status: DomainStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn list_record_sets(
        &self,
        domain_id: Uuid,
        status: RecordStatus,
        limit: i64,
    ) -> Result<Vec<RecordSet>, StoreError>;
    async fn get_record_set(&self, id: Uuid) -> Result<Option<RecordSet>, StoreError>;
    async fn update_record_set_result(
        &self,
        id: Uuid,
        status: RecordStatus,
        owner: RecordOwner,
        fingerprint: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, StoreError>;

    async fn signing_secret(&self) -> Result<Option<String>, StoreError>;
    async fn put_signing_secret(&self, secret: &str) -> Result<(), StoreError>;
}
