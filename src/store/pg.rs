//! PostgreSQL-backed [`Store`].
//!
//! Uses the runtime query API throughout so the crate builds without a live
//! `DATABASE_URL`; the schema lives in `migrations/` and is applied by the
//! daemon on startup.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::model::{
    Cluster, ClusterRun, ClusterStatus, Credential, CredentialScope, Domain, DomainStatus,
    NodePool, RecordOwner, RecordSet, RecordStatus, RunStatus, Sealed, Server, ServerRole,
    ServerStatus, SshKey,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: Uuid,
    org_id: Uuid,
    hostname: String,
    private_ip: String,
    public_ip: Option<String>,
    ssh_user: String,
    ssh_key_id: Option<Uuid>,
    role: ServerRole,
    status: ServerStatus,
    last_error: Option<String>,
    ssh_host_key: Option<String>,
}

impl From<ServerRow> for Server {
    fn from(r: ServerRow) -> Self {
        Server {
            id: r.id,
            org_id: r.org_id,
            hostname: r.hostname,
            private_ip: r.private_ip,
            public_ip: r.public_ip,
            ssh_user: r.ssh_user,
            ssh_key_id: r.ssh_key_id,
            role: r.role,
            status: r.status,
            last_error: r.last_error,
            ssh_host_key: r.ssh_host_key,
        }
    }
}

const SERVER_COLS: &str = "id, org_id, hostname, private_ip, public_ip, ssh_user, ssh_key_id, \
                           role, status, last_error, ssh_host_key";

#[derive(sqlx::FromRow)]
struct SshKeyRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    private_key_ciphertext: String,
    private_key_iv: String,
    private_key_tag: String,
    public_key: String,
}

impl From<SshKeyRow> for SshKey {
    fn from(r: SshKeyRow) -> Self {
        SshKey {
            id: r.id,
            org_id: r.org_id,
            name: r.name,
            private_key: Sealed {
                ciphertext: r.private_key_ciphertext,
                iv: r.private_key_iv,
                tag: r.private_key_tag,
            },
            public_key: r.public_key,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClusterRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    status: ClusterStatus,
    last_error: Option<String>,
    bastion_id: Option<Uuid>,
    captain_domain_id: Option<Uuid>,
    control_plane_record_set_id: Option<Uuid>,
    load_balancer_record_set_ids: Vec<Uuid>,
    docker_image: String,
    docker_tag: String,
    kubeconfig_ciphertext: Option<String>,
    kubeconfig_iv: Option<String>,
    kubeconfig_tag: Option<String>,
}

impl From<ClusterRow> for Cluster {
    fn from(r: ClusterRow) -> Self {
        let kubeconfig = match (r.kubeconfig_ciphertext, r.kubeconfig_iv, r.kubeconfig_tag) {
            (Some(ciphertext), Some(iv), Some(tag)) => Some(Sealed {
                ciphertext,
                iv,
                tag,
            }),
            _ => None,
        };
        Cluster {
            id: r.id,
            org_id: r.org_id,
            name: r.name,
            status: r.status,
            last_error: r.last_error,
            bastion_id: r.bastion_id,
            captain_domain_id: r.captain_domain_id,
            control_plane_record_set_id: r.control_plane_record_set_id,
            load_balancer_record_set_ids: r.load_balancer_record_set_ids,
            docker_image: r.docker_image,
            docker_tag: r.docker_tag,
            kubeconfig,
        }
    }
}

const CLUSTER_COLS: &str = "id, org_id, name, status, last_error, bastion_id, captain_domain_id, \
                            control_plane_record_set_id, load_balancer_record_set_ids, \
                            docker_image, docker_tag, kubeconfig_ciphertext, kubeconfig_iv, \
                            kubeconfig_tag";

#[derive(sqlx::FromRow)]
struct NodePoolRow {
    id: Uuid,
    cluster_id: Uuid,
    name: String,
    role: ServerRole,
    labels: Json<serde_json::Value>,
    taints: Json<serde_json::Value>,
    annotations: Json<serde_json::Value>,
}

#[derive(sqlx::FromRow)]
struct DomainRow {
    id: Uuid,
    org_id: Uuid,
    domain_name: String,
    credential_id: Uuid,
    zone_id: String,
    status: DomainStatus,
    last_error: Option<String>,
}

impl From<DomainRow> for Domain {
    fn from(r: DomainRow) -> Self {
        Domain {
            id: r.id,
            org_id: r.org_id,
            domain_name: r.domain_name,
            credential_id: r.credential_id,
            zone_id: r.zone_id,
            status: r.status,
            last_error: r.last_error,
        }
    }
}

const DOMAIN_COLS: &str = "id, org_id, domain_name, credential_id, zone_id, status, last_error";

#[derive(sqlx::FromRow)]
struct RecordSetRow {
    id: Uuid,
    org_id: Uuid,
    domain_id: Uuid,
    name: String,
    record_type: String,
    ttl: i64,
    record_values: Vec<String>,
    fingerprint: String,
    status: RecordStatus,
    owner: RecordOwner,
    last_error: Option<String>,
}

impl From<RecordSetRow> for RecordSet {
    fn from(r: RecordSetRow) -> Self {
        RecordSet {
            id: r.id,
            org_id: r.org_id,
            domain_id: r.domain_id,
            name: r.name,
            record_type: r.record_type,
            ttl: r.ttl,
            values: r.record_values,
            fingerprint: r.fingerprint,
            status: r.status,
            owner: r.owner,
            last_error: r.last_error,
        }
    }
}

const RECORD_SET_COLS: &str = "id, org_id, domain_id, name, record_type, ttl, record_values, \
                               fingerprint, status, owner, last_error";

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    scope: Json<CredentialScope>,
    secret_ciphertext: String,
    secret_iv: String,
    secret_tag: String,
}

impl From<CredentialRow> for Credential {
    fn from(r: CredentialRow) -> Self {
        Credential {
            id: r.id,
            org_id: r.org_id,
            name: r.name,
            scope: r.scope.0,
            secret: Sealed {
                ciphertext: r.secret_ciphertext,
                iv: r.secret_iv,
                tag: r.secret_tag,
            },
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_servers(
        &self,
        role: ServerRole,
        status: ServerStatus,
        limit: i64,
    ) -> Result<Vec<Server>, StoreError> {
        let rows: Vec<ServerRow> = sqlx::query_as(&format!(
            "select {SERVER_COLS} from servers \
             where role = $1 and status = $2 order by created_at limit $3"
        ))
        .bind(role)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let row: Option<ServerRow> =
            sqlx::query_as(&format!("select {SERVER_COLS} from servers where id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("update servers set status = $1, last_error = $2, updated_at = now() where id = $3")
            .bind(status)
            .bind(last_error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_ssh_key(&self, id: Uuid) -> Result<Option<SshKey>, StoreError> {
        let row: Option<SshKeyRow> = sqlx::query_as(
            "select id, org_id, name, private_key_ciphertext, private_key_iv, private_key_tag, \
             public_key from ssh_keys where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_clusters(
        &self,
        status: ClusterStatus,
        limit: i64,
    ) -> Result<Vec<Cluster>, StoreError> {
        let rows: Vec<ClusterRow> = sqlx::query_as(&format!(
            "select {CLUSTER_COLS} from clusters \
             where status = $1 order by created_at limit $2"
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>, StoreError> {
        let row: Option<ClusterRow> =
            sqlx::query_as(&format!("select {CLUSTER_COLS} from clusters where id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn update_cluster_status(
        &self,
        id: Uuid,
        status: ClusterStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "update clusters set status = $1, last_error = $2, updated_at = now() where id = $3",
        )
        .bind(status)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn node_pools(&self, cluster_id: Uuid) -> Result<Vec<NodePool>, StoreError> {
        let rows: Vec<NodePoolRow> = sqlx::query_as(
            "select id, cluster_id, name, role, labels, taints, annotations \
             from node_pools where cluster_id = $1 order by created_at",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;

        let mut pools = Vec::with_capacity(rows.len());
        for row in rows {
            let member_ids: Vec<(Uuid,)> =
                sqlx::query_as("select server_id from node_pool_members where node_pool_id = $1")
                    .bind(row.id)
                    .fetch_all(&self.pool)
                    .await?;
            pools.push(NodePool {
                id: row.id,
                cluster_id: row.cluster_id,
                name: row.name,
                role: row.role,
                labels: row.labels.0,
                taints: row.taints.0,
                annotations: row.annotations.0,
                server_ids: member_ids.into_iter().map(|(id,)| id).collect(),
            });
        }
        Ok(pools)
    }

    async fn insert_cluster_run(&self, run: &ClusterRun) -> Result<(), StoreError> {
        sqlx::query(
            "insert into cluster_runs \
             (id, org_id, cluster_id, action, make_target, status, job_id, output, error, \
              started_at, finished_at) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(run.id)
        .bind(run.org_id)
        .bind(run.cluster_id)
        .bind(&run.action)
        .bind(&run.make_target)
        .bind(run.status)
        .bind(run.job_id)
        .bind(run.output.as_deref())
        .bind(run.error.as_deref())
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_cluster_run(
        &self,
        id: Uuid,
        status: RunStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "update cluster_runs set status = $1, output = coalesce($2, output), \
             error = $3, \
             started_at = case when $1 = 'running'::run_status then now() else started_at end, \
             finished_at = case when $1 in ('succeeded'::run_status, 'failed'::run_status, \
             'canceled'::run_status) then now() else finished_at end \
             where id = $4",
        )
        .bind(status)
        .bind(output)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_domains(
        &self,
        status: DomainStatus,
        limit: i64,
    ) -> Result<Vec<Domain>, StoreError> {
        let rows: Vec<DomainRow> = sqlx::query_as(&format!(
            "select {DOMAIN_COLS} from domains where status = $1 order by created_at limit $2"
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>, StoreError> {
        let row: Option<DomainRow> =
            sqlx::query_as(&format!("select {DOMAIN_COLS} from domains where id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn set_domain_zone_id(&self, id: Uuid, zone_id: &str) -> Result<(), StoreError> {
        sqlx::query("update domains set zone_id = $1, updated_at = now() where id = $2")
            .bind(zone_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_domain_status(
        &self,
        id: Uuid,
        status: DomainStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "update domains set status = $1, last_error = $2, updated_at = now() where id = $3",
        )
        .bind(status)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_record_sets(
        &self,
        domain_id: Uuid,
        status: RecordStatus,
        limit: i64,
    ) -> Result<Vec<RecordSet>, StoreError> {
        let rows: Vec<RecordSetRow> = sqlx::query_as(&format!(
            "select {RECORD_SET_COLS} from record_sets \
             where domain_id = $1 and status = $2 order by created_at limit $3"
        ))
        .bind(domain_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_record_set(&self, id: Uuid) -> Result<Option<RecordSet>, StoreError> {
        let row: Option<RecordSetRow> =
            sqlx::query_as(&format!("select {RECORD_SET_COLS} from record_sets where id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn update_record_set_result(
        &self,
        id: Uuid,
        status: RecordStatus,
        owner: RecordOwner,
        fingerprint: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "update record_sets set status = $1, owner = $2, \
             fingerprint = coalesce($3, fingerprint), last_error = $4, updated_at = now() \
             where id = $5",
        )
        .bind(status)
        .bind(owner)
        .bind(fingerprint)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, StoreError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "select id, org_id, name, scope, secret_ciphertext, secret_iv, secret_tag \
             from credentials where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn signing_secret(&self) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("select value from settings where key = 'signing_secret'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn put_signing_secret(&self, secret: &str) -> Result<(), StoreError> {
        sqlx::query(
            "insert into settings (key, value) values ('signing_secret', $1) \
             on conflict (key) do nothing",
        )
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
