//! Domain rows and status enums shared between the store and the workers.
//!
//! Statuses are worker-owned: the API layer only ever writes `pending` /
//! `pre_pending`, everything after that is driven by reconciliation ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "server_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    Bastion,
    Master,
    Worker,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "server_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Pending,
    Provisioning,
    Ready,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cluster_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    PrePending,
    Pending,
    Provisioning,
    Ready,
    Failed,
}

impl ClusterStatus {
    fn rank(self) -> u8 {
        match self {
            ClusterStatus::PrePending => 0,
            ClusterStatus::Pending => 1,
            ClusterStatus::Provisioning => 2,
            ClusterStatus::Ready => 3,
            // `failed` is a trap state with no automatic exit; rank it past
            // `ready` so no forward transition can leave it.
            ClusterStatus::Failed => 4,
        }
    }

    /// Transitions are strictly forward. `failed` may be entered from any
    /// non-terminal state but never left.
    pub fn may_advance_to(self, next: ClusterStatus) -> bool {
        if self == ClusterStatus::Failed {
            return false;
        }
        if next == ClusterStatus::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "domain_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "record_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "record_owner", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordOwner {
    Autoglue,
    External,
    Unknown,
}

/// An encrypted blob as produced by [`crate::secrets::Vault::encrypt_for_org`].
/// All three parts are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct SshKey {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub private_key: Sealed,
    pub public_key: String,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub id: Uuid,
    pub org_id: Uuid,
    pub hostname: String,
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub ssh_user: String,
    pub ssh_key_id: Option<Uuid>,
    pub role: ServerRole,
    pub status: ServerStatus,
    pub last_error: Option<String>,
    pub ssh_host_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub status: ClusterStatus,
    pub last_error: Option<String>,
    pub bastion_id: Option<Uuid>,
    pub captain_domain_id: Option<Uuid>,
    pub control_plane_record_set_id: Option<Uuid>,
    pub load_balancer_record_set_ids: Vec<Uuid>,
    pub docker_image: String,
    pub docker_tag: String,
    pub kubeconfig: Option<Sealed>,
}

#[derive(Debug, Clone)]
pub struct NodePool {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub role: ServerRole,
    pub labels: serde_json::Value,
    pub taints: serde_json::Value,
    pub annotations: serde_json::Value,
    pub server_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub id: Uuid,
    pub org_id: Uuid,
    pub cluster_id: Uuid,
    pub action: String,
    pub make_target: String,
    pub status: RunStatus,
    pub job_id: Uuid,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub id: Uuid,
    pub org_id: Uuid,
    pub domain_name: String,
    pub credential_id: Uuid,
    /// Hosted zone id; backfilled by the reconciler when empty.
    pub zone_id: String,
    pub status: DomainStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordSet {
    pub id: Uuid,
    pub org_id: Uuid,
    pub domain_id: Uuid,
    /// Relative to the domain; empty or `@` means the apex.
    pub name: String,
    pub record_type: String,
    pub ttl: i64,
    pub values: Vec<String>,
    pub fingerprint: String,
    pub status: RecordStatus,
    pub owner: RecordOwner,
    pub last_error: Option<String>,
}

impl RecordSet {
    /// The fully-qualified name of this record under `domain`, lower-cased,
    /// without trailing dot.
    pub fn fqdn(&self, domain: &Domain) -> String {
        let apex = domain.domain_name.trim_end_matches('.').to_ascii_lowercase();
        let rel = self.name.trim().trim_end_matches('.').to_ascii_lowercase();
        if rel.is_empty() || rel == "@" {
            apex
        } else {
            format!("{rel}.{apex}")
        }
    }
}

/// Typed, versioned declaration of what a credential may be used for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialScope {
    pub version: u32,
    pub provider: String,
    pub service: String,
    #[serde(default)]
    pub domain_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub scope: CredentialScope,
    pub secret: Sealed,
}

/// Decrypted payload of a Route53-scoped [`Credential`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSecret {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub region: Option<String>,
}
