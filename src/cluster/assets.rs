//! SSH and platform assets pushed to a cluster's bastion.
//!
//! All remote paths are relative to the SSH user's home directory, which is
//! where a one-shot exec channel lands.

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::ClusterError;
use crate::model::{Cluster, Server};
use crate::signing::AutomationToken;
use crate::ssh::script::{materialize_script, RemoteFile};

pub const KEYS_DIR: &str = ".ssh/autoglue/keys";

pub fn cluster_dir(cluster_id: Uuid) -> String {
    format!("autoglue/clusters/{cluster_id}")
}

pub fn key_path(key_id: Uuid) -> String {
    format!("{KEYS_DIR}/{key_id}.pem")
}

pub fn ssh_config_path(cluster_id: Uuid) -> String {
    format!(".ssh/autoglue/cluster-{cluster_id}.config")
}

pub fn payload_path(cluster_id: Uuid) -> String {
    format!("{}/payload.json", cluster_dir(cluster_id))
}

/// The JSON descriptor the remote automation image reads from
/// `payload.json` (mounted as `platform.json`).
#[derive(Debug, Serialize)]
pub struct PlatformDescriptor {
    pub cluster_id: Uuid,
    pub org_id: Uuid,
    pub cluster_name: String,
    /// Freshly minted short-lived org automation credential.
    pub automation: AutomationToken,
    pub dns: PlatformDns,
    pub load_balancers: Vec<PlatformRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct PlatformDns {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captain_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<PlatformRecord>,
}

#[derive(Debug, Serialize)]
pub struct PlatformRecord {
    pub fqdn: String,
    pub record_type: String,
}

/// One `Host` stanza per server, keyed by hostname (or id when the hostname
/// is empty), pointing at the private IP.
pub fn ssh_config(servers: &[Server]) -> String {
    let mut config = String::new();
    for server in servers {
        let label = if server.hostname.trim().is_empty() {
            server.id.to_string()
        } else {
            server.hostname.trim().to_string()
        };
        let key_file = server
            .ssh_key_id
            .map(|id| format!("~/{}", key_path(id)))
            .unwrap_or_default();
        config.push_str(&format!(
            "Host {label}\n\
             \x20   HostName {ip}\n\
             \x20   User {user}\n\
             \x20   IdentityFile {key_file}\n\
             \x20   IdentitiesOnly yes\n\
             \x20   StrictHostKeyChecking accept-new\n\n",
            ip = server.private_ip,
            user = server.ssh_user,
        ));
    }
    config
}

/// Everything the push script materializes on the bastion.
pub struct ClusterAssets {
    pub dirs: Vec<String>,
    pub files: Vec<RemoteFile>,
}

impl ClusterAssets {
    pub fn push_script(&self) -> String {
        materialize_script(&self.dirs, &self.files)
    }
}

/// Assemble the asset set for `cluster`: per-server private keys (already
/// decrypted and de-duplicated by key id), the SSH config, and the platform
/// descriptor.
pub fn build_assets(
    cluster: &Cluster,
    servers: &[Server],
    key_pems: &HashMap<Uuid, String>,
    descriptor: &PlatformDescriptor,
) -> Result<ClusterAssets, ClusterError> {
    let dirs = vec![KEYS_DIR.to_string(), cluster_dir(cluster.id)];

    let mut files = Vec::new();
    let mut key_ids: Vec<Uuid> = key_pems.keys().copied().collect();
    key_ids.sort();
    for key_id in key_ids {
        files.push(RemoteFile::new(
            key_path(key_id),
            0o600,
            key_pems[&key_id].as_bytes(),
        ));
    }
    files.push(RemoteFile::new(
        ssh_config_path(cluster.id),
        0o600,
        ssh_config(servers).into_bytes(),
    ));
    let payload = serde_json::to_vec_pretty(descriptor)
        .map_err(|e| ClusterError::Precondition(format!("unserializable descriptor: {e}")))?;
    files.push(RemoteFile::new(payload_path(cluster.id), 0o600, payload));

    Ok(ClusterAssets { dirs, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServerRole, ServerStatus};

    fn server(hostname: &str, ip: &str) -> Server {
        Server {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            hostname: hostname.into(),
            private_ip: ip.into(),
            public_ip: None,
            ssh_user: "ops".into(),
            ssh_key_id: Some(Uuid::new_v4()),
            role: ServerRole::Worker,
            status: ServerStatus::Ready,
            last_error: None,
            ssh_host_key: None,
        }
    }

    #[test]
    fn stanza_per_server_with_private_ip() {
        let a = server("node-a", "10.0.0.4");
        let b = server("", "10.0.0.5");
        let config = ssh_config(&[a.clone(), b.clone()]);
        assert!(config.contains("Host node-a\n"));
        assert!(config.contains(&format!("Host {}\n", b.id)));
        assert!(config.contains("HostName 10.0.0.4"));
        assert!(config.contains("IdentitiesOnly yes"));
        assert!(config.contains("StrictHostKeyChecking accept-new"));
        assert!(config.contains(&format!("~/{}", key_path(a.ssh_key_id.unwrap()))));
    }

    #[test]
    fn remote_paths_are_home_relative() {
        let id = Uuid::new_v4();
        assert!(!cluster_dir(id).starts_with('/'));
        assert!(!ssh_config_path(id).starts_with('/'));
        assert_eq!(payload_path(id), format!("autoglue/clusters/{id}/payload.json"));
    }
}
