//! Precondition checks and remote-failure classification for the cluster
//! state machine. Transition ordering itself lives on
//! [`ClusterStatus`](crate::model::ClusterStatus).

use std::fmt;

use super::assets::cluster_dir;
use super::ClusterError;
use crate::model::{Cluster, NodePool, Server, ServerStatus};

/// Gate for `pre_pending -> pending`. Every later transition re-checks the
/// bastion through [`require_ready_bastion`].
pub fn validate_prepare(
    cluster: &Cluster,
    bastion: Option<&Server>,
    pools: &[NodePool],
) -> Result<(), ClusterError> {
    require_ready_bastion(bastion)?;
    if cluster.captain_domain_id.is_none() {
        return Err(ClusterError::Precondition(
            "cluster has no captain domain".into(),
        ));
    }
    if cluster.control_plane_record_set_id.is_none() {
        return Err(ClusterError::Precondition(
            "cluster has no control-plane record set".into(),
        ));
    }
    if !pools.iter().any(|p| !p.server_ids.is_empty()) {
        return Err(ClusterError::Precondition(
            "cluster needs at least one node pool with at least one attached server".into(),
        ));
    }
    Ok(())
}

pub fn require_ready_bastion(bastion: Option<&Server>) -> Result<(), ClusterError> {
    match bastion {
        None => Err(ClusterError::Precondition("cluster has no bastion".into())),
        Some(b) if b.status != ServerStatus::Ready => Err(ClusterError::Precondition(format!(
            "bastion {} is not ready (status {:?})",
            b.id, b.status
        ))),
        Some(_) => Ok(()),
    }
}

/// The fixed automation invocation run on the bastion.
pub fn remote_make_command(cluster: &Cluster, target: &str) -> String {
    format!(
        "cd {dir} && docker run -it \
         -v \"$HOME/.ssh/autoglue:/root/.ssh\" \
         -v ./payload.json:/opt/autoglue/platform.json \
         {image}:{tag} make {target}",
        dir = cluster_dir(cluster.id),
        image = cluster.docker_image,
        tag = cluster.docker_tag,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailureClass {
    NameResolution,
    Permission,
    PackageManager,
    Generic,
}

impl fmt::Display for RemoteFailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteFailureClass::NameResolution => "name_resolution_failure",
            RemoteFailureClass::Permission => "permission_denied",
            RemoteFailureClass::PackageManager => "package_manager_failure",
            RemoteFailureClass::Generic => "command_failure",
        })
    }
}

/// Classify the combined output of a failed remote command.
pub fn classify_remote_failure(output: &str) -> RemoteFailureClass {
    let lower = output.to_ascii_lowercase();
    if lower.contains("could not resolve")
        || lower.contains("name or service not known")
        || lower.contains("temporary failure in name resolution")
    {
        RemoteFailureClass::NameResolution
    } else if lower.contains("permission denied") {
        RemoteFailureClass::Permission
    } else if lower.contains("apt-get")
        || lower.contains("apt ")
        || lower.contains("dpkg")
        || lower.contains("yum ")
    {
        RemoteFailureClass::PackageManager
    } else {
        RemoteFailureClass::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterStatus, ServerRole};
    use uuid::Uuid;

    fn cluster() -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "c1".into(),
            status: ClusterStatus::PrePending,
            last_error: None,
            bastion_id: Some(Uuid::new_v4()),
            captain_domain_id: Some(Uuid::new_v4()),
            control_plane_record_set_id: Some(Uuid::new_v4()),
            load_balancer_record_set_ids: vec![],
            docker_image: "autoglue/automation".into(),
            docker_tag: "v3".into(),
            kubeconfig: None,
        }
    }

    fn bastion(status: ServerStatus) -> Server {
        Server {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            hostname: "bastion".into(),
            private_ip: "10.0.0.1".into(),
            public_ip: Some("203.0.113.7".into()),
            ssh_user: "ops".into(),
            ssh_key_id: Some(Uuid::new_v4()),
            role: ServerRole::Bastion,
            status,
            last_error: None,
            ssh_host_key: None,
        }
    }

    fn pool_with_servers(n: usize) -> NodePool {
        NodePool {
            id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            name: "workers".into(),
            role: ServerRole::Worker,
            labels: serde_json::json!({}),
            taints: serde_json::json!([]),
            annotations: serde_json::json!({}),
            server_ids: (0..n).map(|_| Uuid::new_v4()).collect(),
        }
    }

    #[test]
    fn prepare_requires_ready_bastion() {
        let c = cluster();
        let pools = [pool_with_servers(1)];
        assert!(validate_prepare(&c, None, &pools).is_err());
        assert!(validate_prepare(&c, Some(&bastion(ServerStatus::Pending)), &pools).is_err());
        assert!(validate_prepare(&c, Some(&bastion(ServerStatus::Ready)), &pools).is_ok());
    }

    #[test]
    fn prepare_requires_populated_pool() {
        let c = cluster();
        let b = bastion(ServerStatus::Ready);
        assert!(validate_prepare(&c, Some(&b), &[]).is_err());
        assert!(validate_prepare(&c, Some(&b), &[pool_with_servers(0)]).is_err());
        assert!(validate_prepare(&c, Some(&b), &[pool_with_servers(0), pool_with_servers(2)]).is_ok());
    }

    #[test]
    fn prepare_requires_dns_references() {
        let b = bastion(ServerStatus::Ready);
        let pools = [pool_with_servers(1)];
        let mut c = cluster();
        c.captain_domain_id = None;
        assert!(validate_prepare(&c, Some(&b), &pools).is_err());
        let mut c = cluster();
        c.control_plane_record_set_id = None;
        assert!(validate_prepare(&c, Some(&b), &pools).is_err());
    }

    #[test]
    fn make_command_targets_the_cluster_dir() {
        let c = cluster();
        let cmd = remote_make_command(&c, "ping-servers");
        assert!(cmd.starts_with(&format!("cd autoglue/clusters/{}", c.id)));
        assert!(cmd.contains("autoglue/automation:v3"));
        assert!(cmd.ends_with("make ping-servers"));
    }

    #[test]
    fn failure_classification() {
        assert_eq!(
            classify_remote_failure("ssh: Could not resolve hostname node-a"),
            RemoteFailureClass::NameResolution,
        );
        assert_eq!(
            classify_remote_failure("bash: /usr/bin/docker: Permission denied"),
            RemoteFailureClass::Permission,
        );
        assert_eq!(
            classify_remote_failure("E: apt-get update failed to fetch"),
            RemoteFailureClass::PackageManager,
        );
        assert_eq!(
            classify_remote_failure("make: *** [setup] Error 2"),
            RemoteFailureClass::Generic,
        );
    }
}
