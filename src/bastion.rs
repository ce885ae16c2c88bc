//! Bastion bootstrap tick.
//!
//! Pending bastion-role servers get Docker installed over SSH and move to
//! `ready`. The install script is idempotent, so a row left in
//! `provisioning` by a crash is safe to retry after an operator resets it.

use std::time::Duration;
use uuid::Uuid;

use crate::cluster::ClusterError;
use crate::engine::{truncate_error, Engine};
use crate::model::{Server, ServerRole, ServerStatus};
use crate::scheduler::{queues, LoopStats};
use crate::ssh::script::bastion_install_script;
use crate::ssh::ExecTarget;

const OUTPUT_TAIL: usize = 800;

impl Engine {
    async fn bootstrap_bastion(&self, server: &Server) -> Result<(), ClusterError> {
        // No public IP means we cannot reach it at all; fail fast before
        // touching the row.
        let host = server.public_ip.clone().ok_or_else(|| {
            ClusterError::Precondition(format!("bastion {} has no public ip", server.id))
        })?;
        // The row flips to provisioning before any key material is handled.
        self.store
            .update_server_status(server.id, ServerStatus::Provisioning, None)
            .await?;

        let key_id = server.ssh_key_id.ok_or_else(|| {
            ClusterError::Precondition(format!("bastion {} has no ssh key", server.id))
        })?;
        let private_key_pem = self.decrypt_key_pem(server.org_id, key_id).await?;

        let target = ExecTarget {
            host,
            port: self.workers.ssh_port,
            user: server.ssh_user.clone(),
            private_key_pem,
        };
        let out = self
            .exec
            .exec(
                &target,
                &bastion_install_script(&server.ssh_user),
                Duration::from_secs(self.workers.bastion_install_timeout_seconds),
            )
            .await?;
        if !out.success() {
            return Err(ClusterError::Remote {
                class: crate::cluster::machine::classify_remote_failure(&out.output),
                detail: out.tail(OUTPUT_TAIL).to_string(),
            });
        }
        Ok(())
    }

    async fn fail_server(&self, server_id: Uuid, err: &ClusterError) {
        let msg = truncate_error(&err.to_string());
        if let Err(e) = self
            .store
            .update_server_status(server_id, ServerStatus::Failed, Some(&msg))
            .await
        {
            tracing::error!("Failed to mark server {server_id} failed: {e}");
        }
    }

    /// Tick for pending bastions. One host's failure never aborts the batch.
    #[tracing::instrument(name = "bastion_tick", skip(self))]
    pub async fn bastion_tick(&self) -> LoopStats {
        let mut stats = LoopStats::default();
        match self
            .store
            .list_servers(
                ServerRole::Bastion,
                ServerStatus::Pending,
                self.workers.bastion_batch,
            )
            .await
        {
            Ok(servers) => {
                for server in servers {
                    match self.bootstrap_bastion(&server).await {
                        Ok(()) => {
                            match self
                                .store
                                .update_server_status(server.id, ServerStatus::Ready, None)
                                .await
                            {
                                Ok(()) => {
                                    tracing::info!(
                                        "Bastion {} ({}) is ready",
                                        server.id,
                                        server.hostname
                                    );
                                    stats.ok();
                                }
                                Err(e) => {
                                    tracing::error!(
                                        "Failed to mark bastion {} ready: {e}",
                                        server.id
                                    );
                                    stats.err();
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Bootstrapping bastion {} failed: {e}", server.id);
                            self.fail_server(server.id, &e).await;
                            stats.err();
                        }
                    }
                }
            }
            Err(e) => tracing::error!("Failed to list pending bastions: {e}"),
        }

        self.reschedule(queues::BASTION, self.workers.bastion_interval_seconds)
            .await;
        stats
    }
}
