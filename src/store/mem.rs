//! In-memory [`Store`] used by the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::model::{
    Cluster, ClusterRun, ClusterStatus, Credential, Domain, DomainStatus, NodePool, RecordOwner,
    RecordSet, RecordStatus, RunStatus, Server, ServerRole, ServerStatus, SshKey,
};

#[derive(Default)]
struct Inner {
    servers: HashMap<Uuid, Server>,
    ssh_keys: HashMap<Uuid, SshKey>,
    clusters: HashMap<Uuid, Cluster>,
    node_pools: Vec<NodePool>,
    runs: HashMap<Uuid, ClusterRun>,
    domains: HashMap<Uuid, Domain>,
    record_sets: HashMap<Uuid, RecordSet>,
    credentials: HashMap<Uuid, Credential>,
    signing_secret: Option<String>,
    insertion_order: Vec<Uuid>,
    server_status_log: Vec<(Uuid, ServerStatus)>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_server(&self, server: Server) {
        let mut g = self.inner.lock().unwrap();
        if !g.servers.contains_key(&server.id) {
            g.insertion_order.push(server.id);
        }
        g.servers.insert(server.id, server);
    }

    pub fn put_ssh_key(&self, key: SshKey) {
        self.inner.lock().unwrap().ssh_keys.insert(key.id, key);
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        let mut g = self.inner.lock().unwrap();
        if !g.clusters.contains_key(&cluster.id) {
            g.insertion_order.push(cluster.id);
        }
        g.clusters.insert(cluster.id, cluster);
    }

    pub fn put_node_pool(&self, pool: NodePool) {
        self.inner.lock().unwrap().node_pools.push(pool);
    }

    pub fn put_domain(&self, domain: Domain) {
        let mut g = self.inner.lock().unwrap();
        if !g.domains.contains_key(&domain.id) {
            g.insertion_order.push(domain.id);
        }
        g.domains.insert(domain.id, domain);
    }

    pub fn put_record_set(&self, rs: RecordSet) {
        let mut g = self.inner.lock().unwrap();
        if !g.record_sets.contains_key(&rs.id) {
            g.insertion_order.push(rs.id);
        }
        g.record_sets.insert(rs.id, rs);
    }

    pub fn put_credential(&self, credential: Credential) {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .insert(credential.id, credential);
    }

    pub fn server(&self, id: Uuid) -> Option<Server> {
        self.inner.lock().unwrap().servers.get(&id).cloned()
    }

    pub fn cluster(&self, id: Uuid) -> Option<Cluster> {
        self.inner.lock().unwrap().clusters.get(&id).cloned()
    }

    pub fn domain(&self, id: Uuid) -> Option<Domain> {
        self.inner.lock().unwrap().domains.get(&id).cloned()
    }

    pub fn record_set(&self, id: Uuid) -> Option<RecordSet> {
        self.inner.lock().unwrap().record_sets.get(&id).cloned()
    }

    pub fn run(&self, id: Uuid) -> Option<ClusterRun> {
        self.inner.lock().unwrap().runs.get(&id).cloned()
    }

    /// Every status a server row has been moved through, in order.
    pub fn server_statuses(&self, id: Uuid) -> Vec<ServerStatus> {
        self.inner
            .lock()
            .unwrap()
            .server_status_log
            .iter()
            .filter(|(sid, _)| *sid == id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn ordered<T: Clone>(
        order: &[Uuid],
        map: &HashMap<Uuid, T>,
        mut keep: impl FnMut(&T) -> bool,
        limit: i64,
    ) -> Vec<T> {
        let cap = limit.max(0) as usize;
        let mut out = Vec::new();
        for id in order {
            if out.len() >= cap {
                break;
            }
            if let Some(v) = map.get(id) {
                if keep(v) {
                    out.push(v.clone());
                }
            }
        }
        out
    }
}

#[async_trait]
impl Store for MemStore {
    async fn list_servers(
        &self,
        role: ServerRole,
        status: ServerStatus,
        limit: i64,
    ) -> Result<Vec<Server>, StoreError> {
        let g = self.inner.lock().unwrap();
        Ok(Self::ordered(
            &g.insertion_order,
            &g.servers,
            |s| s.role == role && s.status == status,
            limit,
        ))
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        Ok(self.inner.lock().unwrap().servers.get(&id).cloned())
    }

    async fn update_server_status(
        &self,
        id: Uuid,
        status: ServerStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let server = g.servers.get_mut(&id).ok_or(StoreError::NotFound("server"))?;
        server.status = status;
        server.last_error = last_error.map(String::from);
        g.server_status_log.push((id, status));
        Ok(())
    }

    async fn get_ssh_key(&self, id: Uuid) -> Result<Option<SshKey>, StoreError> {
        Ok(self.inner.lock().unwrap().ssh_keys.get(&id).cloned())
    }

    async fn list_clusters(
        &self,
        status: ClusterStatus,
        limit: i64,
    ) -> Result<Vec<Cluster>, StoreError> {
        let g = self.inner.lock().unwrap();
        Ok(Self::ordered(
            &g.insertion_order,
            &g.clusters,
            |c| c.status == status,
            limit,
        ))
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>, StoreError> {
        Ok(self.inner.lock().unwrap().clusters.get(&id).cloned())
    }

    async fn update_cluster_status(
        &self,
        id: Uuid,
        status: ClusterStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let cluster = g
            .clusters
            .get_mut(&id)
            .ok_or(StoreError::NotFound("cluster"))?;
        cluster.status = status;
        cluster.last_error = last_error.map(String::from);
        Ok(())
    }

    async fn node_pools(&self, cluster_id: Uuid) -> Result<Vec<NodePool>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .node_pools
            .iter()
            .filter(|p| p.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    async fn insert_cluster_run(&self, run: &ClusterRun) -> Result<(), StoreError> {
        self.inner.lock().unwrap().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_cluster_run(
        &self,
        id: Uuid,
        status: RunStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let run = g.runs.get_mut(&id).ok_or(StoreError::NotFound("cluster_run"))?;
        run.status = status;
        if output.is_some() {
            run.output = output.map(String::from);
        }
        run.error = error.map(String::from);
        let now = chrono::Utc::now();
        match status {
            RunStatus::Running => run.started_at = Some(now),
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled => {
                run.finished_at = Some(now)
            }
            RunStatus::Queued => {}
        }
        Ok(())
    }

    async fn list_domains(
        &self,
        status: DomainStatus,
        limit: i64,
    ) -> Result<Vec<Domain>, StoreError> {
        let g = self.inner.lock().unwrap();
        Ok(Self::ordered(
            &g.insertion_order,
            &g.domains,
            |d| d.status == status,
            limit,
        ))
    }

    async fn get_domain(&self, id: Uuid) -> Result<Option<Domain>, StoreError> {
        Ok(self.inner.lock().unwrap().domains.get(&id).cloned())
    }

    async fn set_domain_zone_id(&self, id: Uuid, zone_id: &str) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let domain = g.domains.get_mut(&id).ok_or(StoreError::NotFound("domain"))?;
        domain.zone_id = zone_id.to_string();
        Ok(())
    }

    async fn update_domain_status(
        &self,
        id: Uuid,
        status: DomainStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let domain = g.domains.get_mut(&id).ok_or(StoreError::NotFound("domain"))?;
        domain.status = status;
        domain.last_error = last_error.map(String::from);
        Ok(())
    }

    async fn list_record_sets(
        &self,
        domain_id: Uuid,
        status: RecordStatus,
        limit: i64,
    ) -> Result<Vec<RecordSet>, StoreError> {
        let g = self.inner.lock().unwrap();
        Ok(Self::ordered(
            &g.insertion_order,
            &g.record_sets,
            |r| r.domain_id == domain_id && r.status == status,
            limit,
        ))
    }

    async fn get_record_set(&self, id: Uuid) -> Result<Option<RecordSet>, StoreError> {
        Ok(self.inner.lock().unwrap().record_sets.get(&id).cloned())
    }

    async fn update_record_set_result(
        &self,
        id: Uuid,
        status: RecordStatus,
        owner: RecordOwner,
        fingerprint: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        let rs = g
            .record_sets
            .get_mut(&id)
            .ok_or(StoreError::NotFound("record_set"))?;
        rs.status = status;
        rs.owner = owner;
        if let Some(fp) = fingerprint {
            rs.fingerprint = fp.to_string();
        }
        rs.last_error = last_error.map(String::from);
        Ok(())
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<Credential>, StoreError> {
        Ok(self.inner.lock().unwrap().credentials.get(&id).cloned())
    }

    async fn signing_secret(&self) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().signing_secret.clone())
    }

    async fn put_signing_secret(&self, secret: &str) -> Result<(), StoreError> {
        let mut g = self.inner.lock().unwrap();
        if g.signing_secret.is_none() {
            g.signing_secret = Some(secret.to_string());
        }
        Ok(())
    }
}
