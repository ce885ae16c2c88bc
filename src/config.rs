use miette::{IntoDiagnostic, WrapErr};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AutoglueConfig {
    /// Configuration for connecting to PostgreSQL server.
    pub database: DatabaseConfig,
    /// Envelope-crypto master key.
    pub secrets: SecretsConfig,
    /// Reconciliation worker cadence, batching, and timeouts.
    #[serde(default)]
    pub workers: WorkersConfig,
    /// DNS reconciler knobs.
    #[serde(default)]
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// IP address of database server, OR path to Unix socket.
    ///
    /// **NOTE**: if this is a path to a unix socket, `port` MUST be set to `None`.
    pub host: String,
    /// Port of the database server, or `None` if using a Unix socket.
    pub port: Option<u16>,
    /// Name of the database to connect to.
    pub database: String,
    /// Name of the user to connect with.
    pub user: String,
    /// Authentication credentials, if necessary.
    pub auth: Option<DatabaseCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseCredentials {
    /// Use a password to connect to the database.
    Password(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Base64 master key all per-org subkeys derive from.
    pub master_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Self-reschedule offsets per reconciliation family, in seconds.
    pub bastion_interval_seconds: u64,
    pub cluster_prepare_interval_seconds: u64,
    pub cluster_converge_interval_seconds: u64,
    pub dns_interval_seconds: u64,

    /// Batch limits per tick.
    pub bastion_batch: i64,
    pub cluster_batch: i64,
    pub dns_max_domains: i64,
    pub dns_max_records: i64,

    /// Per-operation deadlines, in seconds.
    pub push_timeout_seconds: u64,
    pub ping_timeout_seconds: u64,
    pub setup_timeout_seconds: u64,
    pub bastion_install_timeout_seconds: u64,

    /// Lifetime of minted automation tokens, in seconds.
    pub automation_token_ttl_seconds: i64,

    pub ssh_port: u16,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            bastion_interval_seconds: 60,
            cluster_prepare_interval_seconds: 60,
            cluster_converge_interval_seconds: 60,
            dns_interval_seconds: 60,
            bastion_batch: 10,
            cluster_batch: 5,
            dns_max_domains: 10,
            dns_max_records: 50,
            push_timeout_seconds: 8 * 60,
            ping_timeout_seconds: 30 * 60,
            setup_timeout_seconds: 60 * 60,
            bastion_install_timeout_seconds: 8 * 60,
            automation_token_ttl_seconds: 60 * 60,
            ssh_port: 22,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Fake external-dns owner id planted in poison records; the preflight
    /// treats exactly this id as our own.
    pub poison_owner_id: String,
    /// TTL for marker and poison TXT records.
    pub marker_ttl: i64,
    /// Region used when a credential does not carry one.
    pub default_region: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            poison_owner_id: "autoglue".to_string(),
            marker_ttl: 300,
            default_region: "us-east-1".to_string(),
        }
    }
}

/// Load the daemon configuration: TOML file overlaid with
/// `AUTOGLUE_`-prefixed environment variables.
pub fn load_configuration(path: &Path) -> miette::Result<AutoglueConfig> {
    use figment::providers::{self, Format};
    figment::Figment::new()
        .merge(providers::Toml::file(path))
        .merge(providers::Env::prefixed("AUTOGLUE_").split("__"))
        .extract()
        .into_diagnostic()
        .wrap_err("Failed to extract autoglue configuration")
}
