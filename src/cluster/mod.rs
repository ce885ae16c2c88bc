//! Cluster bootstrap: asset building, the forward-only state machine, and
//! the reconciliation ticks that drive it over SSH via the org's bastion.

use thiserror::Error;

use crate::secrets::VaultError;
use crate::signing::SigningError;
use crate::ssh::SshError;
use crate::store::StoreError;

pub mod assets;
pub mod machine;
pub mod worker;

pub use machine::RemoteFailureClass;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Terminal for the row until an operator edits it.
    #[error("precondition: {0}")]
    Precondition(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),
    #[error("remote {class}: {detail}")]
    Remote {
        class: RemoteFailureClass,
        detail: String,
    },
    #[error("decrypted secret is not valid utf-8: {0}")]
    Utf8(String),
}
