//! Per-organization envelope crypto.
//!
//! The rest of the system consumes this purely through the [`Vault`] trait:
//! `encrypt_for_org` / `decrypt_for_org` pairs over base64 (ciphertext, iv,
//! tag) triples. The shipped implementation seals under AES-256-GCM with a
//! per-org subkey derived from a single master key, so tenants never share
//! key material.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::model::Sealed;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("malformed sealed value: {0}")]
    Malformed(String),
    #[error("decryption failed for org {0}")]
    Decrypt(Uuid),
    #[error("encryption failed for org {0}")]
    Encrypt(Uuid),
}

#[async_trait]
pub trait Vault: Send + Sync {
    async fn encrypt_for_org(&self, org_id: Uuid, plaintext: &[u8]) -> Result<Sealed, VaultError>;
    async fn decrypt_for_org(&self, org_id: Uuid, sealed: &Sealed) -> Result<Vec<u8>, VaultError>;
}

/// AES-256-GCM vault keyed from a single master secret.
pub struct EnvelopeVault {
    master_key: Vec<u8>,
}

impl EnvelopeVault {
    pub fn new(master_key: Vec<u8>) -> Self {
        Self { master_key }
    }

    pub fn from_base64(master_key_b64: &str) -> Result<Self, VaultError> {
        let master_key = B64
            .decode(master_key_b64)
            .map_err(|e| VaultError::Malformed(format!("master key is not base64: {e}")))?;
        Ok(Self::new(master_key))
    }

    fn org_key(&self, org_id: Uuid) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.master_key);
        hasher.update(org_id.as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl Vault for EnvelopeVault {
    async fn encrypt_for_org(&self, org_id: Uuid, plaintext: &[u8]) -> Result<Sealed, VaultError> {
        let key = self.org_key(org_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; the store keeps them as
        // separate columns, so split it back off.
        let mut sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Encrypt(org_id))?;
        if sealed.len() < TAG_LEN {
            return Err(VaultError::Encrypt(org_id));
        }
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(Sealed {
            ciphertext: B64.encode(&sealed),
            iv: B64.encode(nonce_bytes),
            tag: B64.encode(&tag),
        })
    }

    async fn decrypt_for_org(&self, org_id: Uuid, sealed: &Sealed) -> Result<Vec<u8>, VaultError> {
        let mut ciphertext = B64
            .decode(&sealed.ciphertext)
            .map_err(|e| VaultError::Malformed(format!("ciphertext: {e}")))?;
        let iv = B64
            .decode(&sealed.iv)
            .map_err(|e| VaultError::Malformed(format!("iv: {e}")))?;
        let tag = B64
            .decode(&sealed.tag)
            .map_err(|e| VaultError::Malformed(format!("tag: {e}")))?;
        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(VaultError::Malformed("bad iv/tag length".into()));
        }
        ciphertext.extend_from_slice(&tag);

        let key = self.org_key(org_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| VaultError::Decrypt(org_id))
    }
}

/// No-crypto vault for tests: "sealed" values are just base64.
pub struct PlainVault;

#[async_trait]
impl Vault for PlainVault {
    async fn encrypt_for_org(&self, _org_id: Uuid, plaintext: &[u8]) -> Result<Sealed, VaultError> {
        Ok(Sealed {
            ciphertext: B64.encode(plaintext),
            iv: String::new(),
            tag: String::new(),
        })
    }

    async fn decrypt_for_org(&self, _org_id: Uuid, sealed: &Sealed) -> Result<Vec<u8>, VaultError> {
        B64.decode(&sealed.ciphertext)
            .map_err(|e| VaultError::Malformed(format!("ciphertext: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seal_round_trips() {
        let vault = EnvelopeVault::new(b"test-master-key".to_vec());
        let org = Uuid::new_v4();
        let sealed = vault.encrypt_for_org(org, b"-----BEGIN KEY-----").await.unwrap();
        let opened = vault.decrypt_for_org(org, &sealed).await.unwrap();
        assert_eq!(opened, b"-----BEGIN KEY-----");
    }

    #[tokio::test]
    async fn orgs_do_not_share_keys() {
        let vault = EnvelopeVault::new(b"test-master-key".to_vec());
        let sealed = vault
            .encrypt_for_org(Uuid::new_v4(), b"secret")
            .await
            .unwrap();
        let err = vault.decrypt_for_org(Uuid::new_v4(), &sealed).await;
        assert!(matches!(err, Err(VaultError::Decrypt(_))));
    }
}
