//! Lock-guarded signing-key service.
//!
//! Holds the process-wide JWT signing secret behind an `RwLock` instead of
//! package-level mutable state; `refresh` (re)loads it from the store,
//! creating one on first use. Workers mint short-lived per-org automation
//! tokens from it when assembling a cluster's platform descriptor.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("signing keys not loaded; call refresh first")]
    NotLoaded,
    #[error("token encoding failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct AutomationClaims {
    sub: Uuid,
    jti: Uuid,
    iat: i64,
    exp: i64,
}

/// One minted automation credential, embedded in `payload.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationToken {
    pub key_id: Uuid,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SigningKeys {
    secret: RwLock<Option<String>>,
}

impl SigningKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the signing secret from the store, creating one if none exists
    /// yet. Safe to call repeatedly; later calls pick up rotations.
    pub async fn refresh(&self, store: &dyn Store) -> Result<(), SigningError> {
        let secret = match store.signing_secret().await? {
            Some(secret) => secret,
            None => {
                let mut raw = [0u8; 48];
                rand::rngs::OsRng.fill_bytes(&mut raw);
                let fresh = B64.encode(raw);
                store.put_signing_secret(&fresh).await?;
                // Another instance may have won the insert race; re-read.
                store.signing_secret().await?.unwrap_or(fresh)
            }
        };
        *self.secret.write().await = Some(secret);
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.secret.read().await.is_some()
    }

    pub async fn mint_automation_token(
        &self,
        org_id: Uuid,
        ttl: TimeDelta,
    ) -> Result<AutomationToken, SigningError> {
        let guard = self.secret.read().await;
        let secret = guard.as_ref().ok_or(SigningError::NotLoaded)?;

        let key_id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = AutomationClaims {
            sub: org_id,
            jti: key_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;

        Ok(AutomationToken {
            key_id,
            secret: token,
            expires_at,
        })
    }
}
