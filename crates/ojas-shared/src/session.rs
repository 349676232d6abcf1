//! Signed session tokens.
//!
//! A token is `base64url(claims_json) "." base64url(ed25519_signature)`,
//! where the signature covers the encoded claims segment. The server signs
//! with its own key; the same token authenticates REST requests (bearer)
//! and the relay `join` event.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::UserId;

/// What a session token asserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks session tokens with a single Ed25519 key.
#[derive(Clone)]
pub struct SessionSigner {
    signing_key: SigningKey,
    ttl: Duration,
}

impl SessionSigner {
    /// Generate a signer with a random key (tokens die with the process).
    pub fn generate(ttl: Duration) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            ttl,
        }
    }

    /// Restore a signer from a persisted 32-byte seed.
    pub fn from_seed(seed: &[u8; 32], ttl: Duration) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            ttl,
        }
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Issue a token for `user_id`, valid from `now` for the configured TTL.
    pub fn issue(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<String, SessionError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(SessionError::ExpiryOutOfRange)?;
        let claims = SessionClaims {
            user_id: user_id.clone(),
            issued_at: now,
            expires_at,
        };
        // Serializing a struct of strings and timestamps cannot fail.
        let claims_json = serde_json::to_vec(&claims).unwrap_or_default();
        let encoded_claims = URL_SAFE_NO_PAD.encode(claims_json);
        let signature = self.signing_key.sign(encoded_claims.as_bytes());

        Ok(format!(
            "{encoded_claims}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        verify_session_token(token, &self.verifying_key_bytes(), now)
    }
}

/// Check a token against the issuer's public key and the current time.
pub fn verify_session_token(
    token: &str,
    issuer_pubkey: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<SessionClaims, SessionError> {
    let (encoded_claims, encoded_signature) =
        token.trim().split_once('.').ok_or(SessionError::Malformed)?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(encoded_signature)
        .map_err(|_| SessionError::Malformed)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| SessionError::Malformed)?;

    let verifying_key =
        VerifyingKey::from_bytes(issuer_pubkey).map_err(|_| SessionError::InvalidSignature)?;
    verifying_key
        .verify(encoded_claims.as_bytes(), &signature)
        .map_err(|_| SessionError::InvalidSignature)?;

    let claims_json = URL_SAFE_NO_PAD
        .decode(encoded_claims)
        .map_err(|_| SessionError::Malformed)?;
    let claims: SessionClaims =
        serde_json::from_slice(&claims_json).map_err(|_| SessionError::Malformed)?;

    if now >= claims.expires_at {
        return Err(SessionError::Expired);
    }

    Ok(claims)
}
