//! Signed, purpose-tagged, time-limited tokens.
//!
//! A token is `base64url(json envelope) "." base64url(hmac-sha256)`. The
//! envelope carries the purpose, the expiry (unix seconds) and the payload.
//! Nothing is stored server side: a token is valid while its signature checks
//! out, its purpose matches, and it has not expired.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Secret length used when one is generated at startup.
pub const SECRET_LENGTH: usize = 32;

/// The operation a token may be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Confirm,
    Reset,
    ChangeEmail,
    Auth,
}

/// Public verification failure. The cause is deliberately not exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid or expired token")]
pub struct TokenError;

/// Why a token was rejected. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Malformed,
    BadSignature,
    Expired,
    WrongPurpose,
}

#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    purpose: TokenPurpose,
    exp: i64,
    data: P,
}

#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Codec with a random secret. Tokens die with the process.
    pub fn with_random_secret() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; SECRET_LENGTH];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret.to_vec())
    }

    pub fn issue<P: Serialize>(
        &self,
        purpose: TokenPurpose,
        payload: &P,
        ttl_secs: u64,
    ) -> String {
        self.issue_at(Utc::now(), purpose, payload, ttl_secs)
    }

    pub fn issue_at<P: Serialize>(
        &self,
        now: DateTime<Utc>,
        purpose: TokenPurpose,
        payload: &P,
        ttl_secs: u64,
    ) -> String {
        let exp = now
            .timestamp()
            .saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        let envelope = Envelope {
            purpose,
            exp,
            data: payload,
        };
        // Serializing plain structs to JSON does not fail
        let json = serde_json::to_vec(&envelope).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(body.as_bytes()));
        format!("{body}.{signature}")
    }

    pub fn verify<P: DeserializeOwned>(
        &self,
        token: &str,
        expected: TokenPurpose,
    ) -> Result<P, TokenError> {
        self.verify_at(Utc::now(), token, expected)
    }

    pub fn verify_at<P: DeserializeOwned>(
        &self,
        now: DateTime<Utc>,
        token: &str,
        expected: TokenPurpose,
    ) -> Result<P, TokenError> {
        self.decode(now, token, expected).map_err(|reason| {
            tracing::debug!(?reason, ?expected, "Rejected token");
            TokenError
        })
    }

    fn decode<P: DeserializeOwned>(
        &self,
        now: DateTime<Utc>,
        token: &str,
        expected: TokenPurpose,
    ) -> Result<P, Rejection> {
        let (body, signature) = token.split_once('.').ok_or(Rejection::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Rejection::Malformed)?;

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Rejection::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| Rejection::Malformed)?;
        let envelope: Envelope<P> =
            serde_json::from_slice(&json).map_err(|_| Rejection::Malformed)?;

        if now.timestamp() >= envelope.exp {
            return Err(Rejection::Expired);
        }
        if envelope.purpose != expected {
            return Err(Rejection::WrongPurpose);
        }

        Ok(envelope.data)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 takes keys of any size"),
        }
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
