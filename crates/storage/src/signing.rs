//! HMAC-SHA256 signing for time-limited download links.
//!
//! A link carries `expires` (unix seconds) and `signature`, the hex
//! HMAC of `"{path}\n{expires}"` under the server secret.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::StorageError;

type HmacSha256 = Hmac<Sha256>;

/// Length of a generated secret.
const GENERATED_SECRET_LENGTH: usize = 48;

/// Signs and verifies download links.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// A signer with a random secret. Links do not survive a restart.
    pub fn random() -> Self {
        let secret: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(GENERATED_SECRET_LENGTH)
            .map(char::from)
            .collect();
        Self::new(secret)
    }

    /// Hex signature of `path` valid until `expires`.
    pub fn sign(&self, path: &str, expires: i64) -> String {
        hex::encode(self.mac(path, expires).finalize().into_bytes())
    }

    /// Check `signature` for `path` and that `expires` is in the future.
    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> Result<(), StorageError> {
        if expires < Utc::now().timestamp() {
            return Err(StorageError::Signature(format!("link for {path} expired")));
        }
        let provided = hex::decode(signature)
            .ok_or_else(|| StorageError::Signature("malformed signature".into()))?;
        self.mac(path, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::Signature(format!("signature mismatch for {path}")))
    }

    fn mac(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode a hex string; `None` when malformed.
    pub fn decode(text: &str) -> Option<Vec<u8>> {
        if text.len() % 2 != 0 {
            return None;
        }
        (0..text.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
            .collect()
    }
}
