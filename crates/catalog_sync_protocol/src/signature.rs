//! Request signatures.
//!
//! Every push and pull carries two headers:
//! - `x-sync-timestamp`: sender's clock as unix milliseconds
//! - `x-sync-signature`: lowercase hex HMAC-SHA256 over `"{timestamp}." || body`
//!
//! For pulls the signed body is the canonical query string
//! (see `PullQuery::to_query_string`).

use crate::error::{ProtocolError, ProtocolResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "x-sync-signature";

/// Header carrying the signing timestamp (unix millis).
pub const TIMESTAMP_HEADER: &str = "x-sync-timestamp";

/// The secret shared by both replicas. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wraps raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl From<&str> for SharedSecret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

fn mac(secret: &SharedSecret, body: &[u8], timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Signs `body` at `timestamp`, returning the hex signature.
pub fn sign(secret: &SharedSecret, body: &[u8], timestamp: i64) -> String {
    hex::encode(mac(secret, body, timestamp).finalize().into_bytes())
}

/// Verifies a hex signature in constant time.
pub fn verify(secret: &SharedSecret, body: &[u8], timestamp: i64, signature: &str) -> bool {
    let Ok(raw) = hex::decode(signature.trim()) else {
        return false;
    };
    mac(secret, body, timestamp).verify_slice(&raw).is_ok()
}

/// Checks that `timestamp` is within `window_ms` of `now`, in either direction.
pub fn check_skew(timestamp: i64, now: i64, window_ms: i64) -> ProtocolResult<()> {
    if now.abs_diff(timestamp) > window_ms.unsigned_abs() {
        return Err(ProtocolError::TimestampOutOfWindow {
            timestamp,
            now,
            window_ms,
        });
    }
    Ok(())
}

/// The header pair attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Signing time (unix millis).
    pub timestamp: i64,
    /// Hex signature.
    pub signature: String,
}

impl SignedHeaders {
    /// Signs `body` at `timestamp`.
    pub fn new(secret: &SharedSecret, body: &[u8], timestamp: i64) -> Self {
        Self {
            timestamp,
            signature: sign(secret, body, timestamp),
        }
    }

    /// Returns `(name, value)` pairs ready to be set on a request.
    pub fn pairs(&self) -> [(&'static str, String); 2] {
        [
            (TIMESTAMP_HEADER, self.timestamp.to_string()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }
}
