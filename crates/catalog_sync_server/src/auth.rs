//! Request authentication for the sync server.
//!
//! Every push and pull carries `x-sync-timestamp` (unix milliseconds) and
//! `x-sync-signature`, an HMAC-SHA256 over `"{timestamp}." + signed bytes`
//! with the shared secret. Push signs the raw body; pull signs the raw query
//! string.
//!
//! A request is refused when its timestamp lies outside the skew window,
//! when the signature does not match, or when the same signature was already
//! accepted inside the window.

use crate::error::{ServerError, ServerResult};
use catalog_sync_protocol::{check_skew, verify, SharedSecret};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

/// Remembers accepted signatures for one skew window.
#[derive(Debug)]
pub struct ReplayGuard {
    window_ms: i64,
    seen: Mutex<HashMap<String, i64>>,
}

impl ReplayGuard {
    /// Creates a guard remembering signatures for `window_ms`.
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records `signature`; returns false if it was already seen.
    ///
    /// Entries whose timestamp has left the window are forgotten, since the
    /// skew check refuses those requests anyway.
    pub fn check_and_record(&self, signature: &str, timestamp: i64, now: i64) -> bool {
        let mut seen = self.seen.lock();
        let horizon = now.saturating_sub(self.window_ms);
        seen.retain(|_, ts| *ts >= horizon);

        if seen.contains_key(signature) {
            return false;
        }
        seen.insert(signature.to_string(), timestamp);
        true
    }

    /// Returns the number of remembered signatures.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if no signature is remembered.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// Verifies signed requests.
#[derive(Debug)]
pub struct RequestVerifier {
    secret: SharedSecret,
    window_ms: i64,
    replay: ReplayGuard,
}

impl RequestVerifier {
    /// Creates a verifier for `secret` with a skew window of `window_ms`.
    pub fn new(secret: SharedSecret, window_ms: i64) -> Self {
        Self {
            secret,
            window_ms,
            replay: ReplayGuard::new(window_ms),
        }
    }

    /// Returns the replay guard.
    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Checks the signature headers of a request at server time `now_ms`.
    ///
    /// Runs before the request is parsed, so a refused request has no
    /// effect at all.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        signed: &[u8],
        now_ms: i64,
    ) -> ServerResult<()> {
        let result = self.check(timestamp, signature, signed, now_ms);
        if let Err(e) = &result {
            warn!(error = %e, "rejected request");
        }
        result
    }

    fn check(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        signed: &[u8],
        now_ms: i64,
    ) -> ServerResult<()> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(ServerError::Unauthorized("missing signature headers".into()));
        };
        let timestamp: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| ServerError::Unauthorized("malformed timestamp".into()))?;

        check_skew(timestamp, now_ms, self.window_ms)
            .map_err(|e| ServerError::Unauthorized(e.to_string()))?;

        if !verify(&self.secret, signed, timestamp, signature.trim()) {
            return Err(ServerError::Unauthorized("invalid signature".into()));
        }

        if !self
            .replay
            .check_and_record(&signature.trim().to_ascii_lowercase(), timestamp, now_ms)
        {
            return Err(ServerError::Unauthorized("replayed request".into()));
        }
        Ok(())
    }
}
