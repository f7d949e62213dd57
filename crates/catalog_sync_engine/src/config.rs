//! Configuration for the sync agent.

use catalog_sync_protocol::{Origin, SharedSecret};
use rand::Rng;
use std::time::Duration;

/// Configuration for one replica's sync agent.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Which replica this agent runs on.
    pub origin: Origin,
    /// Identifies this replica in push requests.
    pub client_id: String,
    /// Entity kind replicated (e.g. `"product"`).
    pub entity_kind: String,
    /// Base URL of the peer (e.g. `"https://cloud.example.com"`).
    pub peer_url: String,
    /// Secret shared with the peer.
    pub secret: SharedSecret,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum queued entries sent per push.
    pub push_batch_size: usize,
    /// Maximum changes requested per pull page.
    pub pull_page_size: u32,
    /// How often to poll the peer for changes.
    pub pull_interval: Duration,
    /// How often to retry draining the outbox when no enqueue wakes it.
    pub drain_poll_interval: Duration,
    /// Backoff applied after transport failures.
    pub backoff: BackoffPolicy,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(origin: Origin, peer_url: impl Into<String>, secret: SharedSecret) -> Self {
        Self {
            origin,
            client_id: format!("{}-{}", origin, uuid::Uuid::new_v4()),
            entity_kind: "product".into(),
            peer_url: peer_url.into(),
            secret,
            timeout: Duration::from_secs(30),
            push_batch_size: 100,
            pull_page_size: 500,
            pull_interval: Duration::from_secs(30),
            drain_poll_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Sets the client ID.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the replicated entity kind.
    pub fn with_entity_kind(mut self, kind: impl Into<String>) -> Self {
        self.entity_kind = kind.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_page_size(mut self, size: u32) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Sets the pull interval.
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// Sets the outbox drain poll interval.
    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Exponential backoff with jitter and a ceiling.
///
/// Delays are pure functions of the attempt number and a jitter sample, so
/// the policy is testable without timers.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum attempts before giving up; `None` retries until delivered.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay, jitter included.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 disables it).
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Creates an unbounded policy with the default timings.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Limits the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_nan() {
            1.0
        } else {
            multiplier.max(1.0)
        };
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns true if another attempt is allowed after `attempts` failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Delay before retry number `attempt` (1-based), for a jitter sample in
    /// `[0, 1)`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let ceiling = self.max_delay.as_secs_f64();
        let base = if base.is_finite() {
            base.clamp(0.0, ceiling)
        } else {
            ceiling
        };

        let jittered = base + base * self.jitter * sample.clamp(0.0, 1.0);
        Duration::from_secs_f64(jittered.clamp(0.0, ceiling))
    }

    /// Delay before retry number `attempt` (1-based), with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        self.delay_with_sample(attempt, sample)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}
