use crate::config::RelayfetchConfig;
use std::time::{Duration, Instant};

/// How long a suspect responder's IP stays blacklisted unless configured.
pub const DEFAULT_BLACKLIST_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Attempt budget and delays for the relay retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum number of attempts (including the first). Always at least 1.
    pub max_attempts: usize,
    /// Fixed pause before the backoff branches (overload, quota, closed fetch).
    pub backoff_delay: Duration,
    /// Lifetime of an IP blacklist entry.
    pub blacklist_ttl: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(500),
            blacklist_ttl: DEFAULT_BLACKLIST_TTL,
        }
    }
}

impl RetrySettings {
    pub fn new(max_attempts: usize, backoff_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_delay,
            ..Self::default()
        }
    }

    pub fn with_blacklist_ttl(mut self, ttl: Duration) -> Self {
        self.blacklist_ttl = ttl;
        self
    }

    /// Runtime settings from the config file; missing sections use defaults.
    pub fn from_config(cfg: &RelayfetchConfig) -> Self {
        let defaults = Self::default();
        let (max_attempts, backoff_delay) = match &cfg.retry {
            Some(retry) => (
                (retry.max_attempts as usize).max(1),
                secs_f64(retry.retry_delay_secs),
            ),
            None => (defaults.max_attempts, defaults.backoff_delay),
        };
        let blacklist_ttl = cfg
            .blacklist_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.blacklist_ttl);
        Self {
            max_attempts,
            backoff_delay,
            blacklist_ttl,
        }
    }

    /// Context for the 0-based `index`-th attempt.
    pub fn attempt(&self, index: usize) -> Attempt {
        Attempt {
            index,
            max_attempts: self.max_attempts,
        }
    }
}

/// Negative, NaN or absurd values collapse to zero.
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Longest span a blacklist entry or cooldown is honoured for.
const MAX_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + span`, capped at [`MAX_HORIZON`] so configured spans never overflow.
pub(crate) fn deadline_after(now: Instant, span: Duration) -> Instant {
    now.checked_add(span.min(MAX_HORIZON)).unwrap_or(now)
}

/// Position of one attempt within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub index: usize,
    pub max_attempts: usize,
}

impl Attempt {
    /// The last attempt must produce a terminal outcome.
    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.max_attempts
    }
}
