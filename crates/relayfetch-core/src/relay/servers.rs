//! Configured relay set with overload cooldowns.
//!
//! State is per relay and process-local: how often it reported overload and
//! until when it should be skipped. All concurrent calls share one instance.

use super::{CodecError, RelayCodec, RelayIdentity, RelayPool};
use crate::body::Body;
use crate::retry::deadline_after;
use bytes::Bytes;
use http::{Request, Response};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Per-relay observations.
#[derive(Debug, Clone)]
pub struct RelayStats {
    pub relay: RelayIdentity,
    pub overload_events: u32,
    pub last_overload_at: Option<Instant>,
    /// Skipped by selection until this instant.
    pub cooldown_until: Option<Instant>,
}

impl RelayStats {
    fn new(relay: RelayIdentity) -> Self {
        Self {
            relay,
            overload_events: 0,
            last_overload_at: None,
            cooldown_until: None,
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

pub struct RelayServers<C> {
    codec: C,
    entries: Mutex<Vec<RelayStats>>,
    cooldown: Duration,
}

impl<C: RelayCodec> RelayServers<C> {
    /// Build a pool over `relays`. Duplicates are kept once.
    ///
    /// Returns `None` when `relays` is empty: a pool must always be able to
    /// select someone.
    pub fn new(relays: Vec<RelayIdentity>, codec: C, cooldown: Duration) -> Option<Self> {
        let mut entries: Vec<RelayStats> = Vec::with_capacity(relays.len());
        for relay in relays {
            if !entries.iter().any(|e| e.relay == relay) {
                entries.push(RelayStats::new(relay));
            }
        }
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            codec,
            entries: Mutex::new(entries),
            cooldown,
        })
    }

    /// Copy of the current per-relay state, in configuration order.
    pub fn snapshot(&self) -> Vec<RelayStats> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RelayStats>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stable per-target offset so different hosts start on different relays.
fn spread_key(request: &Request<Bytes>) -> usize {
    let mut hasher = DefaultHasher::new();
    request.uri().authority().map(|a| a.as_str()).hash(&mut hasher);
    hasher.finish() as usize
}

impl<C: RelayCodec> RelayPool for RelayServers<C> {
    fn select(&self, request: &Request<Bytes>, attempt: usize) -> RelayIdentity {
        let now = Instant::now();
        let entries = self.lock();
        let healthy: Vec<&RelayStats> = entries.iter().filter(|e| !e.cooling_down(now)).collect();
        // Everyone cooling down: fall back to the full list rather than stall.
        let candidates: Vec<&RelayStats> = if healthy.is_empty() {
            entries.iter().collect()
        } else {
            healthy
        };
        let index = spread_key(request).wrapping_add(attempt) % candidates.len();
        candidates[index].relay.clone()
    }

    fn encode(
        &self,
        request: &Request<Bytes>,
        relay: &RelayIdentity,
    ) -> Result<Request<Bytes>, CodecError> {
        self.codec.encode(request, relay)
    }

    fn decode(&self, response: Response<Body>) -> Result<Response<Body>, CodecError> {
        self.codec.decode(response)
    }

    fn deprioritize(&self, relay: &RelayIdentity) {
        let now = Instant::now();
        let mut entries = self.lock();
        let Some(entry) = entries.iter_mut().find(|e| &e.relay == relay) else {
            tracing::debug!(relay = %relay, "deprioritize for unknown relay ignored");
            return;
        };
        entry.overload_events = entry.overload_events.saturating_add(1);
        entry.last_overload_at = Some(now);
        entry.cooldown_until = Some(deadline_after(now, self.cooldown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ForwardProxyCodec;

    fn relays(n: usize) -> Vec<RelayIdentity> {
        (0..n)
            .map(|i| RelayIdentity::parse(&format!("http://relay{i}.example.net:8080")).unwrap())
            .collect()
    }

    fn pool(n: usize, cooldown: Duration) -> RelayServers<ForwardProxyCodec> {
        RelayServers::new(relays(n), ForwardProxyCodec, cooldown).unwrap()
    }

    fn request(uri: &str) -> Request<Bytes> {
        Request::builder().uri(uri).body(Bytes::new()).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let empty = RelayServers::new(Vec::new(), ForwardProxyCodec, Duration::from_secs(60));
        assert!(empty.is_none());
    }

    #[test]
    fn duplicates_are_collapsed() {
        let mut list = relays(2);
        list.push(list[0].clone());
        let pool = RelayServers::new(list, ForwardProxyCodec, Duration::from_secs(60)).unwrap();
        assert_eq!(pool.snapshot().len(), 2);
    }

    #[test]
    fn successive_attempts_rotate() {
        let pool = pool(3, Duration::from_secs(60));
        let req = request("http://blocked.example.org/a");
        let picks: Vec<RelayIdentity> = (0..3).map(|i| pool.select(&req, i)).collect();
        assert_ne!(picks[0], picks[1]);
        assert_ne!(picks[1], picks[2]);
        assert_ne!(picks[0], picks[2]);
        // Wraps around.
        assert_eq!(pool.select(&req, 3), picks[0]);
    }

    #[test]
    fn same_target_same_first_pick() {
        let pool = pool(4, Duration::from_secs(60));
        let a = pool.select(&request("http://blocked.example.org/a"), 0);
        let b = pool.select(&request("http://blocked.example.org/b"), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn deprioritized_relay_is_skipped() {
        let pool = pool(2, Duration::from_secs(60));
        let req = request("http://blocked.example.org/");
        let first = pool.select(&req, 0);
        pool.deprioritize(&first);
        for attempt in 0..4 {
            assert_ne!(pool.select(&req, attempt), first);
        }
        let stats = pool.snapshot();
        let entry = stats.iter().find(|s| s.relay == first).unwrap();
        assert_eq!(entry.overload_events, 1);
        assert!(entry.last_overload_at.is_some());
    }

    #[test]
    fn all_cooling_down_falls_back_to_everyone() {
        let pool = pool(2, Duration::from_secs(60));
        for relay in relays(2) {
            pool.deprioritize(&relay);
        }
        let req = request("http://blocked.example.org/");
        let picks: Vec<RelayIdentity> = (0..2).map(|i| pool.select(&req, i)).collect();
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn zero_cooldown_expires_immediately() {
        let pool = pool(2, Duration::ZERO);
        let req = request("http://blocked.example.org/");
        let first = pool.select(&req, 0);
        pool.deprioritize(&first);
        assert_eq!(pool.select(&req, 0), first);
    }

    #[test]
    fn unknown_relay_is_ignored() {
        let pool = pool(1, Duration::from_secs(60));
        let stranger = RelayIdentity::parse("http://stranger.example.net").unwrap();
        pool.deprioritize(&stranger);
        assert_eq!(pool.snapshot()[0].overload_events, 0);
    }

    #[test]
    fn configured_huge_cooldown_does_not_overflow() {
        let cfg = crate::config::RelayfetchConfig {
            overload_cooldown_secs: Some(u64::MAX),
            ..Default::default()
        };
        let pool = pool(2, cfg.overload_cooldown());
        let req = request("http://blocked.example.org/");
        let first = pool.select(&req, 0);
        pool.deprioritize(&first);
        let stats = pool.snapshot();
        let entry = stats.iter().find(|s| s.relay == first).unwrap();
        assert!(entry.cooldown_until.unwrap() > Instant::now());
        assert_ne!(pool.select(&req, 0), first);
    }
}
