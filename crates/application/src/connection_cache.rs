use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use domain::event::entity::ConnectionKey;

pub const DEFAULT_CONNECTION_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(10);

/// Deduplicates repeated observations of the same connection.
///
/// A key seen less than `ttl` ago is "recent". Observing a recent key does
/// not extend its lifetime; once it expires the next observation starts a
/// new window.
pub struct RecentConnectionCache {
    entries: Mutex<HashMap<ConnectionKey, Instant>>,
    ttl: Duration,
}

impl RecentConnectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record `key` as seen at `now`. Returns `true` if it was already
    /// seen within the TTL.
    pub fn observe(&self, key: ConnectionKey, now: Instant) -> bool {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let recent = entries
            .get(&key)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.ttl);
        if recent {
            return true;
        }
        entries.insert(key, now);
        false
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::Direction;

    fn key(port: u16) -> ConnectionKey {
        ConnectionKey {
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "93.184.216.34".parse().unwrap(),
            src_port: port,
            dst_port: 443,
            protocol: 6,
            direction: Direction::Outbound,
        }
    }

    #[test]
    fn first_observation_is_new_second_is_recent() {
        let cache = RecentConnectionCache::default();
        let t0 = Instant::now();
        assert!(!cache.observe(key(1), t0));
        assert!(cache.observe(key(1), t0 + Duration::from_secs(1)));
        assert!(!cache.observe(key(2), t0 + Duration::from_secs(1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn recent_hits_do_not_extend_window() {
        let cache = RecentConnectionCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        cache.observe(key(1), t0);
        assert!(cache.observe(key(1), t0 + Duration::from_secs(4)));
        assert!(!cache.observe(key(1), t0 + Duration::from_secs(5)));
        assert!(cache.observe(key(1), t0 + Duration::from_secs(6)));
    }

    #[test]
    fn eviction_removes_only_expired() {
        let cache = RecentConnectionCache::new(Duration::from_secs(5));
        let t0 = Instant::now();
        cache.observe(key(1), t0);
        cache.observe(key(2), t0 + Duration::from_secs(8));

        assert_eq!(cache.evict_expired(t0 + Duration::from_secs(10)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.observe(key(2), t0 + Duration::from_secs(10)));
    }

    #[test]
    fn eviction_on_empty_cache() {
        let cache = RecentConnectionCache::default();
        assert_eq!(cache.evict_expired(Instant::now()), 0);
        assert!(cache.is_empty());
    }
}
