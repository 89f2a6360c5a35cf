use std::time::{Duration, Instant};

/// Seconds shaved off the server-reported lifetime before a refresh.
const EXPIRY_MARGIN_SECS: u64 = 60;

pub const DEFAULT_TTL_SECS: u64 = 3600;

/// In-memory cache for the project access token.
#[derive(Debug, Default)]
pub struct TokenCache {
    access_token: Option<String>,
    obtained_at: Option<Instant>,
    ttl_secs: u64,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if it is still inside its validity window at `now`.
    pub fn valid_at(&self, now: Instant) -> Option<&str> {
        let token = self.access_token.as_deref()?;
        let obtained_at = self.obtained_at?;
        if now.saturating_duration_since(obtained_at) < self.window() {
            Some(token)
        } else {
            None
        }
    }

    pub fn store(&mut self, access_token: String, ttl_secs: u64, now: Instant) {
        self.access_token = Some(access_token);
        self.obtained_at = Some(now);
        self.ttl_secs = ttl_secs;
    }

    pub fn invalidate(&mut self) {
        self.access_token = None;
        self.obtained_at = None;
    }

    // Never shorter than a second, even for tiny TTLs.
    fn window(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.saturating_sub(EXPIRY_MARGIN_SECS).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_has_no_token() {
        let cache = TokenCache::new();
        assert!(cache.valid_at(Instant::now()).is_none());
    }

    #[test]
    fn test_token_valid_inside_window() {
        let t0 = Instant::now();
        let mut cache = TokenCache::new();
        cache.store("abc".into(), 7200, t0);

        assert_eq!(cache.valid_at(t0), Some("abc"));
        assert_eq!(cache.valid_at(t0 + Duration::from_secs(7139)), Some("abc"));
    }

    #[test]
    fn test_token_expires_sixty_seconds_early() {
        let t0 = Instant::now();
        let mut cache = TokenCache::new();
        cache.store("abc".into(), 7200, t0);

        assert!(cache.valid_at(t0 + Duration::from_secs(7140)).is_none());
        assert!(cache.valid_at(t0 + Duration::from_secs(7200)).is_none());
    }

    #[test]
    fn test_short_ttl_keeps_one_second_window() {
        let t0 = Instant::now();
        let mut cache = TokenCache::new();
        cache.store("short".into(), 30, t0);

        assert_eq!(cache.valid_at(t0 + Duration::from_millis(999)), Some("short"));
        assert!(cache.valid_at(t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_invalidate_drops_token() {
        let t0 = Instant::now();
        let mut cache = TokenCache::new();
        cache.store("abc".into(), DEFAULT_TTL_SECS, t0);
        cache.invalidate();
        assert!(cache.valid_at(t0).is_none());
    }

    #[test]
    fn test_store_replaces_previous_token() {
        let t0 = Instant::now();
        let mut cache = TokenCache::new();
        cache.store("old".into(), 100, t0);
        let t1 = t0 + Duration::from_secs(50);
        cache.store("new".into(), DEFAULT_TTL_SECS, t1);
        assert_eq!(cache.valid_at(t1 + Duration::from_secs(100)), Some("new"));
    }
}
