//! In-memory, per-client request limiter for the coach endpoint.
//!
//! Each key gets a fixed window: once `interval` has elapsed since the
//! window started, the counter resets to zero. A caller can therefore burst
//! up to `2 × tokens_per_interval` requests across a window boundary.
//!
//! State is process-local and best-effort. A background sweep drops stale
//! buckets and caps the number of tracked keys.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the background sweep runs.
pub const CLEANUP_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Key shared by every request that carries no usable address.
pub const UNKNOWN_CLIENT_KEY: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Window length.
    pub interval: Duration,
    /// Requests allowed per key per window.
    pub tokens_per_interval: u32,
    /// Maximum number of keys retained after a sweep.
    pub unique_token_per_interval: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded: {limit} requests per {}s", .window.as_secs())]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window: Duration,
    /// Time until the caller's current window resets.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    count: u32,
    last_refill: Instant,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
    pub retained: usize,
}

/// Cheap to clone; all clones share one bucket store.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds a limiter and spawns its periodic cleanup on the current runtime.
    pub fn start(config: RateLimitConfig) -> (Self, CleanupTask) {
        let limiter = Self::new(config);
        let cleanup = limiter.spawn_cleanup(CLEANUP_PERIOD);
        (limiter, cleanup)
    }

    /// Consumes one request slot for `key`, or fails if the window is used up.
    pub fn check(&self, key: &str) -> Result<(), RateLimitExceeded> {
        self.check_at(key, Instant::now())
    }

    pub(crate) fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimitExceeded> {
        // The whole read-modify-write happens under one lock so two requests
        // for the same key cannot both pass the limit.
        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(TokenBucket {
            count: 0,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed >= self.config.interval {
            bucket.count = 0;
            bucket.last_refill = now;
        }

        if bucket.count >= self.config.tokens_per_interval {
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            return Err(RateLimitExceeded {
                limit: self.config.tokens_per_interval,
                window: self.config.interval,
                retry_after: self.config.interval.saturating_sub(elapsed),
            });
        }

        bucket.count += 1;
        Ok(())
    }

    /// Requests counted against `key` in its current window, if it is tracked.
    pub fn usage(&self, key: &str) -> Option<u32> {
        self.lock().get(key).map(|bucket| bucket.count)
    }

    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Instant::now())
    }

    /// Drops buckets idle for two windows, then keeps only the
    /// `unique_token_per_interval` most recently refilled ones.
    pub(crate) fn cleanup_at(&self, now: Instant) -> CleanupReport {
        let stale_after = self.config.interval.saturating_mul(2);
        let capacity = self.config.unique_token_per_interval;

        let (expired, snapshot) = {
            let mut buckets = self.lock();
            let before = buckets.len();
            if let Some(cutoff) = now.checked_sub(stale_after) {
                buckets.retain(|_, bucket| bucket.last_refill >= cutoff);
            }
            let expired = before - buckets.len();

            if buckets.len() <= capacity {
                return CleanupReport {
                    expired,
                    evicted: 0,
                    retained: buckets.len(),
                };
            }

            let snapshot: Vec<(String, Instant)> = buckets
                .iter()
                .map(|(key, bucket)| (key.clone(), bucket.last_refill))
                .collect();
            (expired, snapshot)
        };

        // Sorted without holding the lock.
        let mut snapshot = snapshot;
        snapshot.sort_by(|a, b| b.1.cmp(&a.1));
        let victims = snapshot.split_off(capacity.min(snapshot.len()));

        let mut buckets = self.lock();
        let mut evicted = 0;
        for (key, seen_refill) in victims {
            // A bucket whose window restarted after the snapshot is active again.
            let untouched = buckets
                .get(&key)
                .is_some_and(|bucket| bucket.last_refill <= seen_refill);
            if untouched {
                buckets.remove(&key);
                evicted += 1;
            }
        }

        CleanupReport {
            expired,
            evicted,
            retained: buckets.len(),
        }
    }

    /// Runs [`RateLimiter::cleanup`] every `period` until cancelled.
    pub fn spawn_cleanup(&self, period: Duration) -> CleanupTask {
        let token = CancellationToken::new();
        let limiter = self.clone();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = limiter.cleanup();
                        tracing::debug!(
                            expired = report.expired,
                            evicted = report.evicted,
                            retained = report.retained,
                            "rate limiter cleanup"
                        );
                    }
                }
            }
        });

        CleanupTask { token, handle }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        // Buckets are plain counters; a panic mid-update cannot corrupt them.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background sweep. Dropping it leaves the task running.
pub struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Cancels the sweep and waits for it to stop.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "rate limiter cleanup task ended abnormally");
        }
    }
}

/// Identifies the caller for rate limiting.
///
/// Prefers the first hop of `X-Forwarded-For`, then the peer IP, then
/// [`UNKNOWN_CLIENT_KEY`].
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    first_header_token(headers, "x-forwarded-for")
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT_KEY.to_string())
}

fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(tokens: u32, unique: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            interval: Duration::from_secs(60),
            tokens_per_interval: tokens,
            unique_token_per_interval: unique,
        })
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(10, 100);
        let now = Instant::now();

        for attempt in 1..=10 {
            assert!(
                limiter.check_at("10.0.0.1", now).is_ok(),
                "attempt {attempt} should pass"
            );
        }
        let err = limiter
            .check_at("10.0.0.1", now)
            .expect_err("11th request must be rejected");
        assert_eq!(err.limit, 10);
        assert_eq!(err.retry_after, Duration::from_secs(60));
        assert_eq!(limiter.usage("10.0.0.1"), Some(10));
    }

    #[test]
    fn rejection_does_not_consume_a_slot() {
        let limiter = limiter(1, 100);
        let now = Instant::now();
        limiter.check_at("a", now).unwrap();
        for _ in 0..5 {
            assert!(limiter.check_at("a", now).is_err());
        }
        assert_eq!(limiter.usage("a"), Some(1));
    }

    #[test]
    fn keys_are_limited_independently() {
        let limiter = limiter(1, 100);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_ok());
    }

    #[test]
    fn window_resets_after_interval() {
        let limiter = limiter(2, 100);
        let start = Instant::now();
        limiter.check_at("k", start).unwrap();
        limiter.check_at("k", start).unwrap();
        assert!(limiter.check_at("k", start + Duration::from_secs(59)).is_err());

        assert!(limiter.check_at("k", start + Duration::from_secs(60)).is_ok());
        assert_eq!(limiter.usage("k"), Some(1));
    }

    #[test]
    fn retry_after_counts_down_within_window() {
        let limiter = limiter(1, 100);
        let start = Instant::now();
        limiter.check_at("k", start).unwrap();
        let err = limiter
            .check_at("k", start + Duration::from_secs(45))
            .unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(15));
    }

    #[test]
    fn boundary_burst_is_permitted() {
        let limiter = limiter(3, 100);
        let start = Instant::now();
        let late = start + Duration::from_secs(59);
        limiter.check_at("k", start).unwrap();
        for _ in 0..2 {
            limiter.check_at("k", late).unwrap();
        }
        for _ in 0..3 {
            limiter.check_at("k", start + Duration::from_secs(60)).unwrap();
        }
    }

    #[test]
    fn cleanup_removes_buckets_idle_for_two_intervals() {
        let limiter = limiter(5, 100);
        let start = Instant::now();
        limiter.check_at("stale", start).unwrap();
        limiter.check_at("fresh", start + Duration::from_secs(30)).unwrap();

        let report = limiter.cleanup_at(start + Duration::from_secs(121));
        assert_eq!(report.expired, 1);
        assert_eq!(limiter.usage("stale"), None);
        assert_eq!(limiter.usage("fresh"), Some(1));
    }

    #[test]
    fn cleanup_keeps_bucket_exactly_at_cutoff() {
        let limiter = limiter(5, 100);
        let start = Instant::now();
        limiter.check_at("edge", start).unwrap();

        let report = limiter.cleanup_at(start + Duration::from_secs(120));
        assert_eq!(report.expired, 0);
        assert_eq!(limiter.lock().len(), 1);
    }

    #[test]
    fn cleanup_evicts_least_recent_keys_over_capacity() {
        let limiter = limiter(5, 3);
        let start = Instant::now();
        for (offset, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            limiter
                .check_at(key, start + Duration::from_secs(offset as u64))
                .unwrap();
        }

        let report = limiter.cleanup_at(start + Duration::from_secs(10));
        assert_eq!(report.evicted, 2);
        assert_eq!(report.retained, 3);
        assert_eq!(limiter.usage("a"), None);
        assert_eq!(limiter.usage("b"), None);
        for key in ["c", "d", "e"] {
            assert_eq!(limiter.usage(key), Some(1), "{key} should survive");
        }
    }

    #[test]
    fn cleanup_under_capacity_is_a_no_op() {
        let limiter = limiter(5, 10);
        let start = Instant::now();
        limiter.check_at("a", start).unwrap();
        limiter.check_at("b", start).unwrap();
        assert_eq!(
            limiter.cleanup_at(start + Duration::from_secs(1)),
            CleanupReport {
                expired: 0,
                evicted: 0,
                retained: 2
            }
        );
    }

    #[test]
    fn clones_share_one_store() {
        let limiter = limiter(1, 10);
        let clone = limiter.clone();
        limiter.check("shared").unwrap();
        assert!(clone.check("shared").is_err());
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = limiter(50, 10);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| limiter.check("hot").is_ok()).count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[tokio::test]
    async fn cleanup_task_stops_on_shutdown() {
        let limiter = limiter(1, 10);
        let task = limiter.spawn_cleanup(Duration::from_millis(5));
        limiter.check("x").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.shutdown().await;
        assert_eq!(limiter.lock().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_task_sweeps_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            interval: Duration::from_millis(1),
            tokens_per_interval: 5,
            unique_token_per_interval: 10,
        });
        limiter.check("x").unwrap();
        assert_eq!(limiter.usage("x"), Some(1));

        let task = limiter.spawn_cleanup(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(limiter.usage("x"), None);
        task.shutdown().await;
    }

    #[test]
    fn client_key_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.2"),
        );
        let peer: SocketAddr = "127.0.0.1:4100".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn client_key_falls_back_to_peer_ip_without_port() {
        let peer: SocketAddr = "192.0.2.10:55123".parse().unwrap();
        assert_eq!(client_key(&HeaderMap::new(), Some(peer)), "192.0.2.10");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(client_key(&headers, Some(peer)), "192.0.2.10");
    }

    #[test]
    fn client_key_defaults_to_unknown() {
        assert_eq!(client_key(&HeaderMap::new(), None), UNKNOWN_CLIENT_KEY);
    }
}
