//! Sliding-window rate limit storage.

use super::types::{RateLimitResult, WindowConfig};
use crate::shutdown::ShutdownCoordinator;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-key request timestamps within the trailing window.
///
/// One lock guards the whole map. Admission and the sweep both prune
/// before acting, so they must observe the same state.
pub struct SlidingWindowLimiter {
    config: WindowConfig,
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

/// Drop timestamps that have left the window ending at `now`.
fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = stamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

impl SlidingWindowLimiter {
    /// Empty limiter enforcing `config` for every key.
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Limits this limiter enforces.
    pub fn config(&self) -> WindowConfig {
        self.config
    }

    /// Admit or deny one request for `key` now.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Admission check against the wall clock.
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    /// Admission check at an explicit instant.
    ///
    /// A denied request is not recorded.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let WindowConfig {
            max_requests,
            window,
        } = self.config;
        let mut entries = self.entries.lock();

        let stamps = entries.entry(key.to_string()).or_default();

        prune(stamps, now, window);

        if stamps.len() >= max_requests as usize {
            let retry_after = stamps
                .front()
                .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(window);
            debug!(key, ?retry_after, "Rate limit exceeded");
            return RateLimitResult {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                retry_after: Some(retry_after),
            };
        }

        stamps.push_back(now);
        RateLimitResult {
            allowed: true,
            limit: max_requests,
            remaining: max_requests.saturating_sub(stamps.len() as u32),
            retry_after: None,
        }
    }

    /// Prune every key and drop the ones left empty. Returns keys removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) with an explicit clock. Returns the number of keys dropped.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let window = self.config.window;
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|_, stamps| {
            prune(stamps, now, window);
            !stamps.is_empty()
        });

        before - entries.len()
    }

    /// Number of keys currently held.
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }

    /// Run the sweep every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: ShutdownCoordinator,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = self.tracked_keys(), "Swept idle rate limit keys");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Rate limit sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn limiter(max: u32, window_secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(WindowConfig::new(max, Duration::from_secs(window_secs)))
    }

    #[test]
    fn test_admits_exactly_n_within_window() {
        let limiter = limiter(3, 60);
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(limiter.check_at("k", t0 + Duration::from_secs(i)).allowed);
        }
        let denied = limiter.check_at("k", t0 + Duration::from_secs(59));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_window_reopens_after_w() {
        let limiter = limiter(2, 10);
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).allowed);
        assert!(limiter.check_at("k", t0).allowed);
        assert!(!limiter.check_at("k", t0 + Duration::from_millis(9_999)).allowed);
        assert!(limiter.check_at("k", t0 + Duration::from_secs(10)).allowed);
    }

    #[test]
    fn test_denial_does_not_extend_window() {
        let limiter = limiter(1, 10);
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).allowed);
        for s in 1..10 {
            assert!(!limiter.check_at("k", t0 + Duration::from_secs(s)).allowed);
        }
        assert!(limiter.check_at("k", t0 + Duration::from_secs(10)).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        let t0 = Instant::now();

        assert!(limiter.check_at("a", t0).allowed);
        assert!(!limiter.check_at("a", t0).allowed);
        assert!(limiter.check_at("b", t0).allowed);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = limiter(3, 60);
        let t0 = Instant::now();

        assert_eq!(limiter.check_at("k", t0).remaining, 2);
        assert_eq!(limiter.check_at("k", t0).remaining, 1);
        assert_eq!(limiter.check_at("k", t0).remaining, 0);
    }

    #[test]
    fn test_sweep_removes_idle_keys() {
        let limiter = limiter(5, 10);
        let t0 = Instant::now();

        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(8));
        assert_eq!(limiter.tracked_keys(), 2);

        assert_eq!(limiter.sweep_at(t0 + Duration::from_secs(10)), 1);
        assert_eq!(limiter.tracked_keys(), 1);

        assert_eq!(limiter.sweep_at(t0 + Duration::from_secs(18)), 1);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_concurrent_callers_never_over_admit() {
        const N: u32 = 50;
        const M: usize = 90;
        let limiter = Arc::new(limiter(N, 3600));

        let handles: Vec<_> = (0..M)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || limiter.allow("shared"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&allowed| allowed)
            .count();

        assert_eq!(admitted, N as usize);
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_shutdown() {
        let limiter = Arc::new(limiter(5, 1));
        let shutdown = ShutdownCoordinator::default();
        let stale = Instant::now().checked_sub(Duration::from_secs(2)).unwrap();
        limiter.check_at("idle", stale);
        assert_eq!(limiter.tracked_keys(), 1);

        let handle = limiter
            .clone()
            .spawn_sweeper(Duration::from_millis(20), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        shutdown.initiate();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
