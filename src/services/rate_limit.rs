use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use crate::models::RateLimit;

/// Fixed-window request counter keyed by client.
pub struct RateLimiter {
    pub(crate) limits: RwLock<HashMap<String, RateLimit>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `client_key`; false once the window's budget is spent.
    pub async fn check(&self, client_key: &str) -> bool {
        let mut limits = self.limits.write().await;
        let now = SystemTime::now();
        let window = self.window;

        let rate_limit = limits
            .entry(client_key.to_string())
            .and_modify(|rl| match now.duration_since(rl.window_start) {
                Ok(elapsed) if elapsed >= window => {
                    rl.count = 1;
                    rl.window_start = now;
                }
                _ => rl.count = rl.count.saturating_add(1),
            })
            .or_insert_with(|| RateLimit {
                count: 1,
                window_start: now,
            });

        rate_limit.count <= self.max_requests
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut limits = self.limits.write().await;
        let now = SystemTime::now();
        let before = limits.len();
        limits.retain(|_, rl| match now.duration_since(rl.window_start) {
            Ok(elapsed) => elapsed < self.window,
            Err(_) => true,
        });
        before - limits.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.limits.read().await.len()
    }
}
