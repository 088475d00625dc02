//! Rate Limiting
//!
//! Per-provider requests-per-minute admission and Retry-After parsing.

use crate::config::ProviderEntry;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Length of the accounting window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Limits for a single provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum admissions per 60 seconds, 0 = unlimited
    pub requests_per_minute: u32,

    /// Minimum spacing between two admissions
    pub min_interval: Duration,
}

impl RateLimit {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            min_interval: Duration::ZERO,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests_per_minute == 0 && self.min_interval.is_zero()
    }

    /// Spacing of at least one window share per request, so a full minute's
    /// budget is spread out instead of admitted in a burst
    pub fn evenly_paced(self) -> Self {
        if self.requests_per_minute == 0 {
            return self;
        }
        let share = WINDOW / self.requests_per_minute;
        Self {
            min_interval: self.min_interval.max(share),
            ..self
        }
    }
}

/// Admission history for one provider
#[derive(Debug, Default)]
struct RateWindow {
    /// Admission instants younger than `WINDOW`, oldest first
    admitted: VecDeque<Instant>,

    last_admitted: Option<Instant>,
}

impl RateWindow {
    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit and record, or return how long to wait without recording anything
    fn try_admit(&mut self, limit: RateLimit, now: Instant) -> Duration {
        self.evict(now);

        let mut wait = Duration::ZERO;

        if !limit.min_interval.is_zero() {
            if let Some(last) = self.last_admitted {
                let since = now.duration_since(last);
                if since < limit.min_interval {
                    wait = limit.min_interval - since;
                }
            }
        }

        let cap = limit.requests_per_minute as usize;
        if cap > 0 && self.admitted.len() >= cap {
            if let Some(&oldest) = self.admitted.front() {
                wait = wait.max(WINDOW.saturating_sub(now.duration_since(oldest)));
            }
        }

        if !wait.is_zero() {
            return wait;
        }

        if cap > 0 {
            self.admitted.push_back(now);
        }
        self.last_admitted = Some(now);
        Duration::ZERO
    }
}

/// Per-provider admission control
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Limit used for providers without an override
    default_limit: RateLimit,

    /// Derive spacing from the per-minute limit
    pace_evenly: bool,

    /// Per-provider overrides
    limits: RwLock<HashMap<String, RateLimit>>,

    /// Lazily created windows, one lock per provider
    windows: RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    /// Create a limiter applying `default_limit` to every provider
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            ..Self::default()
        }
    }

    /// Spread admissions over the window instead of allowing bursts
    pub fn with_even_pacing(mut self, pace_evenly: bool) -> Self {
        self.pace_evenly = pace_evenly;
        self
    }

    /// Set the limit for one provider
    pub fn set_limit(&self, provider: &str, limit: RateLimit) {
        self.limits.write().insert(provider.to_string(), limit);
    }

    /// Derive per-provider limits from registry entries, replacing previous overrides
    pub fn configure(&self, entries: &[ProviderEntry]) {
        let limits = entries
            .iter()
            .filter_map(|entry| {
                entry.requests_per_minute.map(|rpm| {
                    let limit = RateLimit {
                        requests_per_minute: rpm,
                        min_interval: self.default_limit.min_interval,
                    };
                    (entry.id.clone(), limit)
                })
            })
            .collect();
        *self.limits.write() = limits;
    }

    /// Effective limit for a provider
    pub fn limit_for(&self, provider: &str) -> RateLimit {
        let limit = self
            .limits
            .read()
            .get(provider)
            .copied()
            .unwrap_or(self.default_limit);

        if self.pace_evenly {
            limit.evenly_paced()
        } else {
            limit
        }
    }

    fn window(&self, provider: &str) -> Arc<Mutex<RateWindow>> {
        if let Some(window) = self.windows.read().get(provider) {
            return window.clone();
        }
        self.windows
            .write()
            .entry(provider.to_string())
            .or_default()
            .clone()
    }

    /// Try to admit one request. Zero means admitted and counted; anything else
    /// is the time to wait before checking again, and nothing was counted.
    pub fn admit(&self, provider: &str) -> Duration {
        let limit = self.limit_for(provider);
        if limit.is_unlimited() {
            return Duration::ZERO;
        }

        let window = self.window(provider);
        let wait = window.lock().try_admit(limit, Instant::now());

        if !wait.is_zero() {
            debug!(
                provider,
                rpm = limit.requests_per_minute,
                ?wait,
                "Rate limit reached"
            );
        }
        wait
    }

    /// Admissions counted in the current window
    pub fn in_window(&self, provider: &str) -> usize {
        let window = match self.windows.read().get(provider) {
            Some(window) => window.clone(),
            None => return 0,
        };
        let mut window = window.lock();
        window.evict(Instant::now());
        window.admitted.len()
    }

    /// Forget the history of a provider
    pub fn clear(&self, provider: &str) {
        self.windows.write().remove(provider);
    }
}

/// Parse a Retry-After style value: plain seconds, or "1m30s", "2h", "500ms".
/// Values too large to represent yield None.
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // Handle milliseconds first
    if let Some(stripped) = s.strip_suffix("ms") {
        return stripped.parse::<u64>().ok().map(Duration::from_millis);
    }

    // Try complex format first (e.g., "1m30s", "2h30m")
    if s.contains('h') || (s.contains('m') && s.contains('s')) {
        let mut total_secs = 0u64;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else if !current_num.is_empty() {
                let n = current_num.parse::<u64>().ok()?;
                let secs = match c {
                    'h' => n.checked_mul(3600)?,
                    'm' => n.checked_mul(60)?,
                    's' => n,
                    _ => 0,
                };
                total_secs = total_secs.checked_add(secs)?;
                current_num.clear();
            }
        }

        if total_secs > 0 {
            return Some(Duration::from_secs(total_secs));
        }
    }

    // Simple cases - single unit
    if let Some(stripped) = s.strip_suffix('s') {
        return stripped
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    }
    if let Some(stripped) = s.strip_suffix('m') {
        return stripped
            .parse::<u64>()
            .ok()
            .and_then(|mins| mins.checked_mul(60))
            .map(Duration::from_secs);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration_string("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_string("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration_string("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_string("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_duration_string("1m30s"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration_string("soon"), None);
    }

    #[test]
    fn test_parse_duration_string_out_of_range() {
        assert_eq!(parse_duration_string("1e30s"), None);
        assert_eq!(parse_duration_string("-1s"), None);
        assert_eq!(parse_duration_string("NaNs"), None);
        assert_eq!(parse_duration_string("6000000000000000h"), None);
        assert_eq!(parse_duration_string("400000000000000000m"), None);
        assert_eq!(parse_duration_string("18446744073709551615s1h"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_blocks() {
        let limiter = RateLimiter::new(RateLimit::per_minute(0));
        for _ in 0..1000 {
            assert_eq!(limiter.admit("p"), Duration::ZERO);
        }
        assert_eq!(limiter.in_window("p"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_after_limit_until_window_passes() {
        let limiter = RateLimiter::new(RateLimit::per_minute(3));

        for _ in 0..3 {
            assert_eq!(limiter.admit("p"), Duration::ZERO);
        }
        assert_eq!(limiter.in_window("p"), 3);

        let wait = limiter.admit("p");
        assert_eq!(wait, WINDOW);
        assert_eq!(limiter.in_window("p"), 3);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.admit("p"), Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(limiter.admit("p"), Duration::ZERO);
        assert_eq!(limiter.in_window("p"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_limit_in_any_rolling_window() {
        let limiter = RateLimiter::new(RateLimit::per_minute(5));
        let start = Instant::now();
        let mut admitted = Vec::new();

        // One probe per second for five minutes
        for _ in 0..300 {
            if limiter.admit("p").is_zero() {
                admitted.push(Instant::now());
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert!(!admitted.is_empty());
        for (i, &t) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|&&u| u.duration_since(t) < WINDOW)
                .count();
            assert!(in_window <= 5, "{} admissions within 60s of {:?}", in_window, t - start);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_independent() {
        let limiter = RateLimiter::new(RateLimit::per_minute(1));
        assert!(limiter.admit("a").is_zero());
        assert!(!limiter.admit("a").is_zero());
        assert!(limiter.admit("b").is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spacing() {
        let limiter = RateLimiter::new(RateLimit {
            requests_per_minute: 0,
            min_interval: Duration::from_secs(2),
        });

        assert!(limiter.admit("p").is_zero());
        assert_eq!(limiter.admit("p"), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.admit("p").is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_even_pacing_spreads_the_budget() {
        let limiter = RateLimiter::new(RateLimit {
            requests_per_minute: 4,
            min_interval: Duration::from_secs(5),
        })
        .with_even_pacing(true);

        assert_eq!(limiter.limit_for("p").min_interval, Duration::from_secs(15));
        assert!(limiter.admit("p").is_zero());
        assert_eq!(limiter.admit("p"), Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.admit("p").is_zero());
        assert_eq!(limiter.in_window("p"), 2);

        // A configured spacing wider than the share wins
        let slow = RateLimit {
            requests_per_minute: 60,
            min_interval: Duration::from_secs(3),
        };
        assert_eq!(slow.evenly_paced().min_interval, Duration::from_secs(3));
        assert_eq!(RateLimit::per_minute(0).evenly_paced(), RateLimit::per_minute(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(RateLimit::per_minute(5)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let mut admitted = 0;
                    for _ in 0..10 {
                        if limiter.admit("p").is_zero() {
                            admitted += 1;
                        }
                        tokio::task::yield_now().await;
                    }
                    admitted
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            admitted += task.await.unwrap();
        }

        assert_eq!(admitted, 5);
        assert_eq!(limiter.in_window("p"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_from_entries() {
        let limiter = RateLimiter::new(RateLimit::per_minute(10));
        let entry = ProviderEntry {
            id: "slow".to_string(),
            api_base: "https://x".to_string(),
            model: "m".to_string(),
            keys: vec!["k".to_string()],
            enabled: true,
            requests_per_minute: Some(1),
            headers: HashMap::new(),
        };
        limiter.configure(&[entry]);

        assert_eq!(limiter.limit_for("slow").requests_per_minute, 1);
        assert_eq!(limiter.limit_for("other").requests_per_minute, 10);

        assert!(limiter.admit("slow").is_zero());
        assert!(!limiter.admit("slow").is_zero());

        limiter.clear("slow");
        assert!(limiter.admit("slow").is_zero());
    }
}
