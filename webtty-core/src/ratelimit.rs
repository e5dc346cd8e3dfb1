//! C5: brute-force rate limiter on the HTTP basic-auth path.
//!
//! Two dimensions: a per-IP escalating lockout, and a process-wide sliding
//! window that trips a short global lock under distributed-scan load.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

const LOCK_THRESHOLD: u32 = 5;
const BASE_LOCKOUT: Duration = Duration::from_secs(5);
const MAX_LOCKOUT: Duration = Duration::from_secs(3600);
const PER_IP_ENTRY_TTL: Duration = Duration::from_secs(24 * 3600);

const GLOBAL_WINDOW: Duration = Duration::from_secs(5 * 60);
const GLOBAL_THRESHOLD: usize = 100;
const GLOBAL_LOCKOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
struct AttemptInfo {
    fail_count: u32,
    locked_until: Option<Instant>,
    last_seen: Option<Instant>,
}

/// Which dimension tripped the lock, for logging only — the client never
/// learns which dimension beyond the `Retry-After` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDimension {
    Ip,
    Global,
}

pub struct RateLimiter {
    per_ip: DashMap<String, AttemptInfo>,
    global_window: Mutex<VecDeque<Instant>>,
    global_locked_until: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            per_ip: DashMap::new(),
            global_window: Mutex::new(VecDeque::new()),
            global_locked_until: Mutex::new(None),
        }
    }

    /// Returns `(locked, remaining, dimension)` when a request from `ip`
    /// should be rejected with 429, or `None` when it may proceed.
    pub async fn check_locked(&self, ip: &str) -> Option<(Duration, LockDimension)> {
        let now = Instant::now();

        if let Some(until) = *self.global_locked_until.lock().await {
            if until > now {
                return Some((until - now, LockDimension::Global));
            }
        }

        if let Some(entry) = self.per_ip.get(ip) {
            if let Some(until) = entry.locked_until {
                if until > now {
                    return Some((until - now, LockDimension::Ip));
                }
            }
        }
        None
    }

    /// Record a failed auth attempt from `ip`. Escalates the per-IP
    /// lockout geometrically and may trip the global lock.
    pub async fn record_failure(&self, ip: &str) {
        let now = Instant::now();

        {
            let mut entry = self.per_ip.entry(ip.to_string()).or_default();
            entry.fail_count += 1;
            entry.last_seen = Some(now);
            if entry.fail_count >= LOCK_THRESHOLD {
                let extra_steps = entry.fail_count - LOCK_THRESHOLD;
                let duration = BASE_LOCKOUT
                    .checked_mul(1u32.checked_shl(extra_steps).unwrap_or(u32::MAX))
                    .unwrap_or(MAX_LOCKOUT)
                    .min(MAX_LOCKOUT);
                let candidate = now + duration;
                // locked_until only moves forward.
                entry.locked_until = Some(match entry.locked_until {
                    Some(existing) if existing > candidate => existing,
                    _ => candidate,
                });
            }
        }
        self.prune_per_ip(now);

        let mut window = self.global_window.lock().await;
        window.push_back(now);
        while let Some(front) = window.front() {
            if now.duration_since(*front) > GLOBAL_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= GLOBAL_THRESHOLD {
            let mut global_lock = self.global_locked_until.lock().await;
            let candidate = now + GLOBAL_LOCKOUT;
            *global_lock = Some(match *global_lock {
                Some(existing) if existing > candidate => existing,
                _ => candidate,
            });
        }
    }

    /// Clear an IP's failure count and lift its lock after a successful
    /// auth.
    pub fn record_success(&self, ip: &str) {
        if let Some(mut entry) = self.per_ip.get_mut(ip) {
            entry.fail_count = 0;
            entry.locked_until = None;
        }
    }

    fn prune_per_ip(&self, now: Instant) {
        self.per_ip.retain(|_, info| match info.last_seen {
            Some(seen) => now.duration_since(seen) <= PER_IP_ENTRY_TTL,
            None => true,
        });
    }

    #[cfg(test)]
    pub fn fail_count(&self, ip: &str) -> u32 {
        self.per_ip.get(ip).map(|e| e.fail_count).unwrap_or(0)
    }
}

/// Extract the client IP: first hop of
/// `X-Forwarded-For` if present, otherwise the socket address.
pub fn client_ip(forwarded_for: Option<&str>, socket_addr: &str) -> String {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    socket_addr.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_count_is_monotonic_until_success() {
        let limiter = RateLimiter::new();
        for i in 1..=4 {
            limiter.record_failure("1.2.3.4").await;
            assert_eq!(limiter.fail_count("1.2.3.4"), i);
        }
        limiter.record_success("1.2.3.4");
        assert_eq!(limiter.fail_count("1.2.3.4"), 0);
        assert!(limiter.check_locked("1.2.3.4").await.is_none());
    }

    #[tokio::test]
    async fn fifth_failure_locks_the_ip() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.record_failure("9.9.9.9").await;
        }
        let locked = limiter.check_locked("9.9.9.9").await;
        assert!(locked.is_some());
        assert_eq!(locked.unwrap().1, LockDimension::Ip);
    }

    #[tokio::test]
    async fn lockout_escalates_geometrically() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.record_failure("8.8.8.8").await;
        }
        let (first_remaining, _) = limiter.check_locked("8.8.8.8").await.unwrap();
        for _ in 0..3 {
            limiter.record_failure("8.8.8.8").await;
        }
        let (second_remaining, _) = limiter.check_locked("8.8.8.8").await.unwrap();
        assert!(second_remaining >= first_remaining);
    }

    #[tokio::test]
    async fn global_lock_trips_after_threshold_failures() {
        let limiter = RateLimiter::new();
        for i in 0..GLOBAL_THRESHOLD {
            let ip = format!("10.0.0.{}", i % 250);
            limiter.record_failure(&ip).await;
        }
        let locked = limiter.check_locked("unseen-ip").await;
        assert!(locked.is_some());
        assert_eq!(locked.unwrap().1, LockDimension::Global);
    }

    #[test]
    fn client_ip_prefers_forwarded_for_first_hop() {
        assert_eq!(
            client_ip(Some("1.1.1.1, 2.2.2.2"), "3.3.3.3:1234"),
            "1.1.1.1"
        );
        assert_eq!(client_ip(None, "3.3.3.3:1234"), "3.3.3.3:1234");
        assert_eq!(client_ip(Some(""), "3.3.3.3:1234"), "3.3.3.3:1234");
    }
}
