//! C6: connection counter. A live-count gauge with a drain timer, used by
//! shutdown to quiesce the server.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

pub struct ConnectionCounter {
    count: AtomicI64,
    drain: Duration,
    /// Notified every time the count transitions to zero.
    zeroed: Notify,
}

impl ConnectionCounter {
    pub fn new(drain: Duration) -> Self {
        Self {
            count: AtomicI64::new(0),
            drain,
            zeroed: Notify::new(),
        }
    }

    /// Atomically increase the live count by `n`.
    pub fn add(&self, n: i64) {
        let prev = self.count.fetch_add(n, Ordering::SeqCst);
        debug_assert!(prev + n >= 0, "connection counter went negative");
    }

    /// Atomically check-and-increment: increase the live count by one only
    /// if it is currently below `max` (or unconditionally when `max` is
    /// `None`), returning whether the increment happened. This is a single
    /// compare-and-swap loop rather than a separate `current()` + `add(1)`,
    /// so concurrent admissions near the limit can't all observe room and
    /// all proceed.
    pub fn try_admit(&self, max: Option<i64>) -> bool {
        match max {
            None => {
                self.add(1);
                true
            }
            Some(max) => self
                .count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    (current < max).then_some(current + 1)
                })
                .is_ok(),
        }
    }

    /// Atomically decrease the live count by one. When the count
    /// transitions to zero, wake any waiters so they can start the drain
    /// timer.
    pub fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.zeroed.notify_waiters();
        }
    }

    pub fn current(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Block until the live count has reached zero and stayed there for
    /// the configured drain duration. If churn brings the count back
    /// above zero during the drain window, the wait restarts.
    pub async fn wait(&self) {
        loop {
            // Register for notification before checking the count, so a
            // `done()` that fires between the check and the await can't be
            // missed: `notify_waiters()` wakes only already-registered
            // waiters and stores no permit for latecomers.
            let notified = self.zeroed.notified();
            if self.count.load(Ordering::SeqCst) != 0 {
                notified.await;
                continue;
            }

            if self.drain.is_zero() {
                return;
            }
            tokio::select! {
                _ = sleep(self.drain) => {
                    if self.count.load(Ordering::SeqCst) == 0 {
                        return;
                    }
                }
                _ = notified => {
                    // Count moved; re-check from the top of the loop.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn wait_returns_immediately_when_drain_is_zero_and_count_is_zero() {
        let counter = ConnectionCounter::new(Duration::ZERO);
        counter.wait().await;
    }

    #[tokio::test]
    async fn wait_blocks_until_count_reaches_zero() {
        let counter = Arc::new(ConnectionCounter::new(Duration::from_millis(20)));
        counter.add(1);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                counter.wait().await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        counter.done();

        let elapsed = waiter.await.unwrap();
        assert!(elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn current_reflects_add_and_done() {
        let counter = ConnectionCounter::new(Duration::ZERO);
        counter.add(2);
        assert_eq!(counter.current(), 2);
        counter.done();
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn try_admit_with_no_max_always_succeeds() {
        let counter = ConnectionCounter::new(Duration::ZERO);
        assert!(counter.try_admit(None));
        assert!(counter.try_admit(None));
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn try_admit_refuses_once_max_is_reached() {
        let counter = ConnectionCounter::new(Duration::ZERO);
        assert!(counter.try_admit(Some(2)));
        assert!(counter.try_admit(Some(2)));
        assert!(!counter.try_admit(Some(2)));
        assert_eq!(counter.current(), 2);
    }

    #[tokio::test]
    async fn concurrent_try_admit_never_overshoots_max() {
        let counter = Arc::new(ConnectionCounter::new(Duration::ZERO));
        let max = 10;
        let mut tasks = Vec::new();
        for _ in 0..100 {
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move { counter.try_admit(Some(max)) }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, max);
        assert_eq!(counter.current(), max);
    }
}
