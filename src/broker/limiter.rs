use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

/// Cooperative per-login limiter: at most `max_concurrent` in-flight calls
/// and a minimum spacing between call starts, to stay inside the broker's
/// published per-login quota.
pub struct LoginLimiter {
    semaphore: Semaphore,
    min_spacing: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl LoginLimiter {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            min_spacing,
            last_start: Mutex::new(None),
        }
    }

    /// Waits for a concurrency slot, then for the spacing window. The
    /// returned permit must be held for the duration of the call.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore never closes");

        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spacing_is_enforced_between_call_starts() {
        let limiter = LoginLimiter::new(3, Duration::from_millis(50));
        let started = Instant::now();
        let p1 = limiter.acquire().await;
        drop(p1);
        let p2 = limiter.acquire().await;
        drop(p2);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let limiter = LoginLimiter::new(2, Duration::ZERO);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        // Third acquire must block until a permit frees up.
        tokio::select! {
            _ = limiter.acquire() => panic!("third call should have blocked"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        drop(p1);
        drop(p2);
        let _p3 = limiter.acquire().await;
    }
}
