// Retry Helper
// Fixed-interval polling until a probe succeeds or a deadline passes

use std::future::Future;
use std::time::{Duration, Instant};

/// Interval between probes used by [`retry`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll `probe` every [`DEFAULT_POLL_INTERVAL`] until it returns true or
/// `deadline` has elapsed
pub async fn retry<F, Fut>(deadline: Duration, probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    retry_every(DEFAULT_POLL_INTERVAL, deadline, probe).await
}

/// Poll `probe` every `interval` until it returns true or `deadline` has
/// elapsed. The probe always runs at least once; the last value is returned.
pub async fn retry_every<F, Fut>(interval: Duration, deadline: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if probe().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_succeeds_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ok = retry_every(Duration::from_millis(10), Duration::from_secs(1), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { true }
        })
        .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ok = retry_every(Duration::from_millis(5), Duration::from_secs(2), || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { n >= 3 }
        })
        .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_deadline() {
        let start = Instant::now();
        let ok = retry_every(Duration::from_millis(10), Duration::from_millis(60), || async {
            false
        })
        .await;

        assert!(!ok);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_zero_deadline_probes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ok = retry_every(Duration::from_millis(10), Duration::ZERO, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
