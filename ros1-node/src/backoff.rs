//! Component C: truncated exponential backoff with jitter, and a
//! cancellable "retry forever" primitive used to drive reconnect loops
//!

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    pub cap_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            cap_ms: 10_000,
            jitter_max_ms: 1_000,
        }
    }
}

/// `min(2^retries + jitter, cap_ms)` milliseconds, where `jitter` is drawn
/// uniformly from `[0, jitter_max_ms]` `retries` is clamped
/// internally so the exponent never overflows `u64`.
pub fn backoff_delay_ms(retries: u32, cfg: &BackoffConfig) -> u64 {
    let exp = 2u64.checked_pow(retries.min(63)).unwrap_or(u64::MAX);
    let jitter = if cfg.jitter_max_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=cfg.jitter_max_ms)
    };
    exp.saturating_add(jitter).min(cfg.cap_ms)
}

/// A cooperative cancellation flag: cloning shares the same underlying
/// state, `cancel()` wakes every waiter of `cancelled()`.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called (or immediately, if it
    /// already has been).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Retries `attempt` with truncated exponential backoff until it succeeds
/// or `cancel` fires, whichever comes first. Returns `None` if cancelled
/// before a success, else `Some` of the successful attempt's output.
///
/// `attempt` is called with the zero-based retry count so callers can log
/// it; the first call is retry 0 with no preceding delay.
pub async fn retry_forever<F, Fut, T, E>(
    cfg: BackoffConfig,
    cancel: &CancelToken,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match attempt(retries).await {
            Ok(value) => return Some(value),
            Err(_) => {
                let delay = Duration::from_millis(backoff_delay_ms(retries, &cfg));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return None,
                }
                retries = retries.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_grows_monotonically_until_the_cap() {
        let cfg = BackoffConfig {
            cap_ms: 1_000,
            jitter_max_ms: 0,
        };
        let mut prev = 0;
        for retries in 0..20 {
            let d = backoff_delay_ms(retries, &cfg);
            assert!(d >= prev);
            assert!(d <= cfg.cap_ms);
            prev = d;
        }
    }

    #[test]
    fn delay_never_exceeds_cap_plus_jitter_bound() {
        let cfg = BackoffConfig {
            cap_ms: 5_000,
            jitter_max_ms: 250,
        };
        for retries in [0, 1, 5, 10, 30, 63, 64, 1000] {
            let d = backoff_delay_ms(retries, &cfg);
            assert!(d <= cfg.cap_ms, "retries={retries} d={d}");
        }
    }

    #[tokio::test]
    async fn cancel_token_wakes_a_pending_waiter() {
        let cancel = CancelToken::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve promptly after cancel()")
            .unwrap();
    }

    #[tokio::test]
    async fn retry_forever_stops_on_cancel_without_success() {
        let cancel = CancelToken::new();
        let cfg = BackoffConfig {
            cap_ms: 10,
            jitter_max_ms: 0,
        };
        cancel.cancel();
        let result: Option<()> = retry_forever(cfg, &cancel, |_| async { Err::<(), ()>(()) }).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn retry_forever_returns_the_first_success() {
        let cancel = CancelToken::new();
        let cfg = BackoffConfig {
            cap_ms: 5,
            jitter_max_ms: 0,
        };
        let mut calls = 0;
        let result = retry_forever(cfg, &cancel, |retries| {
            calls += 1;
            async move {
                if retries < 2 {
                    Err(())
                } else {
                    Ok(retries)
                }
            }
        })
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(calls, 3);
    }
}
