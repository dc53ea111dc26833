//! Rate-limit backoff for paginated API calls.
//!
//! A rate-limited request is repeated unchanged after a fixed backoff. Every other
//! outcome, success or failure, is returned to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::CancelFlag;
use crate::sources::SourceError;

/// How often a backoff wait looks at the cancel flag
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Configuration for rate-limit retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Wait before repeating a rate-limited request
    pub backoff: Duration,
    /// Maximum consecutive rate-limited attempts before giving up (`None` = unbounded)
    pub max_retries: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            max_retries: Some(30),
        }
    }
}

impl RateLimitPolicy {
    /// Delay before the next attempt, honoring a server-provided `Retry-After`
    pub fn delay_for(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(server) => server.max(self.backoff),
            None => self.backoff,
        }
    }
}

/// Outcome of a request that may have been retried
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    /// Number of rate-limited attempts before the final one
    pub rate_limited: u32,
}

/// Execute an async request, repeating it while the server answers HTTP 429.
///
/// The operation is re-invoked as is, so it must describe the same request on
/// every call. Each retry is logged. When the policy's bound is reached the
/// result is [`SourceError::RateLimitExhausted`].
pub async fn with_rate_limit_backoff<T, F, Fut>(
    policy: &RateLimitPolicy,
    operation: F,
) -> Result<Retried<T>, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    with_cancellable_backoff(policy, &CancelFlag::new(), operation).await
}

/// Like [`with_rate_limit_backoff`], but gives up with [`SourceError::Cancelled`]
/// as soon as `cancel` is raised during a backoff wait.
pub async fn with_cancellable_backoff<T, F, Fut>(
    policy: &RateLimitPolicy,
    cancel: &CancelFlag,
    mut operation: F,
) -> Result<Retried<T>, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut rate_limited = 0u32;
    let mut waited = Duration::ZERO;

    loop {
        match operation().await {
            Ok(value) => {
                if rate_limited > 0 {
                    tracing::info!(
                        "Request succeeded after {} rate-limited attempts ({:?} waited)",
                        rate_limited,
                        waited
                    );
                }
                return Ok(Retried {
                    value,
                    rate_limited,
                });
            }
            Err(SourceError::RateLimited { retry_after }) => {
                rate_limited += 1;

                if let Some(max) = policy.max_retries {
                    if rate_limited > max {
                        tracing::warn!(
                            "Giving up after {} rate-limited attempts ({:?} waited)",
                            rate_limited,
                            waited
                        );
                        return Err(SourceError::RateLimitExhausted {
                            attempts: rate_limited,
                            waited,
                        });
                    }
                }

                let delay = policy.delay_for(retry_after);
                tracing::warn!(
                    "Rate limited (attempt {}), retrying same request in {:?}",
                    rate_limited,
                    delay
                );
                if !wait_unless_cancelled(delay, cancel).await {
                    tracing::info!("Cancelled during rate-limit backoff");
                    return Err(SourceError::Cancelled);
                }
                waited += delay;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Sleep for `delay` in short slices; `false` when cancelled before it elapsed.
async fn wait_unless_cancelled(delay: Duration, cancel: &CancelFlag) -> bool {
    let mut remaining = delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(CANCEL_POLL);
        sleep(step).await;
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fast_policy(max_retries: Option<u32>) -> RateLimitPolicy {
        RateLimitPolicy {
            backoff: Duration::from_millis(1),
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_rate_limit_backoff(&fast_policy(Some(3)), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Ok("page")
                }
            })
        }
        .await
        .unwrap();

        assert_eq!(result.value, "page");
        assert_eq!(result.rate_limited, 0);
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test]
    async fn test_success_after_rate_limits() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_rate_limit_backoff(&fast_policy(Some(5)), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    if *call_count.borrow() < 3 {
                        Err(SourceError::RateLimited { retry_after: None })
                    } else {
                        Ok("page")
                    }
                }
            })
        }
        .await
        .unwrap();

        assert_eq!(result.value, "page");
        assert_eq!(result.rate_limited, 2);
        assert_eq!(*call_count.borrow(), 3);
    }

    #[tokio::test]
    async fn test_bound_is_enforced() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<Retried<()>, _> = {
            let call_count = call_count.clone();
            with_rate_limit_backoff(&fast_policy(Some(2)), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(SourceError::RateLimited { retry_after: None })
                }
            })
        }
        .await;

        match result {
            Err(SourceError::RateLimitExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected RateLimitExhausted, got {:?}", other.map(|_| ())),
        }
        // initial attempt + 2 retries
        assert_eq!(*call_count.borrow(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<Retried<()>, _> = {
            let call_count = call_count.clone();
            with_rate_limit_backoff(&fast_policy(None), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(SourceError::Remote {
                        status: 500,
                        message: "boom".to_string(),
                    })
                }
            })
        }
        .await;

        assert!(matches!(result, Err(SourceError::Remote { status: 500, .. })));
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancelFlag::new();
        let call_count = Rc::new(RefCell::new(0));
        let policy = RateLimitPolicy {
            backoff: Duration::from_secs(3600),
            max_retries: None,
        };

        let started = std::time::Instant::now();
        let result: Result<Retried<()>, _> = {
            let call_count = call_count.clone();
            let trigger = cancel.clone();
            with_cancellable_backoff(&policy, &cancel, move || {
                let call_count = call_count.clone();
                let cancel = trigger.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    cancel.cancel();
                    Err(SourceError::RateLimited { retry_after: None })
                }
            })
        }
        .await;

        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert_eq!(*call_count.borrow(), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cancel_raised_mid_wait() {
        let cancel = CancelFlag::new();
        let policy = RateLimitPolicy {
            backoff: Duration::from_secs(10),
            max_retries: Some(30),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<Retried<()>, _> = with_cancellable_backoff(&policy, &cancel, || async {
            Err(SourceError::RateLimited { retry_after: None })
        })
        .await;

        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_delay_for() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.delay_for(None), Duration::from_secs(10));
        assert_eq!(policy.delay_for(Some(Duration::from_secs(3))), Duration::from_secs(10));
        assert_eq!(policy.delay_for(Some(Duration::from_secs(25))), Duration::from_secs(25));
    }
}
