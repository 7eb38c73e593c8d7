//! Retry policy and retry loops.
//!
//! A failed attempt is classified as transient or non-retriable. Transient
//! failures are retried up to `max_retries` times with exponential backoff
//! anchored at `base_delay`; non-retriable failures propagate immediately.
//!
//! ```text
//! ATTEMPTING --ok--> DONE
//! ATTEMPTING --transient, retries left--> WAITING --> ATTEMPTING
//! ATTEMPTING --transient, retries used up--> RETRIES_EXHAUSTED
//! ATTEMPTING --non-retriable--> FAILED
//! ```

use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::error::{Classify, FailureKind};

/// Upper bound on a single backoff delay unless configured otherwise.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt follows.
    pub should_retry: bool,
    /// Wait before that attempt. Computed even when `should_retry` is false.
    pub delay: Duration,
}

/// What the retry loop does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait, then attempt again.
    Wait(Duration),
    /// Transient failure with every configured retry used.
    Exhausted,
    /// Non-retriable failure, or no retries configured.
    Fail,
}

/// `base_delay * backoff_factor^(attempt - 1)`, saturating at `cap`.
fn backoff_delay(
    base_delay: Duration,
    backoff_factor: f64,
    attempt: u32,
    cap: Duration,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = if backoff_factor.is_finite() {
        backoff_factor.max(1.0)
    } else {
        1.0
    };
    let secs = base_delay.as_secs_f64() * factor.powi(exponent);
    Duration::try_from_secs_f64(secs).unwrap_or(cap).min(cap)
}

/// Decide whether a failed attempt is retried and how long to wait first.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub fn next_retry(
    attempt: u32,
    max_retries: u32,
    base_delay: Duration,
    backoff_factor: f64,
    failure_kind: FailureKind,
) -> RetryDecision {
    RetryDecision {
        should_retry: attempt <= max_retries && failure_kind.is_transient(),
        delay: backoff_delay(base_delay, backoff_factor, attempt, Duration::MAX),
    }
}

/// Retry configuration for one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per further retry. Values below 1 count as 1.
    pub backoff_factor: f64,
    /// Cap on any single delay, applied before jitter.
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default delay cap and no jitter.
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1.0)
    }

    /// Override the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// [`next_retry`] with this policy's settings, delay cap and jitter.
    pub fn next_retry(&self, attempt: u32, failure_kind: FailureKind) -> RetryDecision {
        let decision = next_retry(
            attempt,
            self.max_retries,
            self.base_delay,
            self.backoff_factor,
            failure_kind,
        );
        let mut delay = decision.delay.min(self.max_delay);
        if self.jitter {
            let scale = rand::thread_rng().gen_range(0.5..=1.0);
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * scale).unwrap_or(delay);
        }
        RetryDecision {
            should_retry: decision.should_retry,
            delay,
        }
    }

    /// Map a failed attempt onto the retry state machine.
    pub fn step(&self, attempt: u32, failure_kind: FailureKind) -> RetryStep {
        let decision = self.next_retry(attempt, failure_kind);
        if decision.should_retry {
            RetryStep::Wait(decision.delay)
        } else if failure_kind.is_transient() && self.max_retries > 0 {
            RetryStep::Exhausted
        } else {
            RetryStep::Fail
        }
    }
}

/// Terminal failure of a retry loop.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Failed without exhausting retries: non-retriable, or retries disabled.
    #[error(transparent)]
    Failed(E),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The last underlying failure, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

#[derive(Debug)]
struct CancelState {
    sender: watch::Sender<bool>,
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Cancellation signal shared between a request and whoever may abort it.
///
/// Async waiters are woken through a `watch` channel, blocked threads
/// through a condition variable.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            state: Arc::new(CancelState {
                sender,
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.state.signal.notify_all();
        drop(cancelled);
        self.state.sender.send_replace(true);
    }

    /// Whether any clone has called [`cancel`](Self::cancel).
    pub fn is_cancelled(&self) -> bool {
        *self.state.sender.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.state.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Block the calling thread until the token is cancelled or `timeout`
    /// elapses. Returns `true` if it was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = self
            .state
            .signal
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `operation` under `policy`, suspending the task between attempts.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called with
/// the failed attempt number, the upcoming delay and the failure before each
/// wait.
pub async fn retry_async<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    operation: F,
    on_retry: H,
) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32, Duration, &E),
{
    retry_async_with_cancel(policy, &CancelToken::new(), operation, on_retry).await
}

/// [`retry_async`] that stops as soon as `cancel` fires.
///
/// Cancellation aborts an in-flight attempt or a pending wait immediately;
/// the policy is not consulted again afterwards.
pub async fn retry_async_with_cancel<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut operation: F,
    mut on_retry: H,
) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32, Duration, &E),
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match policy.step(attempt, error.failure_kind()) {
            RetryStep::Wait(delay) => {
                on_retry(attempt, delay, &error);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RetryStep::Exhausted => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                })
            }
            RetryStep::Fail => return Err(RetryError::Failed(error)),
        }

        attempt += 1;
    }
}

/// Blocking form of [`retry_async`]; waits block the calling thread.
pub fn retry_blocking<T, E, F, H>(
    policy: &RetryPolicy,
    operation: F,
    on_retry: H,
) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut(u32) -> Result<T, E>,
    H: FnMut(u32, Duration, &E),
{
    retry_blocking_with_cancel(policy, &CancelToken::new(), operation, on_retry)
}

/// [`retry_blocking`] that stops when `cancel` fires.
///
/// A pending wait ends as soon as the token is cancelled. An attempt already
/// running finishes first, and no further attempt starts.
pub fn retry_blocking_with_cancel<T, E, F, H>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut operation: F,
    mut on_retry: H,
) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut(u32) -> Result<T, E>,
    H: FnMut(u32, Duration, &E),
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let error = match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match policy.step(attempt, error.failure_kind()) {
            RetryStep::Wait(delay) => {
                on_retry(attempt, delay, &error);
                if cancel.wait_timeout(delay) {
                    return Err(RetryError::Cancelled);
                }
            }
            RetryStep::Exhausted => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                })
            }
            RetryStep::Fail => return Err(RetryError::Failed(error)),
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use proptest::prelude::*;
    use std::cell::{Cell, RefCell};
    use test_case::test_case;

    const SECOND: Duration = Duration::from_secs(1);

    fn not_found() -> HttpError {
        HttpError::Status {
            status: 404,
            url: "https://api.example.com/missing".to_string(),
            body: "not found".to_string(),
        }
    }

    fn refused() -> HttpError {
        HttpError::Connection("connection refused".to_string())
    }

    #[test_case(1, true, 1.0 ; "first retry waits base delay")]
    #[test_case(2, true, 2.0 ; "second retry doubles")]
    #[test_case(3, true, 4.0 ; "last retry")]
    #[test_case(4, false, 8.0 ; "beyond max retries")]
    fn test_next_retry_transient(attempt: u32, should_retry: bool, delay_secs: f64) {
        let decision = next_retry(attempt, 3, SECOND, 2.0, FailureKind::Transient);
        assert_eq!(decision.should_retry, should_retry);
        assert_eq!(decision.delay, Duration::from_secs_f64(delay_secs));
    }

    #[test_case(1 ; "first attempt")]
    #[test_case(2 ; "second attempt")]
    #[test_case(10 ; "late attempt")]
    fn test_next_retry_non_retriable(attempt: u32) {
        let decision = next_retry(attempt, 3, SECOND, 2.0, FailureKind::NonRetriable);
        assert!(!decision.should_retry);
    }

    #[test]
    fn test_next_retry_zero_max_retries() {
        let decision = next_retry(1, 0, SECOND, 2.0, FailureKind::Transient);
        assert!(!decision.should_retry);
    }

    #[test]
    fn test_next_retry_is_total_on_huge_inputs() {
        let decision = next_retry(
            u32::MAX,
            u32::MAX,
            Duration::MAX,
            f64::MAX,
            FailureKind::Transient,
        );
        assert!(decision.should_retry);
        assert_eq!(decision.delay, Duration::MAX);

        let nan = next_retry(3, 3, SECOND, f64::NAN, FailureKind::Transient);
        assert_eq!(nan.delay, SECOND);
    }

    #[test]
    fn test_policy_caps_delay() {
        let policy = RetryPolicy::new(10, SECOND, 10.0);
        assert_eq!(policy.next_retry(1, FailureKind::Transient).delay, SECOND);
        assert_eq!(policy.next_retry(2, FailureKind::Transient).delay, Duration::from_secs(10));
        assert_eq!(policy.next_retry(3, FailureKind::Transient).delay, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_policy_jitter_stays_in_range() {
        let policy = RetryPolicy::new(3, Duration::from_millis(800), 1.0).with_jitter(true);
        for _ in 0..50 {
            let delay = policy.next_retry(1, FailureKind::Transient).delay;
            assert!(delay >= Duration::from_millis(400) && delay <= Duration::from_millis(800));
        }
    }

    #[test]
    fn test_policy_steps() {
        let policy = RetryPolicy::new(3, SECOND, 2.0);
        assert_eq!(policy.step(1, FailureKind::Transient), RetryStep::Wait(SECOND));
        assert_eq!(policy.step(4, FailureKind::Transient), RetryStep::Exhausted);
        assert_eq!(policy.step(1, FailureKind::NonRetriable), RetryStep::Fail);
        assert_eq!(RetryPolicy::none().step(1, FailureKind::Transient), RetryStep::Fail);
        assert_eq!(policy.max_attempts(), 4);
    }

    proptest! {
        #[test]
        fn prop_delay_never_decreases(
            base_ms in 0u64..10_000,
            factor in 1.0f64..4.0,
            attempt in 1u32..40,
        ) {
            let policy = RetryPolicy::new(100, Duration::from_millis(base_ms), factor);
            let now = policy.next_retry(attempt, FailureKind::Transient).delay;
            let next = policy.next_retry(attempt + 1, FailureKind::Transient).delay;
            prop_assert!(next + Duration::from_nanos(1) >= now);
            prop_assert!(next <= policy.max_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failures_then_success() {
        let policy = RetryPolicy::new(3, SECOND, 2.0);
        let calls = Cell::new(0);
        let delays = RefCell::new(Vec::new());

        let result = retry_async(
            &policy,
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(refused())
                    } else {
                        Ok("payload")
                    }
                }
            },
            |_, delay, _| delays.borrow_mut().push(delay),
        )
        .await;

        assert_eq!(result.unwrap(), "payload");
        assert_eq!(calls.get(), 3);
        assert_eq!(*delays.borrow(), vec![SECOND, Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_immediately() {
        let policy = RetryPolicy::new(3, SECOND, 2.0);
        let calls = Cell::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = retry_async(
            &policy,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(not_found()) }
            },
            |_, _, _| panic!("must not retry a client error"),
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Failed(HttpError::Status { status: 404, .. }))
        ));
        assert_eq!(calls.get(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_wraps_last_failure() {
        let policy = RetryPolicy::new(3, SECOND, 2.0);
        let calls = Cell::new(0);

        let result: Result<(), _> = retry_async(
            &policy,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(HttpError::Timeout("read timed out".into())) }
            },
            |_, _, _| {},
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_timeout());
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_configured_surfaces_raw_failure() {
        let result: Result<(), _> =
            retry_async(&RetryPolicy::none(), |_| async { Err(refused()) }, |_, _, _| {}).await;
        assert!(matches!(result, Err(RetryError::Failed(HttpError::Connection(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30), 2.0);
        let cancel = CancelToken::new();
        let calls = Cell::new(0);

        let trigger = cancel.clone();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = retry_async_with_cancel(
            &policy,
            &cancel,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(refused()) }
            },
            |_, _, _| {},
        )
        .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_attempts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(cancel.is_cancelled());

        let calls = Cell::new(0);
        let result: Result<(), RetryError<HttpError>> = retry_async_with_cancel(
            &RetryPolicy::default(),
            &cancel,
            |_| {
                calls.set(calls.get() + 1);
                async { Ok(()) }
            },
            |_, _, _| {},
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_retry_blocking_success_after_failures() {
        let policy = RetryPolicy::new(3, Duration::ZERO, 2.0);
        let mut delays = Vec::new();

        let result = retry_blocking(
            &policy,
            |attempt| if attempt < 3 { Err(refused()) } else { Ok(attempt) },
            |_, delay, _| delays.push(delay),
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(delays.len(), 2);
    }

    #[test]
    fn test_retry_blocking_exhausted() {
        let policy = RetryPolicy::new(2, Duration::ZERO, 2.0);
        let result: Result<(), _> = retry_blocking(&policy, |_| Err(refused()), |_, _, _| {});
        let error = result.unwrap_err();
        assert!(matches!(error, RetryError::Exhausted { attempts: 3, .. }));
        assert!(error.to_string().contains("retries exhausted after 3 attempts"));
        assert!(error.into_inner().unwrap().is_connection());
    }

    #[test]
    fn test_retry_blocking_cancel_during_wait() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10), 2.0);
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let mut calls = 0;
        let result: Result<(), _> = retry_blocking_with_cancel(
            &policy,
            &cancel,
            |_| {
                calls += 1;
                Err(refused())
            },
            |_, _, _| {},
        );

        canceller.join().unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_retry_blocking_cancelled_before_start_never_attempts() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut calls = 0;
        let result: Result<(), RetryError<HttpError>> = retry_blocking_with_cancel(
            &RetryPolicy::default(),
            &cancel,
            |_| {
                calls += 1;
                Ok(())
            },
            |_, _, _| {},
        );

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_wait_timeout_reports_cancellation() {
        let cancel = CancelToken::new();
        assert!(!cancel.wait_timeout(Duration::from_millis(10)));

        cancel.clone().cancel();
        let started = std::time::Instant::now();
        assert!(cancel.wait_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
