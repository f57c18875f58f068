//! Bounded execution wrapper.
//!
//! Every externally-facing stage runs through [`ResilientExecutor`]: each
//! attempt is clamped by a timeout, retries are bounded, and the caller
//! always receives a typed [`StageOutcome`] — exceeding a budget is a defined
//! result, never an unhandled failure or an unbounded hang. Cancellation is
//! cooperative: long operations observe a [`CancelFlag`] between iterations.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::challenges::core::SolveErrorKind;

/// Cooperative cancellation signal observed between polling iterations.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<bool>,
}

impl CancelFlag {
    /// A flag that can never fire, for callers without a cancellation source.
    pub fn inert() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Owning half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a linked cancellation handle/flag pair.
pub fn cancel_pair() -> (CancelHandle, CancelFlag) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelFlag { rx })
}

/// Result of a bounded stage: either a value or a classified failure, always
/// with attempt and elapsed accounting.
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Completed {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },
    Failed {
        error_kind: SolveErrorKind,
        attempts: u32,
        elapsed: Duration,
    },
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StageOutcome::Completed { value, .. } => Some(value),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> SolveErrorKind {
        match self {
            StageOutcome::Completed { .. } => SolveErrorKind::None,
            StageOutcome::Failed { error_kind, .. } => *error_kind,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            StageOutcome::Completed { elapsed, .. } | StageOutcome::Failed { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// Timeout/retry wrapper shared by all engine stages.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    attempt_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ResilientExecutor {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            attempt_timeout,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run `op` until it succeeds, the retry budget is exhausted, or the
    /// cancel flag fires. Each attempt is independently clamped by the
    /// attempt timeout; an expired attempt is a `Timeout` outcome, not an
    /// error.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancelFlag,
        mut op: F,
    ) -> StageOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SolveErrorKind>>,
    {
        let started = Instant::now();
        let mut attempts = 0;
        let mut last_error = SolveErrorKind::Unknown;

        while attempts <= self.max_retries {
            if cancel.is_cancelled() {
                log::debug!("stage {label} abandoned by cancellation");
                return StageOutcome::Failed {
                    error_kind: SolveErrorKind::Timeout,
                    attempts,
                    elapsed: started.elapsed(),
                };
            }

            attempts += 1;
            match timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    return StageOutcome::Completed {
                        value,
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
                Ok(Err(kind)) => {
                    log::debug!("stage {label} attempt {attempts} failed: {kind}");
                    last_error = kind;
                }
                Err(_) => {
                    log::debug!(
                        "stage {label} attempt {attempts} exceeded {:?}",
                        self.attempt_timeout
                    );
                    last_error = SolveErrorKind::Timeout;
                }
            }

            if attempts <= self.max_retries && !self.retry_delay.is_zero() {
                sleep(self.retry_delay).await;
            }
        }

        StageOutcome::Failed {
            error_kind: last_error,
            attempts,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn completes_on_first_success() {
        let executor = ResilientExecutor::new(Duration::from_secs(1));
        let outcome = executor
            .run("ok", &CancelFlag::inert(), || async { Ok::<_, SolveErrorKind>(7) })
            .await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.into_value(), Some(7));
    }

    #[tokio::test]
    async fn retries_then_reports_last_error() {
        let executor = ResilientExecutor::new(Duration::from_secs(1))
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let outcome: StageOutcome<()> = executor
            .run("fails", &CancelFlag::inert(), move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SolveErrorKind::SubmissionRejected)
                }
            })
            .await;
        assert!(!outcome.is_completed());
        assert_eq!(outcome.error_kind(), SolveErrorKind::SubmissionRejected);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_attempts_become_timeout_outcomes_within_budget() {
        let executor = ResilientExecutor::new(Duration::from_millis(50))
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(1));
        let started = Instant::now();
        let outcome: StageOutcome<()> = executor
            .run("slow", &CancelFlag::inert(), || async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert_eq!(outcome.error_kind(), SolveErrorKind::Timeout);
        // Two 50ms attempts plus bookkeeping must stay far below the
        // operation's own 10s.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_attempt() {
        let executor = ResilientExecutor::new(Duration::from_millis(20))
            .with_max_retries(50)
            .with_retry_delay(Duration::from_millis(1));
        let (handle, flag) = cancel_pair();
        handle.cancel();
        let outcome: StageOutcome<()> = executor
            .run("cancelled", &flag, || async {
                Err(SolveErrorKind::Unknown)
            })
            .await;
        assert_eq!(outcome.error_kind(), SolveErrorKind::Timeout);
        match outcome {
            StageOutcome::Failed { attempts, .. } => assert_eq!(attempts, 0),
            StageOutcome::Completed { .. } => unreachable!(),
        }
    }
}
