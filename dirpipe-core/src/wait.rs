//! Cooperative polling with deadlines and cancellation.
//!
//! Every blocking operation in dirpipe has the same shape: check
//! cancellation, attempt, check the deadline, sleep, repeat. [`Poller`] is
//! that loop; callers supply only the attempt.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default pause between two attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

/// Cloneable cancellation signal.
///
/// Cancelling wakes every thread currently sleeping on the token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes all sleepers.
    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        *cancelled = true;
        self.state.wakeup.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the token is or becomes cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .wakeup
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        if *cancelled {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between two attempts.
    pub interval: Duration,
    /// Give up after this long; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl PollConfig {
    /// Creates a config with the default interval and the given timeout.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Runs attempts until one succeeds, the deadline passes, or the token is
/// cancelled.
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

impl Poller {
    /// Creates a poller using the system clock and a fresh token.
    #[must_use]
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the polling parameters.
    #[must_use]
    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Changes the timeout of subsequent polls.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeout = timeout;
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Calls `attempt` until it yields a value.
    ///
    /// The timeout is measured from the call and re-checked after every
    /// unsuccessful attempt; the final sleep is shortened so the deadline is
    /// not overshot by a whole interval.
    ///
    /// # Errors
    /// Returns [`Error::Timeout`] when the deadline passes,
    /// [`Error::Cancelled`] when the token fires, or any error returned by
    /// `attempt`.
    pub fn poll_until<T, F>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        let started = self.clock.now();
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!("poll cancelled");
                return Err(Error::Cancelled);
            }
            if let Some(value) = attempt()? {
                return Ok(value);
            }
            let elapsed = self.clock.now().saturating_duration_since(started);
            let pause = match self.config.timeout {
                Some(timeout) if elapsed >= timeout => {
                    tracing::debug!(?elapsed, ?timeout, "poll timed out");
                    return Err(Error::Timeout { elapsed });
                }
                Some(timeout) => self.config.interval.min(timeout - elapsed),
                None => self.config.interval,
            };
            self.cancel.sleep(pause)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Clock that advances by a fixed step on every reading.
    #[derive(Debug)]
    struct SteppingClock {
        now: Mutex<Instant>,
        step: Duration,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> Instant {
            let mut now = self.now.lock();
            *now += self.step;
            *now
        }
    }

    #[test]
    fn test_poll_config_default() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_millis(100));
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_poll_returns_first_value() {
        let poller = Poller::new(PollConfig {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
        });
        let mut calls = 0;
        let value = poller
            .poll_until(|| {
                calls += 1;
                Ok((calls == 3).then_some("ready"))
            })
            .unwrap();
        assert_eq!(value, "ready");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_poll_times_out_against_injected_clock() {
        let clock = Arc::new(SteppingClock {
            now: Mutex::new(Instant::now()),
            step: Duration::from_millis(50),
        });
        let poller = Poller::new(PollConfig {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(200)),
        })
        .with_clock(clock);

        let mut attempts = 0;
        let err = poller
            .poll_until(|| {
                attempts += 1;
                Ok(None::<()>)
            })
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { elapsed } if elapsed == Duration::from_millis(200)));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_poll_propagates_attempt_errors() {
        let poller = Poller::default();
        let err = poller
            .poll_until(|| Err::<Option<()>, _>(Error::ChannelClosed))
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[test]
    fn test_cancel_wakes_sleeping_poll() {
        let token = CancellationToken::new();
        let poller = Poller::new(PollConfig {
            interval: Duration::from_secs(30),
            timeout: None,
        })
        .with_cancellation(token.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let started = Instant::now();
        let err = poller.poll_until(|| Ok(None::<()>)).unwrap_err();
        canceller.join().unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_token_sleep() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(5)).is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.sleep(Duration::from_secs(30)), Err(Error::Cancelled)));
    }
}
