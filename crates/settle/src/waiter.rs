//! State-convergence waiter.
//!
//! A [`Waiter`] repeatedly calls a refresh function that reports the
//! current `(object, status)` of a remote resource, or `None` when the
//! resource can't be found. It keeps polling while the status is one of the
//! pending statuses and finishes once a target status has been observed
//! enough times in a row.
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! # use settle::waiter::Waiter;
//! # #[derive(Debug)] struct Workspace { status: String }
//! # async fn find(id: &str) -> settle::Result<Option<(Workspace, String)>> { unimplemented!() }
//! # async fn run() -> settle::Result<()> {
//! let workspace = Waiter::<Workspace>::new(Duration::from_secs(20 * 60))
//!     .pending(["CREATING"])
//!     .target(["ACTIVE"])
//!     .wait(|| find("ws-123"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
use std::{future::Future, marker::PhantomData, time::Duration};

use snafu::prelude::*;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// First backoff interval between polls.
const INITIAL_INTERVAL: Duration = Duration::from_millis(100);
/// Backoff never grows past this.
const MAX_INTERVAL: Duration = Duration::from_secs(10);
/// Fixed poll intervals at or above this are ignored in favor of backoff.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(180);

const DEFAULT_NOT_FOUND_CHECKS: usize = 20;

type ReasonFn<T> = Box<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// Errors produced while waiting.
///
/// Unlike [`Error`], these keep the last object that was observed. Timeout,
/// unexpected state and cancellation display like their [`Error`]
/// counterparts.
#[derive(Debug, Snafu)]
pub enum WaitError<T> {
    /// The target status was not reached in time.
    #[snafu(display(
        "timeout while waiting for state to become '{}' (last state: '{}', timeout: {}){}",
        expected.join(", "),
        last_status.as_deref().unwrap_or_default(),
        humantime::format_duration(*timeout),
        crate::reason_suffix(reason),
    ))]
    Timeout {
        timeout: Duration,
        last: Option<T>,
        last_status: Option<String>,
        expected: Vec<String>,
        reason: Option<String>,
    },
    /// A status outside of the pending and target sets was observed,
    /// eg `CREATION_FAILED`.
    #[snafu(display(
        "unexpected state '{status}', wanted target '{}'{}",
        expected.join(", "),
        crate::reason_suffix(reason),
    ))]
    UnexpectedState {
        status: String,
        last: T,
        expected: Vec<String>,
        reason: Option<String>,
    },
    /// The resource couldn't be found for more polls than allowed.
    #[snafu(display("couldn't find resource ({retries} retries)"))]
    NotFound { retries: usize },
    /// The refresh function itself failed.
    #[snafu(display("{source}"))]
    Refresh { source: Error, last: Option<T> },
    /// The cancellation token fired.
    #[snafu(display("waiting cancelled while the last state was '{}'",
                    last_status.as_deref().unwrap_or_default()))]
    Cancelled {
        last: Option<T>,
        last_status: Option<String>,
    },
    /// Pending and target sets overlap, or the timeout is zero.
    #[snafu(display("invalid waiter configuration: {reason}"))]
    Invalid { reason: String },
}

impl<T> WaitError<T> {
    /// The most recently observed object, if any.
    pub fn last(&self) -> Option<&T> {
        match self {
            WaitError::Timeout { last, .. }
            | WaitError::Refresh { last, .. }
            | WaitError::Cancelled { last, .. } => last.as_ref(),
            WaitError::UnexpectedState { last, .. } => Some(last),
            WaitError::NotFound { .. } | WaitError::Invalid { .. } => None,
        }
    }

    /// The status reason reported alongside the last object, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            WaitError::Timeout { reason, .. } | WaitError::UnexpectedState { reason, .. } => {
                reason.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

impl<T> From<WaitError<T>> for Error {
    fn from(err: WaitError<T>) -> Self {
        match err {
            WaitError::Timeout {
                timeout,
                last_status,
                expected,
                reason,
                last: _,
            } => Error::Timeout {
                timeout,
                last_status,
                expected,
                reason,
            },
            WaitError::UnexpectedState {
                status,
                expected,
                reason,
                last: _,
            } => Error::UnexpectedState {
                status,
                expected,
                reason,
            },
            WaitError::NotFound { retries } => Error::NotFound {
                message: format!("still missing after {retries} checks"),
            },
            WaitError::Refresh { source, last: _ } => source,
            WaitError::Cancelled {
                last_status,
                last: _,
            } => Error::Cancelled { last_status },
            WaitError::Invalid { reason } => Error::InvalidWaiter { reason },
        }
    }
}

/// Outcome of a single poll.
enum Poll<T> {
    /// Finished, with the object if it still exists.
    Done(Option<T>),
    /// Keep polling.
    Continue,
}

/// Polls a remote resource until it reaches a target status.
///
/// `T` is the type of object the refresh function reports.
pub struct Waiter<T> {
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    delay: Duration,
    min_interval: Duration,
    poll_interval: Option<Duration>,
    not_found_checks: usize,
    continuous_target_occurence: usize,
    reason: Option<ReasonFn<T>>,
    cancel: Option<CancellationToken>,
    _polled: PhantomData<fn() -> T>,
}

impl<T> Waiter<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: vec![],
            target: vec![],
            timeout,
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
            reason: None,
            cancel: None,
            _polled: PhantomData,
        }
    }

    /// Statuses that mean "not there yet, keep polling".
    pub fn pending<S: Into<String>>(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.pending = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Statuses that mean success. An empty set means "wait until gone".
    pub fn target<S: Into<String>>(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.target = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Sleep before the first poll.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Lower bound for the backoff interval.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Poll at a fixed interval instead of backing off.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// How many consecutive not-found polls to tolerate while a target
    /// status is expected. Useful right after creation, while the resource
    /// propagates.
    pub fn not_found_checks(mut self, checks: usize) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// How many consecutive times a target status must be observed.
    pub fn continuous_target_occurence(mut self, occurences: usize) -> Self {
        self.continuous_target_occurence = occurences.max(1);
        self
    }

    /// Extracts the service reported reason for the current status, eg the
    /// `statusReason` of a `CREATION_FAILED` object. It is attached to
    /// timeout and unexpected state errors.
    pub fn status_reason(mut self, f: impl Fn(&T) -> Option<String> + Send + Sync + 'static) -> Self {
        self.reason = Some(Box::new(f));
        self
    }

    /// Abort the wait when the token is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn validate(&self) -> Result<(), WaitError<T>> {
        if self.timeout.is_zero() {
            return Err(WaitError::Invalid {
                reason: "timeout must be greater than zero".into(),
            });
        }
        if let Some(status) = self.pending.iter().find(|s| self.target.contains(s)) {
            return Err(WaitError::Invalid {
                reason: format!("status '{status}' is both pending and target"),
            });
        }
        Ok(())
    }

    fn reason_of(&self, last: Option<&T>) -> Option<String> {
        let f = self.reason.as_ref()?;
        f(last?)
    }

    async fn cancelled(&self) {
        match &self.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    /// Polls until a target status is reached and returns that object.
    ///
    /// If the target set is empty and the resource disappears this errs
    /// with [`WaitError::NotFound`]; use [`Waiter::wait_gone`] for that.
    pub async fn wait<F, Fut>(self, refresh: F) -> Result<T, WaitError<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<Option<(T, String)>>>,
    {
        match self.run(refresh).await? {
            Some(value) => Ok(value),
            None => Err(WaitError::NotFound { retries: 0 }),
        }
    }

    /// Polls until the resource can no longer be found.
    ///
    /// Any configured target statuses also count as gone, eg `DELETED`.
    pub async fn wait_gone<F, Fut>(self, refresh: F) -> Result<(), WaitError<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<Option<(T, String)>>>,
    {
        self.run(refresh).await.map(|_| ())
    }

    fn timeout_error(&self, last: Option<T>, last_status: Option<String>) -> WaitError<T> {
        WaitError::Timeout {
            timeout: self.timeout,
            reason: self.reason_of(last.as_ref()),
            last,
            last_status,
            expected: self.target.clone(),
        }
    }

    async fn run<F, Fut>(self, mut refresh: F) -> Result<Option<T>, WaitError<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<Option<(T, String)>>>,
    {
        self.validate()?;
        let deadline = Instant::now() + self.timeout;
        log::debug!(
            "waiting for state to become '{}' (pending '{}', timeout {})",
            self.target.join(", "),
            self.pending.join(", "),
            humantime::format_duration(self.timeout)
        );

        let mut last: Option<T> = None;
        let mut last_status: Option<String> = None;
        let mut wait = INITIAL_INTERVAL;
        let mut not_found_tick = 0;
        let mut target_occurence = 0;

        if !self.delay.is_zero() {
            log::trace!("delaying first poll by {:?}", self.delay);
            if !self.sleep(self.delay, deadline).await {
                return Err(self.timeout_error(last, last_status));
            }
        }

        let mut first = true;
        loop {
            if !first {
                match self.poll_interval {
                    Some(interval) if !interval.is_zero() && interval < MAX_POLL_INTERVAL => {
                        wait = interval;
                    }
                    _ => {
                        if wait < self.min_interval {
                            wait = self.min_interval;
                        } else if wait > MAX_INTERVAL {
                            wait = MAX_INTERVAL;
                        }
                    }
                }
                log::trace!("waiting {wait:?} before next try");
                let slept = tokio::select! {
                    slept = self.sleep(wait, deadline) => slept,
                    _ = self.cancelled() => return Err(WaitError::Cancelled { last, last_status }),
                };
                if !slept {
                    return Err(self.timeout_error(last, last_status));
                }
            }
            first = false;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let observed = tokio::select! {
                observed = tokio::time::timeout(remaining, refresh()) => observed,
                _ = self.cancelled() => return Err(WaitError::Cancelled { last, last_status }),
            };
            let observed = match observed {
                Ok(Ok(observed)) => observed,
                Ok(Err(source)) => return Err(WaitError::Refresh { source, last }),
                Err(_elapsed) => return Err(self.timeout_error(last, last_status)),
            };

            match self.step(observed, &mut last, &mut last_status, &mut not_found_tick, &mut target_occurence)? {
                Poll::Done(value) => return Ok(value),
                Poll::Continue => {}
            }

            // Back off between refreshes, except when waiting for the
            // target status to reoccur.
            if target_occurence == 0 {
                wait *= 2;
            }
        }
    }

    /// Applies one observation to the state machine.
    fn step(
        &self,
        observed: Option<(T, String)>,
        last: &mut Option<T>,
        last_status: &mut Option<String>,
        not_found_tick: &mut usize,
        target_occurence: &mut usize,
    ) -> Result<Poll<T>, WaitError<T>> {
        let Some((value, status)) = observed else {
            if self.target.is_empty() {
                *target_occurence += 1;
                log::trace!("resource is gone ({target_occurence})");
                if *target_occurence >= self.continuous_target_occurence {
                    return Ok(Poll::Done(None));
                }
                return Ok(Poll::Continue);
            }
            *not_found_tick += 1;
            log::trace!("resource not found ({not_found_tick}/{})", self.not_found_checks);
            if *not_found_tick > self.not_found_checks {
                return Err(WaitError::NotFound {
                    retries: *not_found_tick,
                });
            }
            return Ok(Poll::Continue);
        };

        log::trace!("observed state '{status}'");
        *not_found_tick = 0;
        if self.target.contains(&status) {
            *target_occurence += 1;
            if *target_occurence >= self.continuous_target_occurence {
                return Ok(Poll::Done(Some(value)));
            }
        } else if self.pending.contains(&status) {
            *target_occurence = 0;
        } else if !self.pending.is_empty() {
            return Err(WaitError::UnexpectedState {
                reason: self.reason_of(Some(&value)),
                status,
                last: value,
                expected: self.target.clone(),
            });
        }
        *last = Some(value);
        *last_status = Some(status);
        Ok(Poll::Continue)
    }

    /// Sleeps for `duration`, or until the deadline if that comes first.
    ///
    /// Returns `false` if the deadline was reached.
    async fn sleep(&self, duration: Duration, deadline: Instant) -> bool {
        let now = Instant::now();
        if now + duration >= deadline {
            tokio::time::sleep_until(deadline).await;
            false
        } else {
            tokio::time::sleep(duration).await;
            true
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Thing {
        status: &'static str,
        reason: Option<&'static str>,
    }

    /// A refresh function that replays a script of observations and counts
    /// the polls. The last observation repeats forever.
    #[derive(Clone)]
    struct Script {
        steps: Arc<Mutex<VecDeque<Option<Thing>>>>,
        polls: Arc<Mutex<usize>>,
    }

    impl Script {
        fn new(steps: impl IntoIterator<Item = Option<Thing>>) -> Self {
            Script {
                steps: Arc::new(Mutex::new(steps.into_iter().collect())),
                polls: Default::default(),
            }
        }

        fn statuses(statuses: &[&'static str]) -> Self {
            Self::new(statuses.iter().map(|status| {
                Some(Thing {
                    status,
                    reason: None,
                })
            }))
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }

        async fn refresh(&self) -> crate::Result<Option<(Thing, String)>> {
            *self.polls.lock().unwrap() += 1;
            let mut steps = self.steps.lock().unwrap();
            let step = if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            };
            Ok(step.map(|thing| {
                let status = thing.status.to_owned();
                (thing, status)
            }))
        }
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_target_succeeds() {
        let _ = env_logger::builder().is_test(true).try_init();
        for pending in 0..6 {
            let mut statuses = vec!["CREATING"; pending];
            statuses.push("ACTIVE");
            let script = Script::statuses(&statuses);
            let thing = Waiter::new(minutes(20))
                .pending(["CREATING"])
                .target(["ACTIVE"])
                .wait(|| script.refresh())
                .await
                .unwrap();
            assert_eq!("ACTIVE", thing.status);
            assert_eq!(statuses.len(), script.polls());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn creating_creating_active() {
        let script = Script::statuses(&["CREATING", "CREATING", "ACTIVE"]);
        let thing = Waiter::new(minutes(5))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .poll_interval(Duration::from_secs(1))
            .wait(|| script.refresh())
            .await
            .unwrap();
        assert_eq!(
            Thing {
                status: "ACTIVE",
                reason: None
            },
            thing
        );
        assert_eq!(3, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn never_reaching_target_times_out_with_last_object() {
        let script = Script::new([
            Some(Thing {
                status: "CREATING",
                reason: Some("warming up"),
            }),
            Some(Thing {
                status: "UPDATING",
                reason: Some("still going"),
            }),
        ]);
        let start = Instant::now();
        let err = Waiter::new(minutes(3))
            .pending(["CREATING", "UPDATING"])
            .target(["ACTIVE"])
            .status_reason(|thing: &Thing| thing.reason.map(str::to_owned))
            .wait(|| script.refresh())
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert_eq!(Some("UPDATING"), err.last().map(|t| t.status));
        assert_eq!(Some("still going"), err.reason());
        assert!(Instant::now() - start >= minutes(3));

        let wait_msg = err.to_string();
        let msg = Error::from(err).to_string();
        assert_eq!(wait_msg, msg);
        assert!(msg.contains("timeout while waiting for state to become 'ACTIVE'"), "{msg}");
        assert!(msg.contains("last state: 'UPDATING'"), "{msg}");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_surfaces_reason() {
        let script = Script::new([
            Some(Thing {
                status: "CREATING",
                reason: None,
            }),
            Some(Thing {
                status: "CREATE_FAILED",
                reason: Some("kms key is disabled"),
            }),
        ]);
        let err = Waiter::new(minutes(20))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .status_reason(|thing: &Thing| thing.reason.map(str::to_owned))
            .wait(|| script.refresh())
            .await
            .unwrap_err();
        match &err {
            WaitError::UnexpectedState { status, last, .. } => {
                assert_eq!("CREATE_FAILED", status);
                assert_eq!("CREATE_FAILED", last.status);
            }
            other => panic!("unexpected {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("kms key is disabled"), "{msg}");
        assert_eq!(2, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_is_satisfied_by_not_found() {
        let script = Script::new([None]);
        Waiter::<Thing>::new(minutes(5))
            .pending(["DELETING"])
            .wait_gone(|| script.refresh())
            .await
            .unwrap();
        assert_eq!(1, script.polls());

        let script = Script::new([
            Some(Thing {
                status: "DELETING",
                reason: None,
            }),
            None,
        ]);
        Waiter::<Thing>::new(minutes(5))
            .pending(["DELETING"])
            .wait_gone(|| script.refresh())
            .await
            .unwrap();
        assert_eq!(2, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_checks_tolerate_propagation() {
        let active = Some(Thing {
            status: "ACTIVE",
            reason: None,
        });
        let script = Script::new([None, None, None, active.clone()]);
        let thing = Waiter::new(minutes(5))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .not_found_checks(3)
            .wait(|| script.refresh())
            .await
            .unwrap();
        assert_eq!("ACTIVE", thing.status);
        assert_eq!(4, script.polls());

        let script = Script::new([None, None, None, None, active]);
        let err = Waiter::new(minutes(5))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .not_found_checks(3)
            .wait(|| script.refresh())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotFound { retries: 4 }), "{err:?}");
        assert!(Error::from(err).is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_target_occurence_resets_on_pending() {
        let script = Script::statuses(&["ACTIVE", "CREATING", "ACTIVE", "ACTIVE"]);
        Waiter::new(minutes(5))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .continuous_target_occurence(2)
            .wait(|| script.refresh())
            .await
            .unwrap();
        assert_eq!(4, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_without_pending_keeps_polling() {
        let script = Script::statuses(&["WHATEVER", "ACTIVE"]);
        Waiter::new(minutes(5))
            .target(["ACTIVE"])
            .wait(|| script.refresh())
            .await
            .unwrap();
        assert_eq!(2, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_errors_propagate() {
        let polls = Arc::new(Mutex::new(0));
        let err = Waiter::<Thing>::new(minutes(5))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .wait(|| {
                *polls.lock().unwrap() += 1;
                async {
                    Err(Error::EmptyResult {
                        what: "describe".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WaitError::Refresh {
                source: Error::EmptyResult { .. },
                ..
            }
        ));
        assert_eq!(1, *polls.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_configuration_never_polls() {
        let script = Script::statuses(&["ACTIVE"]);
        let err = Waiter::new(minutes(5))
            .pending(["ACTIVE"])
            .target(["ACTIVE"])
            .wait(|| script.refresh())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Invalid { .. }));

        let err = Waiter::new(Duration::ZERO)
            .target(["ACTIVE"])
            .wait(|| script.refresh())
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Invalid { .. }));
        assert_eq!(0, script.polls());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts() {
        let script = Script::statuses(&["CREATING"]);
        let token = CancellationToken::new();
        let waiter = Waiter::new(minutes(30))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .cancel_on(token.clone());
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(waiter.wait(|| script.refresh()), cancel);
        match result {
            Err(WaitError::Cancelled { last_status, .. }) => {
                assert_eq!(Some("CREATING".to_owned()), last_status)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_ten_seconds() {
        let script = Script::statuses(&["CREATING"]);
        let start = Instant::now();
        let _ = Waiter::new(minutes(1))
            .pending(["CREATING"])
            .target(["ACTIVE"])
            .wait(|| script.refresh())
            .await;
        // polls at 0, 0.2, 0.6, 1.4, 3.0, 6.2 and 12.6s, then every 10s
        assert!(Instant::now() - start >= minutes(1));
        assert_eq!(11, script.polls());
    }
}
