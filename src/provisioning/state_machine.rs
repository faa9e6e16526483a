//! Poll-until-target-state engine
//!
//! Used whenever a backend's creation, deletion confirmation, or correlation
//! lookup completes asynchronously. The caller's task is held for the whole
//! wait; the only way out early is a target state or a hard error.
//!
//! Bounds: the overall `timeout` and, when configured, a not-found grace
//! count. Both apply independently and whichever is exhausted first ends the
//! wait. The grace counter only counts consecutive [`Observation::Absent`]
//! results and resets as soon as the resource is observed.

use crate::error::{Error, Result};
use crate::provisioning::clock::Clock;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label reported for transient probe failures
pub const RETRY_STATE: &str = "retry";

// =============================================================================
// Poll State
// =============================================================================

/// Transient state of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// Nothing observed yet, or the resource is not visible
    Pending,
    /// The resource reports one of the pending labels
    Transitioning,
    /// The resource reached the target label
    Available,
    /// The wait ended without reaching the target
    Failed,
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollState::Pending => write!(f, "pending"),
            PollState::Transitioning => write!(f, "transitioning"),
            PollState::Available => write!(f, "available"),
            PollState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Probe Results
// =============================================================================

/// What a single probe saw
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    /// The resource exists and reports `label`
    State { label: String, value: T },
    /// The resource is not (yet) visible
    Absent,
}

impl<T> Observation<T> {
    pub fn state(label: impl Into<String>, value: T) -> Self {
        Observation::State {
            label: label.into(),
            value,
        }
    }

    /// Interpret a correlation-id lookup.
    ///
    /// No match means not yet indexed. More than one match is an invariant
    /// violation and is never resolved by picking one.
    pub fn from_matches(
        correlation_id: impl std::fmt::Display,
        mut matches: Vec<T>,
        found_label: &str,
    ) -> Result<Self> {
        match matches.len() {
            0 => Ok(Observation::Absent),
            1 => Ok(Observation::state(found_label, matches.remove(0))),
            n => Err(Error::AmbiguousCorrelation {
                correlation_id: correlation_id.to_string(),
                matches: n,
            }),
        }
    }
}

// =============================================================================
// Delay Policy
// =============================================================================

/// How the wait between probes evolves
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DelayPolicy {
    /// Always wait `delay`
    #[default]
    Fixed,
    /// Start at `delay` and grow by `multiplier`, capped at `max_delay`
    Exponential { multiplier: f64, max_delay: Duration },
}

enum Delays {
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl Delays {
    fn new(policy: DelayPolicy, delay: Duration) -> Self {
        match policy {
            DelayPolicy::Fixed => Delays::Fixed(delay),
            DelayPolicy::Exponential {
                multiplier,
                max_delay,
            } => Delays::Exponential(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(delay)
                    .with_multiplier(multiplier)
                    .with_max_interval(max_delay)
                    .with_randomization_factor(0.0)
                    .with_max_elapsed_time(None)
                    .build(),
            ),
        }
    }

    fn next(&mut self) -> Duration {
        match self {
            Delays::Fixed(delay) => *delay,
            Delays::Exponential(backoff) => backoff.next_backoff().unwrap_or(backoff.max_interval),
        }
    }
}

// =============================================================================
// State Change Configuration
// =============================================================================

/// Parameters of one wait
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeConf {
    /// Name used in logs and errors
    pub action: String,
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    pub delay: Duration,
    /// Floor applied to every wait between probes
    pub min_poll_interval: Duration,
    /// Consecutive absent observations tolerated; `None` means only the
    /// timeout bounds absence
    pub not_found_checks: Option<u32>,
    pub delay_policy: DelayPolicy,
}

impl StateChangeConf {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(60),
            delay: Duration::from_secs(1),
            min_poll_interval: Duration::ZERO,
            not_found_checks: None,
            delay_policy: DelayPolicy::Fixed,
        }
    }

    pub fn pending<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn target(mut self, label: impl Into<String>) -> Self {
        self.target = vec![label.into()];
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = Some(checks);
        self
    }

    pub fn delay_policy(mut self, policy: DelayPolicy) -> Self {
        self.delay_policy = policy;
        self
    }

    fn is_target(&self, label: &str) -> bool {
        self.target.iter().any(|t| t == label)
    }

    fn is_pending(&self, label: &str) -> bool {
        self.pending.iter().any(|p| p == label)
    }

    fn expected(&self) -> Vec<String> {
        self.pending.iter().chain(self.target.iter()).cloned().collect()
    }

    /// Probe until the target label is reported.
    ///
    /// * target label: returns the observed value
    /// * pending label, or a transient error: waits and probes again
    /// * absent: counts against `not_found_checks`, then waits
    /// * any other label, or a non-transient error: fails immediately
    pub async fn wait_for_state<T, F, Fut>(&self, clock: &dyn Clock, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        if self.target.is_empty() {
            return Err(Error::Configuration(format!(
                "wait for {} has no target state",
                self.action
            )));
        }

        let start = clock.now();
        let deadline = start.checked_add(self.timeout).ok_or_else(|| {
            Error::Configuration(format!(
                "wait for {} has an unrepresentable timeout of {:?}",
                self.action, self.timeout
            ))
        })?;
        let mut delays = Delays::new(self.delay_policy, self.delay);
        let mut poll_state = PollState::Pending;
        let mut last_label = PollState::Pending.to_string();
        let mut not_found_ticks: u32 = 0;
        let mut probes: u32 = 0;

        loop {
            probes += 1;

            match probe().await {
                Ok(Observation::State { label, value }) if self.is_target(&label) => {
                    poll_state = PollState::Available;
                    info!(
                        action = %self.action,
                        state = %label,
                        poll_state = %poll_state,
                        probes,
                        elapsed_ms = (clock.now() - start).as_millis() as u64,
                        "Reached target state"
                    );
                    return Ok(value);
                }
                Ok(Observation::State { label, .. }) if self.is_pending(&label) => {
                    not_found_ticks = 0;
                    if poll_state != PollState::Transitioning {
                        debug!(action = %self.action, state = %label, "Resource transitioning");
                    }
                    poll_state = PollState::Transitioning;
                    last_label = label;
                }
                Ok(Observation::State { label, .. }) => {
                    poll_state = PollState::Failed;
                    warn!(
                        action = %self.action,
                        state = %label,
                        poll_state = %poll_state,
                        "Unexpected state"
                    );
                    return Err(Error::UnexpectedState {
                        action: self.action.clone(),
                        state: label,
                        expected: self.expected(),
                    });
                }
                Ok(Observation::Absent) => {
                    not_found_ticks += 1;
                    poll_state = PollState::Pending;
                    if let Some(limit) = self.not_found_checks {
                        if not_found_ticks > limit {
                            poll_state = PollState::Failed;
                            warn!(
                                action = %self.action,
                                checks = not_found_ticks,
                                poll_state = %poll_state,
                                "Resource never became visible"
                            );
                            return Err(Error::ResourceNotFound {
                                kind: self.action.clone(),
                                id: format!("not visible after {} checks", not_found_ticks),
                            });
                        }
                    }
                    debug!(action = %self.action, not_found_ticks, "Resource not visible yet");
                }
                Err(err) if err.is_transient() => {
                    debug!(
                        action = %self.action,
                        error = %err,
                        "Transient probe failure, retrying"
                    );
                    last_label = RETRY_STATE.to_string();
                }
                Err(err) => {
                    poll_state = PollState::Failed;
                    debug!(
                        action = %self.action,
                        poll_state = %poll_state,
                        error = %err,
                        "Probe failed"
                    );
                    return Err(err);
                }
            }

            let now = clock.now();
            if now >= deadline {
                poll_state = PollState::Failed;
                warn!(
                    action = %self.action,
                    state = %last_label,
                    poll_state = %poll_state,
                    probes,
                    "Timed out"
                );
                return Err(Error::Timeout {
                    action: self.action.clone(),
                    last_state: last_label,
                    elapsed: now - start,
                });
            }

            let wait = delays.next().max(self.min_poll_interval).min(deadline - now);
            clock.sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::clock::TokioClock;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Clock that records requested sleeps
    #[derive(Default)]
    struct RecordingClock {
        sleeps: AtomicU32,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        fn now(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
        }
    }

    fn conf() -> StateChangeConf {
        StateChangeConf::new("test")
            .pending(["provisioning"])
            .target("available")
            .timeout(Duration::from_secs(10))
            .delay(Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_target_after_pending() {
        let calls = Arc::new(AtomicU32::new(0));
        let clock = TokioClock;
        let start = clock.now();

        let counter = calls.clone();
        let value = conf()
            .wait_for_state(&clock, move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 3 {
                        Ok(Observation::state("provisioning", n))
                    } else {
                        Ok(Observation::state("available", n))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(clock.now() - start >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_delay() {
        let clock = TokioClock;
        let start = clock.now();

        let err = conf()
            .timeout(Duration::from_millis(200))
            .wait_for_state(&clock, || async { Ok(Observation::state("provisioning", ())) })
            .await
            .unwrap_err();

        let elapsed = clock.now() - start;
        assert_matches!(err, Error::Timeout { ref last_state, .. } if last_state == "provisioning");
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed <= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_correlation_fails_without_sleeping() {
        let clock = RecordingClock::default();
        let calls = AtomicU32::new(0);

        let err = conf()
            .target("complete")
            .pending(["pending"])
            .wait_for_state(&clock, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Observation::from_matches(77, vec![1, 2], "complete") }
            })
            .await
            .unwrap_err();

        assert_matches!(err, Error::AmbiguousCorrelation { matches: 2, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_grace_exhausted() {
        let clock = TokioClock;
        let calls = AtomicU32::new(0);

        let err = conf()
            .not_found_checks(3)
            .wait_for_state(&clock, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Observation::<()>::Absent) }
            })
            .await
            .unwrap_err();

        assert_matches!(err, Error::ResourceNotFound { .. });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_before_grace() {
        let clock = TokioClock;

        let err = conf()
            .timeout(Duration::from_millis(100))
            .not_found_checks(300)
            .wait_for_state(&clock, || async { Ok(Observation::<()>::Absent) })
            .await
            .unwrap_err();

        assert_matches!(err, Error::Timeout { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_resets_when_resource_seen() {
        let clock = TokioClock;
        let calls = AtomicU32::new(0);

        // absent, absent, pending, absent, absent, available
        let value = conf()
            .not_found_checks(2)
            .wait_for_state(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 | 1 | 3 | 4 => Ok(Observation::Absent),
                        2 => Ok(Observation::state("provisioning", n)),
                        _ => Ok(Observation::state("available", n)),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let clock = TokioClock;
        let calls = AtomicU32::new(0);

        let value = conf()
            .wait_for_state(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::BackendUnavailable {
                            backend: "test".into(),
                            reason: "503".into(),
                        })
                    } else {
                        Ok(Observation::state("available", "done"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_error_aborts() {
        let clock = RecordingClock::default();

        let err = conf()
            .wait_for_state(&clock, || async {
                Err::<Observation<()>, _>(Error::Backend {
                    backend: "test".into(),
                    operation: "getObject".into(),
                    message: "404".into(),
                })
            })
            .await
            .unwrap_err();

        assert_matches!(err, Error::Backend { .. });
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_is_a_configuration_error() {
        let clock = RecordingClock::default();
        let calls = AtomicU32::new(0);

        let err = conf()
            .timeout(Duration::MAX)
            .wait_for_state(&clock, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Observation::state("available", 1))
            })
            .await
            .unwrap_err();

        assert_matches!(err, Error::Configuration(_));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state_aborts() {
        let clock = TokioClock;

        let err = conf()
            .wait_for_state(&clock, || async { Ok(Observation::state("deleting", ())) })
            .await
            .unwrap_err();

        assert_matches!(err, Error::UnexpectedState { ref state, .. } if state == "deleting");
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_poll_interval_floors_delay() {
        let clock = TokioClock;
        let start = clock.now();
        let calls = AtomicU32::new(0);

        conf()
            .delay(Duration::from_millis(1))
            .min_poll_interval(Duration::from_millis(100))
            .wait_for_state(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(Observation::state("provisioning", ()))
                    } else {
                        Ok(Observation::state("available", ()))
                    }
                }
            })
            .await
            .unwrap();

        assert!(clock.now() - start >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays_grow() {
        let clock = TokioClock;
        let start = clock.now();
        let calls = AtomicU32::new(0);

        conf()
            .delay(Duration::from_millis(100))
            .delay_policy(DelayPolicy::Exponential {
                multiplier: 2.0,
                max_delay: Duration::from_secs(1),
            })
            .wait_for_state(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Ok(Observation::state("provisioning", ()))
                    } else {
                        Ok(Observation::state("available", ()))
                    }
                }
            })
            .await
            .unwrap();

        // 100 + 200 + 400
        assert!(clock.now() - start >= Duration::from_millis(700));
    }

    #[test]
    fn test_from_matches() {
        assert_eq!(
            Observation::<u32>::from_matches(1, vec![], "complete").unwrap(),
            Observation::Absent
        );
        assert_eq!(
            Observation::from_matches(1, vec![9], "complete").unwrap(),
            Observation::state("complete", 9)
        );
        assert!(Observation::from_matches(1, vec![9, 10], "complete").is_err());
    }
}
