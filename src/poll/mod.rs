//! Long-running operation polling
//!
//! Mutating Prism, Karbon and Foundation calls hand back an operation handle
//! (a task UUID, an imaging session, an imaged-cluster UUID). [`StateChangeConf`]
//! polls such a handle through a caller-supplied refresh function until the
//! reported state is terminal or the wall-clock budget runs out.
//!
//! # Outcomes
//!
//! - state in `target` -> `Ok(payload)`
//! - refresh error -> that error, immediately
//! - state in neither `pending` nor `target` -> [`ProviderError::OperationFailed`]
//!   with the payload's status messages
//! - too many consecutive missing payloads -> [`ProviderError::NotFound`]
//! - deadline passed -> [`ProviderError::Timeout`]
//!
//! Unknown states are always terminal. Refresh functions are responsible for
//! mapping the remote vocabulary onto `pending`/`target` explicitly.
//!
//! # Example
//!
//! ```ignore
//! let task = StateChangeConf::new("task 1234")
//!     .pending(&["QUEUED", "RUNNING"])
//!     .target(&["SUCCEEDED"])
//!     .timing(&settings.vm)
//!     .wait_for_state(|| task_state_refresh(&client, "1234"))
//!     .await?;
//! ```

mod settings;

pub use settings::{PollSettings, PollTiming};

use crate::error::{ProviderError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// First wait between refreshes before doubling kicks in
const INITIAL_WAIT: Duration = Duration::from_millis(100);

/// Upper bound of the doubling schedule (`min_interval` may exceed it)
const MAX_BACKOFF_WAIT: Duration = Duration::from_secs(10);

/// Default number of consecutive missing payloads tolerated
const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// Status messages carried by a polled payload, used to explain a failure
pub trait StatusMessages {
    fn status_messages(&self) -> Vec<String> {
        Vec::new()
    }
}

impl StatusMessages for serde_json::Value {
    fn status_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if let Some(list) = self.get("message_list").and_then(|v| v.as_array()) {
            for item in list {
                if let Some(message) = item.get("message").and_then(|v| v.as_str()) {
                    messages.push(message.to_string());
                }
            }
        }
        if let Some(detail) = self.get("error_detail").and_then(|v| v.as_str()) {
            messages.push(detail.to_string());
        }
        messages
    }
}

/// Result of one refresh call
#[derive(Debug, Clone)]
pub struct Observation<T> {
    pub payload: Option<T>,
    pub state: String,
}

impl<T> Observation<T> {
    pub fn new(payload: T, state: impl Into<String>) -> Self {
        Self {
            payload: Some(payload),
            state: state.into(),
        }
    }

    /// The handle did not resolve to anything yet
    pub fn missing() -> Self {
        Self {
            payload: None,
            state: String::new(),
        }
    }

    /// A terminal state with nothing to report back
    pub fn terminal(state: impl Into<String>) -> Self {
        Self {
            payload: None,
            state: state.into(),
        }
    }
}

/// Configuration of one wait, mirroring what each lifecycle handler needs
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// Used in errors and logs, e.g. "task 3f2a... (create vm)"
    pub operation: String,
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Sleep before the first refresh
    pub delay: Duration,
    /// Lower bound between two refreshes
    pub min_interval: Duration,
    /// Fixed spacing between refreshes, replaces the doubling schedule
    pub poll_interval: Option<Duration>,
    pub not_found_checks: u32,
    pub continuous_target_occurrence: u32,
}

impl StateChangeConf {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(600),
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurrence: 1,
        }
    }

    pub fn pending(mut self, states: &[&str]) -> Self {
        self.pending = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn target(mut self, states: &[&str]) -> Self {
        self.target = states.iter().map(|s| s.to_string()).collect();
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

    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    /// Apply delay, minimum interval and timeout from a configured timing
    pub fn timing(self, timing: &PollTiming) -> Self {
        self.delay(timing.delay)
            .min_interval(timing.min_interval)
            .timeout(timing.timeout)
    }

    /// Poll until the operation reaches a target state
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<T>
    where
        T: StatusMessages,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        tracing::debug!(
            "Waiting for {} (pending: {:?}, target: {:?}, timeout: {:?})",
            self.operation,
            self.pending,
            self.target,
            self.timeout
        );

        let mut last_state: Option<String> = None;
        let outcome =
            tokio::time::timeout(self.timeout, self.poll(&mut refresh, &mut last_state)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Timed out after {:?} waiting for {} (last state: {:?})",
                    self.timeout,
                    self.operation,
                    last_state
                );
                Err(ProviderError::Timeout {
                    operation: self.operation.clone(),
                    timeout: self.timeout,
                    last_state,
                })
            }
        }
    }

    async fn poll<T, F, Fut>(&self, refresh: &mut F, last_state: &mut Option<String>) -> Result<T>
    where
        T: StatusMessages,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut wait = INITIAL_WAIT;
        let mut not_found = 0u32;
        let mut target_seen = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let observation = refresh().await?;
            let state = observation.state;
            tracing::debug!("{}: attempt {} observed state {:?}", self.operation, attempt, state);
            *last_state = Some(state.clone());

            let is_target = self.target.iter().any(|t| *t == state);
            let is_pending = self.pending.iter().any(|p| *p == state);

            // Only a payload-less, stateless observation counts as not found
            let missing = observation.payload.is_none() && state.is_empty();

            if !missing && !is_target && !is_pending {
                let messages = observation
                    .payload
                    .as_ref()
                    .map(|payload| payload.status_messages())
                    .unwrap_or_default();
                return Err(ProviderError::OperationFailed {
                    operation: self.operation.clone(),
                    state,
                    messages,
                });
            }

            match observation.payload {
                None => {
                    target_seen = 0;
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(ProviderError::not_found("operation", &self.operation));
                    }
                }
                Some(payload) => {
                    not_found = 0;
                    if is_target {
                        target_seen += 1;
                        if target_seen >= self.continuous_target_occurrence {
                            return Ok(payload);
                        }
                    } else {
                        target_seen = 0;
                    }
                }
            }

            wait = self.next_wait(wait, target_seen > 0);
            sleep(wait).await;
        }
    }

    /// Spacing before the next refresh
    fn next_wait(&self, previous: Duration, target_seen: bool) -> Duration {
        let wait = if target_seen { previous } else { previous * 2 };

        if let Some(interval) = self.poll_interval {
            return interval;
        }
        if wait < self.min_interval {
            self.min_interval
        } else if wait > MAX_BACKOFF_WAIT {
            MAX_BACKOFF_WAIT.max(self.min_interval)
        } else {
            wait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::ready;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    struct Task {
        seq: u32,
        message: String,
    }

    impl StatusMessages for Task {
        fn status_messages(&self) -> Vec<String> {
            if self.message.is_empty() {
                Vec::new()
            } else {
                vec![self.message.clone()]
            }
        }
    }

    fn task(seq: u32, state: &str) -> Result<Observation<Task>> {
        Ok(Observation::new(
            Task {
                seq,
                message: String::new(),
            },
            state,
        ))
    }

    fn task_conf() -> StateChangeConf {
        StateChangeConf::new("task test")
            .pending(&["QUEUED", "RUNNING"])
            .target(&["SUCCEEDED"])
            .timeout(Duration::from_secs(60))
            .min_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_succeeded_returns_last_payload() {
        let mut script: VecDeque<_> =
            vec![task(1, "QUEUED"), task(2, "RUNNING"), task(3, "SUCCEEDED")].into();
        let mut calls = 0;

        let result = task_conf()
            .wait_for_state(|| {
                calls += 1;
                ready(script.pop_front().expect("refresh called after terminal state"))
            })
            .await
            .unwrap();

        assert_eq!(result.seq, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_reports_payload_messages() {
        let mut script: VecDeque<_> = vec![
            task(1, "RUNNING"),
            Ok(Observation::new(
                Task {
                    seq: 2,
                    message: "disk image not reachable".to_string(),
                },
                "FAILED",
            )),
        ]
        .into();
        let mut calls = 0;

        let err = task_conf()
            .wait_for_state(|| {
                calls += 1;
                ready(script.pop_front().expect("refresh called after failure"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 2);
        match err {
            ProviderError::OperationFailed {
                state, messages, ..
            } => {
                assert_eq!(state, "FAILED");
                assert_eq!(messages, vec!["disk image not reachable".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_is_returned_immediately() {
        let mut calls = 0;
        let err = task_conf()
            .wait_for_state(|| {
                calls += 1;
                ready(Err::<Observation<Task>, _>(ProviderError::Api {
                    status: 500,
                    message: "internal".to_string(),
                }))
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, ProviderError::Api { status: 500, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_longer_than_timeout_times_out_without_refresh() {
        let mut calls = 0;
        let err = task_conf()
            .timeout(Duration::from_secs(1))
            .delay(Duration::from_secs(2))
            .wait_for_state(|| {
                calls += 1;
                ready(task(calls, "RUNNING"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 0);
        match err {
            ProviderError::Timeout { last_state, .. } => assert!(last_state.is_none()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_pending_times_out_with_last_state() {
        let err = task_conf()
            .timeout(Duration::from_secs(30))
            .wait_for_state(|| ready(task(0, "RUNNING")))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        match err {
            ProviderError::Timeout { last_state, .. } => {
                assert_eq!(last_state.as_deref(), Some("RUNNING"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_refreshes() {
        let mut seen = Vec::new();
        let mut script: VecDeque<_> = (1..=6)
            .map(|i| task(i, if i < 6 { "RUNNING" } else { "SUCCEEDED" }))
            .collect();

        task_conf()
            .min_interval(Duration::from_secs(3))
            .wait_for_state(|| {
                seen.push(Instant::now());
                ready(script.pop_front().expect("script exhausted"))
            })
            .await
            .unwrap();

        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_payload_gives_up_after_not_found_checks() {
        let mut calls = 0;
        let err = task_conf()
            .not_found_checks(2)
            .wait_for_state(|| {
                calls += 1;
                ready(Ok(Observation::<Task>::missing()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 3);
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_state_with_payload_is_terminal() {
        let mut calls = 0;
        let err = task_conf()
            .wait_for_state(|| {
                calls += 1;
                ready(task(1, ""))
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        match err {
            ProviderError::OperationFailed { state, .. } => assert_eq!(state, ""),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_target_occurrence() {
        let mut script: VecDeque<_> = vec![
            task(1, "SUCCEEDED"),
            task(2, "RUNNING"),
            task(3, "SUCCEEDED"),
            task(4, "SUCCEEDED"),
        ]
        .into();

        let result = task_conf()
            .continuous_target_occurrence(2)
            .wait_for_state(|| ready(script.pop_front().expect("script exhausted")))
            .await
            .unwrap();

        assert_eq!(result.seq, 4);
    }

    #[test]
    fn test_next_wait_doubles_and_caps() {
        let conf = StateChangeConf::new("backoff");
        assert_eq!(conf.next_wait(INITIAL_WAIT, false), Duration::from_millis(200));
        assert_eq!(conf.next_wait(Duration::from_secs(8), false), MAX_BACKOFF_WAIT);
        assert_eq!(conf.next_wait(Duration::from_secs(1), true), Duration::from_secs(1));
    }

    #[test]
    fn test_next_wait_min_interval_beats_cap() {
        let conf = StateChangeConf::new("imaging").min_interval(Duration::from_secs(300));
        assert_eq!(conf.next_wait(INITIAL_WAIT, false), Duration::from_secs(300));
        assert_eq!(conf.next_wait(Duration::from_secs(300), false), Duration::from_secs(300));
    }

    #[test]
    fn test_poll_interval_overrides_schedule() {
        let conf = StateChangeConf::new("fixed").poll_interval(Duration::from_millis(50));
        assert_eq!(conf.next_wait(Duration::from_secs(5), false), Duration::from_millis(50));
    }

    #[test]
    fn test_json_status_messages() {
        let value = serde_json::json!({
            "message_list": [{"message": "bad spec", "reason": "INVALID"}],
            "error_detail": "task failed"
        });
        assert_eq!(
            value.status_messages(),
            vec!["bad spec".to_string(), "task failed".to_string()]
        );
    }
}
