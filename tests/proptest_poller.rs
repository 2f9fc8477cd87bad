//! Property-based tests using proptest
//!
//! These tests verify the poller's outcome rules and the status
//! classification of polled payloads using randomized state sequences.

use ntnx::client::foundation::{ClusterProgress, ImagingProgress, NodeProgress};
use ntnx::poll::{Observation, StateChangeConf, StatusMessages};
use ntnx::ProviderError;
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::ready;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Step {
    seq: usize,
    state: String,
}

impl StatusMessages for Step {
    fn status_messages(&self) -> Vec<String> {
        vec![format!("step {} ended in {}", self.seq, self.state)]
    }
}

/// Paused-clock runtime so long timeouts cost nothing
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

fn conf() -> StateChangeConf {
    StateChangeConf::new("property task")
        .pending(&["QUEUED", "RUNNING"])
        .target(&["SUCCEEDED"])
        .timeout(Duration::from_secs(3600))
        .min_interval(Duration::from_secs(1))
}

fn arb_pending() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop_oneof![Just("QUEUED"), Just("RUNNING")], 0..20)
}

fn arb_terminal() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("SUCCEEDED"),
        Just("FAILED"),
        Just("ABORTED"),
        Just("INVALID_UUID"),
        Just("kSucceeded"),
    ]
}

/// Run a scripted sequence, returning the outcome, the call count and the call instants
fn run_script(states: Vec<String>) -> (ntnx::Result<Step>, usize, Vec<Instant>) {
    let script: RefCell<VecDeque<Step>> = RefCell::new(
        states
            .into_iter()
            .enumerate()
            .map(|(seq, state)| Step { seq, state })
            .collect(),
    );
    let calls = RefCell::new(Vec::new());

    let outcome = runtime().block_on(conf().wait_for_state(|| {
        calls.borrow_mut().push(Instant::now());
        let step = script
            .borrow_mut()
            .pop_front()
            .expect("refresh called after a terminal state");
        let state = step.state.clone();
        ready(Ok(Observation::new(step, state)))
    }));

    let calls = calls.into_inner();
    (outcome, calls.len(), calls)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Test the first non-pending state decides the outcome and stops polling
    #[test]
    fn first_terminal_state_decides(pending in arb_pending(), terminal in arb_terminal()) {
        let mut states: Vec<String> = pending.iter().map(|s| s.to_string()).collect();
        states.push(terminal.to_string());
        let expected_calls = states.len();

        let (outcome, calls, _) = run_script(states);

        prop_assert_eq!(calls, expected_calls);
        match outcome {
            Ok(step) => {
                prop_assert_eq!(terminal, "SUCCEEDED");
                prop_assert_eq!(step.seq, expected_calls - 1);
            }
            Err(ProviderError::OperationFailed { state, messages, .. }) => {
                prop_assert_ne!(terminal, "SUCCEEDED");
                prop_assert_eq!(state.as_str(), terminal);
                prop_assert_eq!(messages.len(), 1);
                prop_assert!(messages[0].contains(terminal));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Test refreshes are never closer together than min_interval
    #[test]
    fn refreshes_respect_min_interval(pending in arb_pending()) {
        let mut states: Vec<String> = pending.iter().map(|s| s.to_string()).collect();
        states.push("SUCCEEDED".to_string());

        let (outcome, _, instants) = run_script(states);

        prop_assert!(outcome.is_ok());
        for pair in instants.windows(2) {
            prop_assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    /// Test an operation that never leaves pending times out, never fails
    #[test]
    fn always_pending_times_out(timeout_secs in 1u64..600, state in prop_oneof![Just("QUEUED"), Just("RUNNING")]) {
        let outcome = runtime().block_on(
            conf()
                .timeout(Duration::from_secs(timeout_secs))
                .wait_for_state(|| ready(Ok(Observation::new(Step { seq: 0, state: state.to_string() }, state)))),
        );

        match outcome {
            Err(ProviderError::Timeout { last_state, timeout, .. }) => {
                prop_assert_eq!(last_state.as_deref(), Some(state));
                prop_assert_eq!(timeout, Duration::from_secs(timeout_secs));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
            Ok(_) => prop_assert!(false, "pending operation cannot succeed"),
        }
    }
}

fn arb_node() -> impl Strategy<Value = NodeProgress> {
    (
        prop_oneof![
            Just("Imaging in progress"),
            Just("Completed"),
            Just("Imaging failed"),
            Just("FATAL: phoenix crashed"),
        ],
        0.0f64..=100.0,
    )
        .prop_map(|(status, percent)| NodeProgress {
            hypervisor_ip: Some("10.0.0.21".to_string()),
            status: status.to_string(),
            percent_complete: percent,
            ..Default::default()
        })
}

proptest! {
    /// Test a single failed node or cluster makes the whole session FAILED
    #[test]
    fn any_failed_item_fails_imaging(
        nodes in prop::collection::vec(arb_node(), 1..8),
        aggregate in 0.0f64..=100.0,
        cluster_failed in any::<bool>(),
    ) {
        let progress = ImagingProgress {
            aggregate_percent_complete: aggregate,
            nodes: nodes.clone(),
            clusters: vec![ClusterProgress {
                cluster_name: Some("edge".to_string()),
                status: if cluster_failed { "Cluster creation failed" } else { "Creating" }.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let failed_nodes = nodes
            .iter()
            .filter(|n| {
                let status = n.status.to_ascii_lowercase();
                status.contains("fail") || status.contains("fatal")
            })
            .count();

        if failed_nodes > 0 || cluster_failed {
            prop_assert_eq!(progress.state(), "FAILED");
            prop_assert_eq!(
                progress.status_messages().len(),
                failed_nodes + usize::from(cluster_failed)
            );
        } else if aggregate >= 100.0 {
            prop_assert_eq!(progress.state(), "COMPLETED");
        } else {
            prop_assert_eq!(progress.state(), "PENDING");
        }
    }
}
