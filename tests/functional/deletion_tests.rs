//! PolicyServer deletion-ordering tests.
//!
//! Teardown is gated on zero dependents; dependent delete failures other
//! than NotFound block finalizer removal. The step decisions come from the
//! production `deletion_step` and `cleanup_failures`.

use std::time::Duration;

use kube::core::ErrorResponse;
use kube::runtime::controller::Action;

use admission_operator::admission::AdmissionBackend;
use admission_operator::controller::policy_server::{
    DeletionStep, cleanup_failures, deletion_step, evaluate_converge,
};
use admission_operator::crd::{AnyPolicy, PolicyResource};

use crate::mock_backend::{MockBackend, mark_terminating, namespaced_policy, policy_server};

fn active(name: &str) -> AnyPolicy {
    namespaced_policy(name, "team-a", "s1").to_any()
}

fn terminating(name: &str) -> AnyPolicy {
    let mut policy = namespaced_policy(name, "team-a", "s1");
    mark_terminating(&mut policy);
    policy.to_any()
}

fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: String::new(),
        reason: String::new(),
        code,
    })
}

/// With N>0 non-terminating dependents the teardown routine never runs.
#[tokio::test]
async fn test_teardown_never_runs_with_dependents() {
    let backend = MockBackend::new();
    let dependents = vec![active("a"), active("b")];

    match deletion_step(&dependents) {
        DeletionStep::RemoveDependents(to_delete) => assert_eq!(to_delete.len(), 2),
        DeletionStep::TearDown => panic!("teardown must wait for dependents"),
    }
    assert_eq!(backend.teardown_count(), 0);
}

/// Deleting a server with 2 active and 1 terminating dependent issues
/// deletes for exactly the 2 active ones.
#[test]
fn test_two_active_one_terminating_deletes_exactly_two() {
    let dependents = vec![active("a"), terminating("b"), active("c")];

    match deletion_step(&dependents) {
        DeletionStep::RemoveDependents(to_delete) => {
            let mut names: Vec<_> = to_delete.iter().map(|p| p.name()).collect();
            names.sort();
            assert_eq!(names, vec!["a", "c"]);
        }
        DeletionStep::TearDown => panic!("dependents still present"),
    }
}

/// Dependents that are all already terminating still block teardown; the
/// attempt issues no deletes and waits.
#[test]
fn test_all_terminating_dependents_still_block_teardown() {
    let dependents = vec![terminating("a"), terminating("b")];

    match deletion_step(&dependents) {
        DeletionStep::RemoveDependents(to_delete) => assert!(to_delete.is_empty()),
        DeletionStep::TearDown => panic!("teardown must wait until dependents are gone"),
    }
}

/// A NotFound delete result does not abort processing of the rest; with no
/// other failures the attempt proceeds.
#[test]
fn test_not_found_deletes_do_not_block() {
    let failures = cleanup_failures(vec![Ok(()), Err(api_error(404)), Ok(())]);
    assert!(failures.is_empty());
}

/// At least one non-NotFound failure keeps the finalizer: the failures are
/// aggregated and the attempt is surfaced.
#[test]
fn test_real_failure_blocks_finalizer_removal() {
    let failures = cleanup_failures(vec![
        Ok(()),
        Err(api_error(404)),
        Err(api_error(500)),
    ]);
    assert_eq!(failures.len(), 1);
}

/// Once the dependent set is empty, teardown runs and the finalizer may be
/// cleared.
#[tokio::test]
async fn test_empty_dependents_reach_teardown() {
    let backend = MockBackend::new();
    let server = policy_server("s1");

    assert!(matches!(deletion_step(&[]), DeletionStep::TearDown));
    backend
        .tear_down_server(&server)
        .await
        .expect("teardown should succeed");
    assert_eq!(backend.teardown_count(), 1);
}

/// Server convergence reports not-ready until the rollout completes; the
/// requeue is the fixed 5-second delay, not an error.
#[tokio::test]
async fn test_server_not_ready_until_rollout_completes() {
    let backend = MockBackend::new();
    let server = policy_server("s1");

    let outcome = backend.converge_server(&server, &[]).await;
    let (result, _) = evaluate_converge("s1", outcome, Some(1));
    assert_eq!(
        result.expect("not-ready is not an error"),
        Action::requeue(Duration::from_secs(5))
    );

    backend.set_server_ready("s1");
    let outcome = backend.converge_server(&server, &[]).await;
    let (result, _) = evaluate_converge("s1", outcome, Some(1));
    assert!(result.is_ok());
}
