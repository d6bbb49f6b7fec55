//! Policy lifecycle tests: registration from Pending to Active, and
//! retraction ordered before finalizer clearance.
//!
//! The phase and requeue decisions come from the production
//! `evaluate_policy_converge`; only the cluster is mocked.

use std::time::Duration;

use kube::runtime::controller::Action;

use admission_operator::admission::AdmissionBackend;
use admission_operator::controller::policy::evaluate_policy_converge;
use admission_operator::crd::{PolicyPhase, PolicyResource};

use crate::mock_backend::{MockBackend, cluster_policy, namespaced_policy};

/// A policy referencing a ready server reaches Active within two attempts
/// and produces exactly one registration entry.
#[tokio::test]
async fn test_policy_activates_within_two_attempts() {
    let backend = MockBackend::new();
    let policy = namespaced_policy("p1", "team-a", "s1").to_any();

    // First attempt: the server has not rolled out yet.
    let outcome = backend.converge_policy(&policy).await;
    let (result, phase, _) = evaluate_policy_converge("p1", outcome, Some(1));
    assert!(result.is_ok(), "not-ready must not surface as an error");
    assert_eq!(phase, PolicyPhase::Pending);
    assert_eq!(backend.registration_count(), 0);

    // The rollout completes between attempts.
    backend.set_server_ready("s1");

    // Second attempt: registered and Active.
    let outcome = backend.converge_policy(&policy).await;
    let (result, phase, _) = evaluate_policy_converge("p1", outcome, Some(1));
    assert!(result.is_ok());
    assert_eq!(phase, PolicyPhase::Active);
    assert_eq!(backend.registration_count(), 1);
    assert!(backend.has_registration(&policy.registration_name()));
}

/// Not-ready yields exactly {requeue: true, requeueAfter: 5s}, outer error
/// nil.
#[tokio::test]
async fn test_not_ready_requeue_is_exactly_five_seconds() {
    let backend = MockBackend::new();
    let policy = namespaced_policy("p1", "team-a", "s1").to_any();

    let outcome = backend.converge_policy(&policy).await;
    let (result, _, _) = evaluate_policy_converge("p1", outcome, Some(1));
    assert_eq!(
        result.expect("not-ready is not an error"),
        Action::requeue(Duration::from_secs(5))
    );
}

/// Re-running a converged policy keeps exactly one registration entry.
#[tokio::test]
async fn test_reconverge_is_idempotent() {
    let backend = MockBackend::new();
    backend.set_server_ready("s1");
    let policy = cluster_policy("psa-enforce", "s1").to_any();

    for _ in 0..3 {
        backend
            .converge_policy(&policy)
            .await
            .expect("converge should succeed");
    }
    assert_eq!(backend.registration_count(), 1);
}

/// A cluster policy and a namespaced policy sharing a name register under
/// distinct entries.
#[tokio::test]
async fn test_same_name_across_scopes_registers_twice() {
    let backend = MockBackend::new();
    backend.set_server_ready("s1");

    let namespaced = namespaced_policy("p1", "team-a", "s1").to_any();
    let cluster = cluster_policy("p1", "s1").to_any();

    backend.converge_policy(&namespaced).await.expect("converge");
    backend.converge_policy(&cluster).await.expect("converge");

    assert_eq!(backend.registration_count(), 2);
}

/// Deleting an active policy removes its registration entry; only after
/// confirmed removal may the finalizer be cleared.
#[tokio::test]
async fn test_retraction_confirmed_before_finalizer_clearance() {
    let backend = MockBackend::new();
    backend.set_server_ready("s1");
    let policy = namespaced_policy("p1", "team-a", "s1").to_any();

    backend.converge_policy(&policy).await.expect("converge");
    assert_eq!(backend.registration_count(), 1);

    backend.retract_policy(&policy).await.expect("retract");
    assert_eq!(backend.registration_count(), 0);

    let calls = backend.calls();
    assert_eq!(calls.last().map(String::as_str), Some("retract_policy:p1"));
}

/// A failed retraction surfaces an error; the registration stays and the
/// finalizer must not be cleared on this attempt.
#[tokio::test]
async fn test_failed_retraction_keeps_registration() {
    let backend = MockBackend::new();
    backend.set_server_ready("s1");
    let policy = namespaced_policy("p1", "team-a", "s1").to_any();

    backend.converge_policy(&policy).await.expect("converge");
    backend.fail_next_retract();

    let result = backend.retract_policy(&policy).await;
    assert!(result.is_err(), "store outage must surface");
    assert!(
        backend.has_registration(&policy.registration_name()),
        "a failed retraction must leave the entry for the retry"
    );

    // The retry confirms removal.
    backend.retract_policy(&policy).await.expect("retry");
    assert_eq!(backend.registration_count(), 0);
}

/// Retracting a policy whose registration is already gone is not a failure.
#[tokio::test]
async fn test_retracting_absent_registration_succeeds() {
    let backend = MockBackend::new();
    let policy = namespaced_policy("p1", "team-a", "s1").to_any();

    backend
        .retract_policy(&policy)
        .await
        .expect("absent entry counts as confirmed removal");
}
