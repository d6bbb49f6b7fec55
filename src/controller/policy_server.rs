//! Reconciliation loop for PolicyServer.
//!
//! Convergence delegates to the admission backend; deletion is ordered by
//! the finalizer protocol: every non-terminating dependent policy is deleted
//! first, teardown runs only once zero dependents remain, and the finalizer
//! is cleared last.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{DeleteParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    admission::ConvergeError,
    controller::{
        context::Context,
        error::{is_api_not_found, Error},
        finalizers,
        status::ConditionBuilder,
    },
    crd::{AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, Condition, PolicyServer, PolicyServerStatus},
    naming::FIELD_MANAGER,
};

/// Fixed delay applied while dependent infrastructure is rolling out
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(5);

/// Periodic resync interval for converged servers
const RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Reconcile a PolicyServer
///
/// This is the main reconciliation function called by the controller. It
/// handles the full lifecycle: creation, updates, and finalizer-ordered
/// deletion.
pub async fn reconcile(obj: Arc<PolicyServer>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    debug!(name = %name, "Reconciling PolicyServer");

    let api: Api<PolicyServer> = Api::all(ctx.client.clone());

    let server = match api.get(&name).await {
        Ok(server) => server,
        Err(e) if is_api_not_found(&e) => {
            debug!(name = %name, "PolicyServer already deleted");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    let policies = ctx.index.policies_referencing(&name);

    if server.metadata.deletion_timestamp.is_some() {
        return reconcile_deletion(&api, &server, &policies, &ctx).await;
    }

    if !finalizers::has_finalizer(&server) {
        info!(name = %name, "Adding finalizer");
        finalizers::ensure(&api, &server).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let generation = server.metadata.generation;
    let outcome = ctx.backend.converge_server(&server, &policies).await;
    if let Err(e) = &outcome {
        if !e.is_not_ready() {
            ctx.publish_warning_event(&server, "ReconcileFailed", "Converging", Some(e.to_string()))
                .await;
        }
    }
    let (result, conditions) = evaluate_converge(&name, outcome, generation);

    // The status subresource is persisted regardless of the convergence
    // outcome, so the next observer sees this attempt's result.
    write_status(&api, &name, conditions, generation).await?;

    if let Some(health_state) = &ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile("PolicyServer", &name, duration);
    }

    result
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<PolicyServer>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(health_state) = &ctx.health_state {
        health_state.metrics.record_error("PolicyServer", &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "PolicyServer not found (likely deleted)");
        return Action::await_change();
    }

    warn!(name = %name, error = %error, "Reconciliation failed, backing off");
    Action::requeue(error.requeue_after())
}

/// Map a convergence outcome onto the requeue instruction and the
/// conditions to persist.
///
/// Not-ready is an expected state during infrastructure rollout: it yields
/// a fixed-delay requeue and no error. Everything else is surfaced for the
/// scheduler's default backoff.
pub fn evaluate_converge(
    name: &str,
    outcome: Result<(), ConvergeError>,
    generation: Option<i64>,
) -> (Result<Action, Error>, Vec<Condition>) {
    match outcome {
        Ok(()) => (
            Ok(Action::requeue(RESYNC_PERIOD)),
            ConditionBuilder::new()
                .ready(true, "InfrastructureReady", "Policy server is serving", generation)
                .progressing(false, "Reconciled", "Infrastructure converged", generation)
                .build(),
        ),
        Err(e) if e.is_not_ready() => {
            info!(name = %name, "Delaying convergence since policy server is not yet ready");
            (
                Ok(Action::requeue(NOT_READY_REQUEUE)),
                ConditionBuilder::new()
                    .ready(false, "RolloutInProgress", "Deployment is rolling out", generation)
                    .progressing(true, "RolloutInProgress", "Waiting for ready replicas", generation)
                    .build(),
            )
        }
        Err(e) => {
            let message = e.to_string();
            (
                Err(Error::Converge(e)),
                ConditionBuilder::new()
                    .ready(false, "ReconciliationFailed", &message, generation)
                    .degraded(true, "ReconciliationFailed", &message, generation)
                    .build(),
            )
        }
    }
}

/// What the deletion branch must do next.
pub enum DeletionStep<'a> {
    /// Dependents still reference the server; delete the listed ones (those
    /// not already terminating) and requeue.
    RemoveDependents(Vec<&'a AnyPolicy>),
    /// No dependents remain; tear down and clear the finalizer.
    TearDown,
}

/// Decide the next deletion step from the current dependents.
///
/// Teardown is reachable only with zero dependents; a non-empty list whose
/// members are all already terminating still waits.
pub fn deletion_step(policies: &[AnyPolicy]) -> DeletionStep<'_> {
    if policies.is_empty() {
        DeletionStep::TearDown
    } else {
        DeletionStep::RemoveDependents(
            policies.iter().filter(|p| !p.is_terminating()).collect(),
        )
    }
}

/// Drop delete outcomes that count as success (done, or already gone).
pub fn cleanup_failures(results: Vec<Result<(), kube::Error>>) -> Vec<kube::Error> {
    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(()) => None,
            Err(e) if is_api_not_found(&e) => None,
            Err(e) => Some(e),
        })
        .collect()
}

async fn reconcile_deletion(
    api: &Api<PolicyServer>,
    server: &PolicyServer,
    policies: &[AnyPolicy],
    ctx: &Context,
) -> Result<Action, Error> {
    let name = server.name_any();

    match deletion_step(policies) {
        DeletionStep::RemoveDependents(to_delete) => {
            debug!(
                name = %name,
                dependents = policies.len(),
                deleting = to_delete.len(),
                "PolicyServer still has bound policies, deleting them first"
            );
            let mut results = Vec::with_capacity(to_delete.len());
            for policy in to_delete {
                results.push(delete_policy(&ctx.client, policy).await);
            }
            let failures = cleanup_failures(results);
            if !failures.is_empty() {
                error!(
                    name = %name,
                    failed = failures.len(),
                    "Could not remove all policies bound to policy server"
                );
                return Err(Error::DependentCleanup {
                    server: name,
                    errors: failures,
                });
            }
            // At least one more attempt after the dependents finish
            // terminating.
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        DeletionStep::TearDown => {
            ctx.backend
                .tear_down_server(server)
                .await
                .map_err(Error::Converge)?;
            ctx.publish_normal_event(server, "Deleted", "Terminating", None).await;
            finalizers::remove(api, &name).await?;
            info!(name = %name, "PolicyServer cleanup complete, finalizer removed");
            Ok(Action::await_change())
        }
    }
}

async fn delete_policy(client: &kube::Client, policy: &AnyPolicy) -> Result<(), kube::Error> {
    match policy {
        AnyPolicy::Namespaced(p) => {
            let api: Api<AdmissionPolicy> =
                Api::namespaced(client.clone(), &p.namespace().unwrap_or_default());
            api.delete(&p.name_any(), &DeleteParams::default())
                .await
                .map(|_| ())
        }
        AnyPolicy::Cluster(p) => {
            let api: Api<ClusterAdmissionPolicy> = Api::all(client.clone());
            api.delete(&p.name_any(), &DeleteParams::default())
                .await
                .map(|_| ())
        }
    }
}

async fn write_status(
    api: &Api<PolicyServer>,
    name: &str,
    conditions: Vec<Condition>,
    generation: Option<i64>,
) -> Result<(), Error> {
    let status = PolicyServerStatus {
        conditions,
        observed_generation: generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
