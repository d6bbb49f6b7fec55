//! Reconciliation loop shared by both policy variants.
//!
//! One routine serves AdmissionPolicy and ClusterAdmissionPolicy through the
//! [`PolicyResource`] trait. A policy converges by registering itself with
//! the admission machinery of its policy server; it is torn down by
//! retracting that registration before its finalizer is cleared.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, Resource, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, info, warn};

use crate::{
    admission::ConvergeError,
    controller::{
        context::Context,
        error::{is_api_not_found, Error},
        finalizers,
        status::ConditionBuilder,
    },
    crd::{Condition, PolicyPhase, PolicyResource, PolicyStatus},
    naming::FIELD_MANAGER,
};

use super::policy_server::NOT_READY_REQUEUE;

/// Periodic resync interval for active policies
const RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Reconcile one policy of either variant.
pub async fn reconcile<P: PolicyResource>(obj: Arc<P>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let kind = P::kind(&()).into_owned();

    debug!(name = %name, kind = %kind, "Reconciling policy");

    let api: Api<P> = obj.api_for(ctx.client.clone());

    // Identity decisions here must not rely on the watch cache; read the
    // authoritative state straight from the API server.
    let policy = match api.get(&name).await {
        Ok(policy) => policy,
        Err(e) if is_api_not_found(&e) => {
            debug!(name = %name, kind = %kind, "Policy already deleted");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    if policy.meta().deletion_timestamp.is_some() {
        return reconcile_deletion(&api, &policy, &ctx).await;
    }

    if !finalizers::has_finalizer(&policy) {
        info!(name = %name, kind = %kind, "Adding finalizer");
        finalizers::ensure(&api, &policy).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let generation = policy.meta().generation;
    let outcome = ctx.backend.converge_policy(&policy.to_any()).await;
    let (result, phase, conditions) = evaluate_policy_converge(&name, outcome, generation);

    // Status is persisted on every attempt, success or failure.
    write_status(&api, &name, phase, conditions, generation).await?;

    if let Some(health_state) = &ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_reconcile(&kind, &name, duration);
    }

    result
}

/// Error policy shared by both policy controllers.
pub fn error_policy<P: PolicyResource>(obj: Arc<P>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let kind = P::kind(&()).into_owned();

    if let Some(health_state) = &ctx.health_state {
        health_state.metrics.record_error(&kind, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, kind = %kind, "Policy not found (likely deleted)");
        return Action::await_change();
    }

    warn!(name = %name, kind = %kind, error = %error, "Reconciliation failed, backing off");
    Action::requeue(error.requeue_after())
}

/// Map a registration outcome onto the requeue instruction, the next phase,
/// and the conditions to persist.
pub fn evaluate_policy_converge(
    name: &str,
    outcome: Result<(), ConvergeError>,
    generation: Option<i64>,
) -> (Result<Action, Error>, PolicyPhase, Vec<Condition>) {
    match outcome {
        Ok(()) => (
            Ok(Action::requeue(RESYNC_PERIOD)),
            PolicyPhase::Active,
            ConditionBuilder::new()
                .ready(true, "PolicyActive", "Policy is registered and enforcing", generation)
                .build(),
        ),
        Err(e) if e.is_not_ready() => {
            info!(name = %name, "Delaying policy registration since policy server is not yet ready");
            (
                Ok(Action::requeue(NOT_READY_REQUEUE)),
                PolicyPhase::Pending,
                ConditionBuilder::new()
                    .ready(false, "PolicyServerNotReady", "Referenced policy server is not ready", generation)
                    .progressing(true, "AwaitingPolicyServer", "Waiting for the policy server rollout", generation)
                    .build(),
            )
        }
        Err(e) => {
            let message = e.to_string();
            (
                Err(Error::Converge(e)),
                PolicyPhase::Pending,
                ConditionBuilder::new()
                    .ready(false, "ReconciliationFailed", &message, generation)
                    .build(),
            )
        }
    }
}

async fn reconcile_deletion<P: PolicyResource>(
    api: &Api<P>,
    policy: &P,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = policy.name_any();

    if finalizers::has_finalizer(policy) {
        // Registration removal must be confirmed before the finalizer goes;
        // a failure here keeps the finalizer in place for the retry.
        ctx.backend
            .retract_policy(&policy.to_any())
            .await
            .map_err(Error::Converge)?;
        finalizers::remove(api, &name).await?;
        info!(name = %name, "Policy registration retracted, finalizer removed");
    }

    Ok(Action::await_change())
}

async fn write_status<P: PolicyResource>(
    api: &Api<P>,
    name: &str,
    phase: PolicyPhase,
    conditions: Vec<Condition>,
    generation: Option<i64>,
) -> Result<(), Error> {
    let status = PolicyStatus {
        phase,
        conditions,
        observed_generation: generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
