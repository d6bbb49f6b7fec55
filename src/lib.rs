//! admission-operator library crate
//!
//! This module exports the CRD definitions, the reconciliation core, and the
//! wiring that runs the three controllers (PolicyServer plus the two policy
//! variants) against a cluster.

pub mod admission;
pub mod controller;
pub mod correlation;
pub mod crd;
pub mod health;
pub mod naming;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use admission::KubeBackend;
use controller::context::Context;
use controller::error::Error;
use controller::event_router::{self, EventRouter};
use controller::index::PolicyIndex;
use controller::{policy, policy_server};
use crd::{AdmissionPolicy, ClusterAdmissionPolicy, PolicyResource, PolicyServer};
use naming::{FIELD_MANAGER, MANAGED_BY_LABEL_KEY, POLICY_SERVER_LABEL_KEY};

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for a primary resource.
///
/// The stream retries with exponential backoff, converts watch events to
/// objects (Added/Modified only), and filters out status-only updates via
/// the generation predicate. Returns the reflector store (for cache
/// lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Build the correlated-trigger stream for one policy reconciler instance.
///
/// Merges the event router's mappings over every watched auxiliary kind
/// (policy-server pods, correlation-payload ConfigMaps, PolicyServers, and
/// both webhook configuration kinds) and keeps only the requests addressed
/// to `P`'s scope.
fn policy_trigger_stream<P>(
    client: Client,
    deployments_namespace: String,
) -> impl Stream<Item = ObjectRef<P>> + Send + 'static
where
    P: PolicyResource,
{
    let router = EventRouter::new(client.clone(), deployments_namespace.clone());
    let watcher_config = default_watcher_config();

    let pods: Api<Pod> = Api::all(client.clone());
    let pod_requests = {
        let router = router.clone();
        watcher(pods, watcher_config.clone().labels(POLICY_SERVER_LABEL_KEY))
            .default_backoff()
            .touched_objects()
            .filter_map(|event| async move { event.ok() })
            .then(move |pod| {
                let router = router.clone();
                async move { stream::iter(router.requests_for_pod(&pod).await) }
            })
            .flatten()
            .boxed()
    };

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &deployments_namespace);
    let config_map_requests = watcher(config_maps, watcher_config.clone())
        .default_backoff()
        .touched_objects()
        .filter_map(|event| async move { event.ok() })
        .flat_map(|config_map| {
            stream::iter(event_router::requests_for_config_map(&config_map))
        })
        .boxed();

    let servers: Api<PolicyServer> = Api::all(client.clone());
    let server_requests = {
        let router = router.clone();
        watcher(servers, watcher_config.clone())
            .default_backoff()
            .touched_objects()
            .filter_map(|event| async move { event.ok() })
            .then(move |server| {
                let router = router.clone();
                async move { stream::iter(router.requests_for_policy_server(&server).await) }
            })
            .flatten()
            .boxed()
    };

    let managed_selector = format!("{MANAGED_BY_LABEL_KEY}={FIELD_MANAGER}");
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    let validating_requests = metadata_watcher(
        validating,
        watcher_config.clone().labels(&managed_selector),
    )
    .default_backoff()
    .touched_objects()
    .filter_map(|event| async move { event.ok() })
    .filter_map(|registration| async move {
        event_router::request_for_registration(&registration.metadata, P::SCOPE)
    })
    .boxed();

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    let mutating_requests =
        metadata_watcher(mutating, watcher_config.labels(&managed_selector))
            .default_backoff()
            .touched_objects()
            .filter_map(|event| async move { event.ok() })
            .filter_map(|registration| async move {
                event_router::request_for_registration(&registration.metadata, P::SCOPE)
            })
            .boxed();

    stream::select_all([
        pod_requests,
        config_map_requests,
        server_requests,
        validating_requests,
        mutating_requests,
    ])
    .filter_map(|identity| async move { event_router::object_ref_for::<P>(&identity) })
}

/// Log one reconciliation round's outcome.
///
/// Not-found errors are expected after deletion, when correlated triggers
/// still fire for a vanished object; they stay at debug level.
fn handle_reconcile_result<K: kube::runtime::reflector::Lookup>(
    result: Result<(ObjectRef<K>, Action), kube::runtime::controller::Error<Error, watcher::Error>>,
) {
    match result {
        Ok((obj, _action)) => {
            debug!("Reconciled: {}", obj.name);
        }
        Err(e) => {
            let is_not_found = match &e {
                kube::runtime::controller::Error::ObjectNotFound(_) => true,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!("Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run the three controllers until their watch streams end.
///
/// The external scheduler semantics (at most one in-flight reconcile per
/// key, collapsing repeated enqueues, bounded concurrency across distinct
/// keys) come from `kube::runtime::Controller`; this function only wires
/// the primary streams, the correlated triggers, and the shared context.
pub async fn run_controllers(
    client: Client,
    deployments_namespace: &str,
    health_state: Option<Arc<HealthState>>,
) {
    info!(namespace = %deployments_namespace, "Starting controllers");

    let watcher_config = default_watcher_config();

    let servers: Api<PolicyServer> = Api::all(client.clone());
    let namespaced_policies: Api<AdmissionPolicy> = Api::all(client.clone());
    let cluster_policies: Api<ClusterAdmissionPolicy> = Api::all(client.clone());

    let (server_reader, server_stream) =
        create_filtered_stream(servers, watcher_config.clone());
    let (namespaced_reader, namespaced_stream) =
        create_filtered_stream(namespaced_policies, watcher_config.clone());
    let (cluster_reader, cluster_stream) =
        create_filtered_stream(cluster_policies, watcher_config.clone());

    let index = PolicyIndex::new(namespaced_reader.clone(), cluster_reader.clone());
    let backend = Arc::new(KubeBackend::new(client.clone(), deployments_namespace));
    let ctx = Arc::new(Context::new(
        client.clone(),
        deployments_namespace,
        index,
        backend,
        health_state.clone(),
    ));

    if let Some(state) = &health_state {
        state.set_ready(true).await;
    }

    // Policy changes re-enqueue their policy server: the dependent set is an
    // input to both convergence and the deletion branch.
    let server_controller = Controller::for_stream(server_stream, server_reader)
        .watches(
            Api::<AdmissionPolicy>::all(client.clone()),
            watcher_config.clone(),
            |policy| Some(ObjectRef::new(&policy.spec.policy_server)),
        )
        .watches(
            Api::<ClusterAdmissionPolicy>::all(client.clone()),
            watcher_config.clone(),
            |policy| Some(ObjectRef::new(&policy.spec.policy_server)),
        )
        .run(policy_server::reconcile, policy_server::error_policy, ctx.clone())
        .for_each(|result| async { handle_reconcile_result(result) });

    let namespaced_controller = Controller::for_stream(namespaced_stream, namespaced_reader)
        .reconcile_on(policy_trigger_stream::<AdmissionPolicy>(
            client.clone(),
            deployments_namespace.to_string(),
        ))
        .run(
            policy::reconcile::<AdmissionPolicy>,
            policy::error_policy::<AdmissionPolicy>,
            ctx.clone(),
        )
        .for_each(|result| async { handle_reconcile_result(result) });

    let cluster_controller = Controller::for_stream(cluster_stream, cluster_reader)
        .reconcile_on(policy_trigger_stream::<ClusterAdmissionPolicy>(
            client.clone(),
            deployments_namespace.to_string(),
        ))
        .run(
            policy::reconcile::<ClusterAdmissionPolicy>,
            policy::error_policy::<ClusterAdmissionPolicy>,
            ctx,
        )
        .for_each(|result| async { handle_reconcile_result(result) });

    futures::join!(server_controller, namespaced_controller, cluster_controller);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
