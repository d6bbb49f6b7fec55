//! Event router: maps auxiliary-resource changes onto policy reconcile
//! requests.
//!
//! A policy server's pods and ConfigMap, and a policy's webhook
//! configuration, carry no ownership links back to the policies they serve.
//! One routine per watched auxiliary kind reconstructs the association from
//! the naming convention, the labels, and the annotations instead:
//!
//! - a pod names its policy server in a label; the canonical ConfigMap name
//!   is derived from that label and the correlation payload inside it lists
//!   the policies to re-trigger
//! - a ConfigMap change is decoded directly
//! - a PolicyServer change reuses the pod path's name derivation, covering
//!   the window before any pod exists
//! - a webhook configuration names its policy in annotations, filtered by
//!   the scope label to the matching reconciler instance
//!
//! Every failure along a path (missing label, vanished ConfigMap, malformed
//! payload) yields zero requests: the resource's own future change will
//! redeliver.

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::correlation::PolicyMap;
use crate::crd::{PolicyIdentity, PolicyResource, PolicyScope, PolicyServer};
use crate::naming::{
    self, FIELD_MANAGER, MANAGED_BY_LABEL_KEY, POLICY_NAME_ANNOTATION_KEY,
    POLICY_NAMESPACE_ANNOTATION_KEY, POLICY_SCOPE_LABEL_KEY, POLICY_SERVER_LABEL_KEY,
};

/// Router resolving auxiliary objects to the policies they affect.
///
/// ConfigMap reads go straight to the API server rather than through the
/// watch cache: a stale payload here would re-trigger the wrong policies.
#[derive(Clone)]
pub struct EventRouter {
    client: Client,
    deployments_namespace: String,
}

impl EventRouter {
    /// Create a router reading correlation payloads from the given
    /// namespace.
    pub fn new(client: Client, deployments_namespace: impl Into<String>) -> Self {
        Self {
            client,
            deployments_namespace: deployments_namespace.into(),
        }
    }

    /// Policies affected by a change to a policy-server pod.
    ///
    /// The pod's own namespace is irrelevant; the payload lives in the
    /// deployments namespace under a name derived from the label.
    pub async fn requests_for_pod(&self, pod: &Pod) -> Vec<PolicyIdentity> {
        let Some(server_name) = server_name_from_labels(pod.meta()) else {
            debug!(pod = %pod.name_any(), "Pod carries no policy-server label, ignoring");
            return Vec::new();
        };
        self.requests_for_server_payload(&server_name).await
    }

    /// Policies affected by a change to a PolicyServer itself.
    ///
    /// Same derivation as the pod path; this covers readiness transitions
    /// observed before the first pod event arrives.
    pub async fn requests_for_policy_server(&self, server: &PolicyServer) -> Vec<PolicyIdentity> {
        self.requests_for_server_payload(&server.name_any()).await
    }

    async fn requests_for_server_payload(&self, server_name: &str) -> Vec<PolicyIdentity> {
        let config_map_name = naming::policy_server_config_map_name(server_name);
        let api: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), &self.deployments_namespace);
        match api.get(&config_map_name).await {
            Ok(config_map) => requests_for_config_map(&config_map),
            Err(e) => {
                debug!(
                    server = %server_name,
                    config_map = %config_map_name,
                    error = %e,
                    "No readable correlation payload, emitting no requests"
                );
                Vec::new()
            }
        }
    }
}

/// Read the policy-server name off an auxiliary object's labels.
pub fn server_name_from_labels(meta: &ObjectMeta) -> Option<String> {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(POLICY_SERVER_LABEL_KEY))
        .cloned()
}

/// Policies listed in a correlation-payload ConfigMap.
///
/// A missing or malformed payload yields zero requests.
pub fn requests_for_config_map(config_map: &ConfigMap) -> Vec<PolicyIdentity> {
    match PolicyMap::from_config_map(config_map) {
        Ok(map) => map.identities().cloned().collect(),
        Err(e) => {
            debug!(
                config_map = %config_map.name_any(),
                error = %e,
                "Correlation payload not decodable, emitting no requests"
            );
            Vec::new()
        }
    }
}

/// Resolve a webhook configuration to the one policy it registers, for the
/// reconciler instance handling `scope`.
///
/// Objects without the operator's marker label are not ours and are skipped
/// silently. A recognized object missing the scope label is noted and
/// skipped; one whose scope label names the other variant belongs to the
/// other reconciler instance. The target-policy-name annotation selects
/// exactly one request; its absence is noted and yields none.
pub fn request_for_registration(meta: &ObjectMeta, scope: PolicyScope) -> Option<PolicyIdentity> {
    let name = meta.name.as_deref().unwrap_or_default();

    let managed = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL_KEY))
        .is_some_and(|value| value == FIELD_MANAGER);
    if !managed {
        return None;
    }

    let Some(scope_label) = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(POLICY_SCOPE_LABEL_KEY))
    else {
        warn!(registration = %name, "Webhook configuration carries no scope label, cannot route");
        return None;
    };
    if scope_label != scope.label_value() {
        return None;
    }

    let Some(policy_name) = meta
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(POLICY_NAME_ANNOTATION_KEY))
    else {
        warn!(registration = %name, "Webhook configuration carries no policy-name annotation");
        return None;
    };

    let namespace = match scope {
        PolicyScope::Cluster => None,
        PolicyScope::Namespaced => {
            let Some(namespace) = meta
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(POLICY_NAMESPACE_ANNOTATION_KEY))
            else {
                // The name alone cannot address a namespaced policy.
                warn!(
                    registration = %name,
                    "Webhook configuration carries no policy-namespace annotation"
                );
                return None;
            };
            Some(namespace.clone())
        }
    };

    Some(PolicyIdentity {
        scope,
        namespace,
        name: policy_name.clone(),
    })
}

/// Convert an identity into a reconcile request for the reconciler serving
/// `P`'s scope. Identities of the other scope resolve to `None`.
pub fn object_ref_for<P: PolicyResource>(identity: &PolicyIdentity) -> Option<ObjectRef<P>> {
    if identity.scope != P::SCOPE {
        return None;
    }
    let reference = ObjectRef::new(&identity.name);
    match (P::SCOPE, &identity.namespace) {
        (PolicyScope::Namespaced, Some(namespace)) => Some(reference.within(namespace)),
        (PolicyScope::Namespaced, None) => {
            warn!(policy = %identity.name, "Namespaced identity without a namespace, dropping");
            None
        }
        (PolicyScope::Cluster, _) => Some(reference),
    }
}
