//! Types shared by both admission-policy variants.
//!
//! `AdmissionPolicy` (namespaced) and `ClusterAdmissionPolicy`
//! (cluster-scoped) carry identical specs and follow the same lifecycle. The
//! [`PolicyResource`] trait lets one reconciliation routine serve both, and
//! [`AnyPolicy`] is the closed variant used wherever the two kinds travel
//! together (index results, correlation payloads, dependent deletion).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Api, Client, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::naming;

use super::{AdmissionPolicy, ClusterAdmissionPolicy, Condition};

/// Lifecycle phase of an admission policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum PolicyPhase {
    /// Waiting for the referenced policy server to become ready.
    #[default]
    Pending,
    /// Registered with the admission machinery and enforcing.
    Active,
}

impl std::fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyPhase::Pending => write!(f, "Pending"),
            PolicyPhase::Active => write!(f, "Active"),
        }
    }
}

/// Scope of a policy variant.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Cluster,
    Namespaced,
}

impl PolicyScope {
    /// Value carried by the scope label on webhook configurations.
    pub fn label_value(&self) -> &'static str {
        match self {
            PolicyScope::Cluster => "cluster",
            PolicyScope::Namespaced => "namespaced",
        }
    }
}

/// Identity of one policy: enough to address it across both variants.
///
/// This is the index entry and the correlation-payload element. Ordering and
/// equality cover (scope, namespace, name) so merged index results can be
/// deduplicated.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyIdentity {
    pub scope: PolicyScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// One admission rule: which operations on which resources the policy matches.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRule {
    /// API groups the rule applies to ("" for core).
    #[serde(default)]
    pub api_groups: Vec<String>,

    /// API versions the rule applies to.
    #[serde(default)]
    pub api_versions: Vec<String>,

    /// Resources the rule applies to (e.g. "pods").
    #[serde(default)]
    pub resources: Vec<String>,

    /// Operations the rule applies to (CREATE, UPDATE, DELETE, CONNECT).
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Status shared by both policy variants.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub phase: PolicyPhase,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Common surface of the two policy variants, consumed by the shared
/// reconciliation routine and the admission backend.
pub trait PolicyResource:
    Resource<DynamicType = ()>
    + Clone
    + serde::de::DeserializeOwned
    + Serialize
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Scope of this variant.
    const SCOPE: PolicyScope;

    /// Name of the policy server this policy is bound to.
    fn policy_server_name(&self) -> &str;

    /// Whether the policy mutates admission requests.
    fn mutating(&self) -> bool;

    /// Observed status, if any.
    fn status(&self) -> Option<&PolicyStatus>;

    /// Fold this policy into the closed variant.
    fn to_any(&self) -> AnyPolicy;

    /// API handle scoped correctly for this object.
    fn api_for(&self, client: Client) -> Api<Self>;

    /// Current phase, defaulting to Pending before first reconciliation.
    fn phase(&self) -> PolicyPhase {
        self.status().map(|s| s.phase).unwrap_or_default()
    }

    /// Identity of this policy.
    fn identity(&self) -> PolicyIdentity {
        PolicyIdentity {
            scope: Self::SCOPE,
            namespace: self.namespace(),
            name: self.name_any(),
        }
    }
}

impl PolicyResource for AdmissionPolicy {
    const SCOPE: PolicyScope = PolicyScope::Namespaced;

    fn policy_server_name(&self) -> &str {
        &self.spec.policy_server
    }

    fn mutating(&self) -> bool {
        self.spec.mutating
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn to_any(&self) -> AnyPolicy {
        AnyPolicy::Namespaced(self.clone())
    }

    fn api_for(&self, client: Client) -> Api<Self> {
        Api::namespaced(client, &self.namespace().unwrap_or_default())
    }
}

impl PolicyResource for ClusterAdmissionPolicy {
    const SCOPE: PolicyScope = PolicyScope::Cluster;

    fn policy_server_name(&self) -> &str {
        &self.spec.policy_server
    }

    fn mutating(&self) -> bool {
        self.spec.mutating
    }

    fn status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn to_any(&self) -> AnyPolicy {
        AnyPolicy::Cluster(self.clone())
    }

    fn api_for(&self, client: Client) -> Api<Self> {
        Api::all(client)
    }
}

/// Either policy variant. Closed: unrecognized kinds do not exist here.
#[derive(Clone, Debug)]
pub enum AnyPolicy {
    Namespaced(AdmissionPolicy),
    Cluster(ClusterAdmissionPolicy),
}

impl AnyPolicy {
    pub fn identity(&self) -> PolicyIdentity {
        match self {
            AnyPolicy::Namespaced(p) => p.identity(),
            AnyPolicy::Cluster(p) => p.identity(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            AnyPolicy::Namespaced(p) => p.name_any(),
            AnyPolicy::Cluster(p) => p.name_any(),
        }
    }

    pub fn namespace(&self) -> Option<String> {
        match self {
            AnyPolicy::Namespaced(p) => p.namespace(),
            AnyPolicy::Cluster(p) => p.namespace(),
        }
    }

    pub fn policy_server_name(&self) -> &str {
        match self {
            AnyPolicy::Namespaced(p) => p.policy_server_name(),
            AnyPolicy::Cluster(p) => p.policy_server_name(),
        }
    }

    pub fn mutating(&self) -> bool {
        match self {
            AnyPolicy::Namespaced(p) => p.mutating(),
            AnyPolicy::Cluster(p) => p.mutating(),
        }
    }

    pub fn module(&self) -> &str {
        match self {
            AnyPolicy::Namespaced(p) => &p.spec.module,
            AnyPolicy::Cluster(p) => &p.spec.module,
        }
    }

    pub fn rules(&self) -> &[AdmissionRule] {
        match self {
            AnyPolicy::Namespaced(p) => &p.spec.rules,
            AnyPolicy::Cluster(p) => &p.spec.rules,
        }
    }

    pub fn settings(&self) -> Option<&serde_json::Value> {
        match self {
            AnyPolicy::Namespaced(p) => p.spec.settings.as_ref(),
            AnyPolicy::Cluster(p) => p.spec.settings.as_ref(),
        }
    }

    /// Whether the policy already carries a deletion marker.
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp().is_some()
    }

    fn deletion_timestamp(&self) -> Option<&Time> {
        match self {
            AnyPolicy::Namespaced(p) => p.meta().deletion_timestamp.as_ref(),
            AnyPolicy::Cluster(p) => p.meta().deletion_timestamp.as_ref(),
        }
    }

    /// Deterministic name of the webhook configuration registering this
    /// policy.
    pub fn registration_name(&self) -> String {
        match &self.identity() {
            PolicyIdentity {
                namespace: Some(ns),
                name,
                ..
            } => naming::namespaced_policy_registration_name(ns, name),
            PolicyIdentity { name, .. } => naming::cluster_policy_registration_name(name),
        }
    }
}
