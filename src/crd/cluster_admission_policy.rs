//! ClusterAdmissionPolicy Custom Resource Definition (cluster-wide variant).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AdmissionRule, PolicyStatus};

/// ClusterAdmissionPolicy binds evaluation rules to exactly one policy
/// server, matching admission requests across all namespaces.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policies.example.com",
    version = "v1alpha1",
    kind = "ClusterAdmissionPolicy",
    plural = "clusteradmissionpolicies",
    shortname = "cap",
    status = "PolicyStatus",
    printcolumn = r#"{"name":"Policy Server", "type":"string", "jsonPath":".spec.policyServer"}"#,
    printcolumn = r#"{"name":"Mutating", "type":"boolean", "jsonPath":".spec.mutating"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicySpec {
    /// Name of the PolicyServer this policy is scheduled on. The binding is
    /// immutable in effect: reconciliation does not support re-pointing.
    pub policy_server: String,

    /// Location of the evaluation module.
    pub module: String,

    /// Admission rules this policy matches.
    #[serde(default)]
    pub rules: Vec<AdmissionRule>,

    /// Whether the policy mutates requests (selects the registration kind).
    #[serde(default)]
    pub mutating: bool,

    /// Free-form settings handed to the evaluation module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}
