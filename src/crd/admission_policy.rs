//! AdmissionPolicy Custom Resource Definition (namespaced variant).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AdmissionRule, PolicyStatus};

/// AdmissionPolicy binds evaluation rules to exactly one policy server,
/// matching admission requests within its own namespace.
///
/// Example:
/// ```yaml
/// apiVersion: policies.example.com/v1alpha1
/// kind: AdmissionPolicy
/// metadata:
///   name: no-privileged-pods
///   namespace: team-a
/// spec:
///   policyServer: default
///   module: registry://ghcr.io/example/policies/pod-privileged:v0.2.5
///   rules:
///     - apiGroups: [""]
///       apiVersions: ["v1"]
///       resources: ["pods"]
///       operations: ["CREATE"]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policies.example.com",
    version = "v1alpha1",
    kind = "AdmissionPolicy",
    plural = "admissionpolicies",
    shortname = "ap",
    status = "PolicyStatus",
    namespaced,
    printcolumn = r#"{"name":"Policy Server", "type":"string", "jsonPath":".spec.policyServer"}"#,
    printcolumn = r#"{"name":"Mutating", "type":"boolean", "jsonPath":".spec.mutating"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicySpec {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: AdmissionPolicySpec = serde_json::from_value(serde_json::json!({
            "policyServer": "default",
            "module": "registry://ghcr.io/example/policies/pod-privileged:v0.2.5"
        }))
        .expect("minimal spec should deserialize");
        assert_eq!(spec.policy_server, "default");
        assert!(spec.rules.is_empty());
        assert!(!spec.mutating);
        assert!(spec.settings.is_none());
    }
}
