//! PolicyServer Custom Resource Definition.
//!
//! A PolicyServer declares a deployable admission-evaluation service. The
//! controller generates a Deployment, a ConfigMap, and a Service for it, all
//! named by a deterministic function of the PolicyServer name (see
//! [`crate::naming`]).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// PolicyServer is a cluster-scoped custom resource describing one
/// admission-evaluation service.
///
/// Example:
/// ```yaml
/// apiVersion: policies.example.com/v1alpha1
/// kind: PolicyServer
/// metadata:
///   name: default
/// spec:
///   image: ghcr.io/example/policy-server:v1.9.0
///   replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policies.example.com",
    version = "v1alpha1",
    kind = "PolicyServer",
    plural = "policyservers",
    shortname = "ps",
    status = "PolicyServerStatus",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerSpec {
    /// Container image running the admission-evaluation service.
    pub image: String,

    /// Number of evaluation replicas (default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Extra environment variables for the evaluation containers.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Service account the evaluation pods run under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Additional labels applied to all generated infrastructure.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    1
}

/// Status of a PolicyServer.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerStatus {
    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicas_default() {
        let spec: PolicyServerSpec = serde_json::from_value(serde_json::json!({
            "image": "ghcr.io/example/policy-server:v1.9.0"
        }))
        .expect("minimal spec should deserialize");
        assert_eq!(spec.replicas, 1);
        assert!(spec.env.is_empty());
        assert!(spec.service_account_name.is_none());
    }

    #[test]
    fn test_spec_round_trip() {
        let spec = PolicyServerSpec {
            image: "ghcr.io/example/policy-server:v1.9.0".to_string(),
            replicas: 3,
            env: BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
            service_account_name: Some("policy-server".to_string()),
            labels: BTreeMap::new(),
        };
        let json = serde_json::to_string(&spec).expect("serialization should succeed");
        let parsed: PolicyServerSpec =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(parsed.replicas, 3);
        assert_eq!(parsed.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }
}
