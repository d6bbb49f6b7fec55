//! Common resource generation utilities.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::naming::{FIELD_MANAGER, MANAGED_BY_LABEL_KEY, POLICY_SERVER_LABEL_KEY};

/// Standard labels applied to all infrastructure generated for a policy
/// server. The policy-server label is what the event router keys on.
pub fn standard_labels(server: &PolicyServer) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL_KEY.to_string(), FIELD_MANAGER.to_string());
    labels.insert(POLICY_SERVER_LABEL_KEY.to_string(), server.name_any());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "policy-server".to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &server.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Owner reference pointing at the PolicyServer.
///
/// PolicyServer is cluster-scoped, so its namespaced infrastructure may list
/// it as owner; garbage collection removes the infrastructure once the
/// finalizer protocol lets the PolicyServer go.
pub fn owner_reference(server: &PolicyServer) -> OwnerReference {
    OwnerReference {
        api_version: "policies.example.com/v1alpha1".to_string(),
        kind: "PolicyServer".to_string(),
        name: server.name_any(),
        uid: server.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
