//! ConfigMap generator for a policy server.
//!
//! The ConfigMap carries two payloads: the configuration the evaluation
//! service itself consumes, and the correlation payload the event router
//! decodes to map infrastructure changes back to policies.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use crate::correlation::PolicyMap;
use crate::crd::{AnyPolicy, PolicyServer};
use crate::naming::{self, POLICY_CONFIG_KEY, POLICY_MAP_KEY};
use crate::resources::common;

/// One entry of the evaluation service's own configuration.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyConfigEntry<'a> {
    module: &'a str,
    mutating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<&'a serde_json::Value>,
}

/// Generate the ConfigMap for a policy server and its current policies.
pub fn generate(
    server: &PolicyServer,
    namespace: &str,
    policies: &[AnyPolicy],
) -> Result<ConfigMap, serde_json::Error> {
    let server_name = server.name_any();
    let name = naming::policy_server_config_map_name(&server_name);

    let config: BTreeMap<String, PolicyConfigEntry<'_>> = policies
        .iter()
        .map(|policy| {
            (
                policy.registration_name(),
                PolicyConfigEntry {
                    module: policy.module(),
                    mutating: policy.mutating(),
                    settings: policy.settings(),
                },
            )
        })
        .collect();

    let mut data = BTreeMap::new();
    data.insert(POLICY_CONFIG_KEY.to_string(), serde_json::to_string(&config)?);
    data.insert(
        POLICY_MAP_KEY.to_string(),
        PolicyMap::for_server(&server_name, policies).to_json()?,
    );

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(common::standard_labels(server)),
            owner_references: Some(vec![common::owner_reference(server)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}
