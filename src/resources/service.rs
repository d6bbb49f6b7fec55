//! Service generator for a policy server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::naming::{self, POLICY_SERVER_LABEL_KEY};
use crate::resources::common;
use crate::resources::deployment::POLICY_SERVER_PORT;

/// Port the registration objects point the API server at.
pub const SERVICE_PORT: i32 = 443;

/// Generate the Service exposing a policy server to the API server.
pub fn generate(server: &PolicyServer, namespace: &str) -> Service {
    let name = naming::policy_server_service_name(&server.name_any());

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(common::standard_labels(server)),
            owner_references: Some(vec![common::owner_reference(server)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                POLICY_SERVER_LABEL_KEY.to_string(),
                server.name_any(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(POLICY_SERVER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PolicyServerSpec;

    #[test]
    fn test_service_selects_server_pods() {
        let server = PolicyServer::new(
            "default",
            PolicyServerSpec {
                image: "ghcr.io/example/policy-server:v1.9.0".to_string(),
                replicas: 1,
                env: BTreeMap::new(),
                service_account_name: None,
                labels: BTreeMap::new(),
            },
        );
        let service = generate(&server, "admission-system");
        assert_eq!(service.name_any(), "policy-server-default");
        let selector = service
            .spec
            .and_then(|s| s.selector)
            .expect("service selector");
        assert_eq!(
            selector.get(POLICY_SERVER_LABEL_KEY).map(String::as_str),
            Some("default")
        );
    }
}
