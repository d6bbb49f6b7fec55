//! Deployment generator for a policy server.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::naming::{self, POLICY_SERVER_LABEL_KEY};
use crate::resources::common;

/// Port the evaluation service listens on.
pub const POLICY_SERVER_PORT: i32 = 8443;

/// Generate the Deployment running a policy server's evaluation replicas.
pub fn generate(server: &PolicyServer, namespace: &str) -> Deployment {
    let name = naming::policy_server_deployment_name(&server.name_any());
    let labels = common::standard_labels(server);

    let env = server
        .spec
        .env
        .iter()
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![common::owner_reference(server)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(server.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    POLICY_SERVER_LABEL_KEY.to_string(),
                    server.name_any(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: server.spec.service_account_name.clone(),
                    containers: vec![Container {
                        name: "policy-server".to_string(),
                        image: Some(server.spec.image.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: POLICY_SERVER_PORT,
                            name: Some("https".to_string()),
                            ..Default::default()
                        }]),
                        env: if env.is_empty() { None } else { Some(env) },
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction {
                                path: Some("/readiness".to_string()),
                                port: IntOrString::Int(POLICY_SERVER_PORT),
                                scheme: Some("HTTPS".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
