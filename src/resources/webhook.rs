//! Webhook registration generators.
//!
//! A policy's registration object is cluster-scoped while the policy itself
//! may be namespaced, so no owner reference is possible. The marker, scope,
//! and policy-server labels plus the policy-name annotations are what the
//! event router and the teardown path use to find these objects again.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{AnyPolicy, PolicyIdentity};
use crate::naming::{
    self, FIELD_MANAGER, MANAGED_BY_LABEL_KEY, POLICY_NAME_ANNOTATION_KEY,
    POLICY_NAMESPACE_ANNOTATION_KEY, POLICY_SCOPE_LABEL_KEY, POLICY_SERVER_LABEL_KEY,
};
use crate::resources::service::SERVICE_PORT;

/// Metadata shared by both registration kinds.
fn registration_metadata(policy: &AnyPolicy) -> ObjectMeta {
    let identity = policy.identity();

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL_KEY.to_string(), FIELD_MANAGER.to_string());
    labels.insert(
        POLICY_SCOPE_LABEL_KEY.to_string(),
        identity.scope.label_value().to_string(),
    );
    labels.insert(
        POLICY_SERVER_LABEL_KEY.to_string(),
        policy.policy_server_name().to_string(),
    );

    let mut annotations = BTreeMap::new();
    annotations.insert(POLICY_NAME_ANNOTATION_KEY.to_string(), identity.name.clone());
    if let Some(namespace) = &identity.namespace {
        annotations.insert(POLICY_NAMESPACE_ANNOTATION_KEY.to_string(), namespace.clone());
    }

    ObjectMeta {
        name: Some(policy.registration_name()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn client_config(policy: &AnyPolicy, deployments_namespace: &str) -> WebhookClientConfig {
    let service_name = naming::policy_server_service_name(policy.policy_server_name());
    let path = match &policy.identity() {
        PolicyIdentity {
            namespace: Some(ns),
            name,
            ..
        } => format!("/validate/{ns}/{name}"),
        PolicyIdentity { name, .. } => format!("/validate/{name}"),
    };

    WebhookClientConfig {
        service: Some(ServiceReference {
            name: service_name,
            namespace: deployments_namespace.to_string(),
            path: Some(path),
            port: Some(SERVICE_PORT),
        }),
        ..Default::default()
    }
}

fn rules(policy: &AnyPolicy) -> Vec<RuleWithOperations> {
    policy
        .rules()
        .iter()
        .map(|rule| RuleWithOperations {
            api_groups: Some(rule.api_groups.clone()),
            api_versions: Some(rule.api_versions.clone()),
            resources: Some(rule.resources.clone()),
            operations: Some(rule.operations.clone()),
            ..Default::default()
        })
        .collect()
}

fn webhook_name(policy: &AnyPolicy) -> String {
    format!("{}.policies.example.com", policy.registration_name())
}

/// Generate the registration for a non-mutating policy.
pub fn generate_validating(
    policy: &AnyPolicy,
    deployments_namespace: &str,
) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: registration_metadata(policy),
        webhooks: Some(vec![ValidatingWebhook {
            name: webhook_name(policy),
            client_config: client_config(policy, deployments_namespace),
            rules: Some(rules(policy)),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            ..Default::default()
        }]),
    }
}

/// Generate the registration for a mutating policy.
pub fn generate_mutating(
    policy: &AnyPolicy,
    deployments_namespace: &str,
) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: registration_metadata(policy),
        webhooks: Some(vec![MutatingWebhook {
            name: webhook_name(policy),
            client_config: client_config(policy, deployments_namespace),
            rules: Some(rules(policy)),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            ..Default::default()
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AdmissionPolicy, AdmissionPolicySpec, AdmissionRule, ClusterAdmissionPolicy,
        ClusterAdmissionPolicySpec, PolicyResource,
    };

    fn namespaced_policy() -> AnyPolicy {
        let mut policy = AdmissionPolicy::new(
            "no-privileged-pods",
            AdmissionPolicySpec {
                policy_server: "default".to_string(),
                module: "registry://ghcr.io/example/policies/pod-privileged:v0.2.5".to_string(),
                rules: vec![AdmissionRule {
                    api_groups: vec!["".to_string()],
                    api_versions: vec!["v1".to_string()],
                    resources: vec!["pods".to_string()],
                    operations: vec!["CREATE".to_string()],
                }],
                mutating: false,
                settings: None,
            },
        );
        policy.metadata.namespace = Some("team-a".to_string());
        policy.to_any()
    }

    fn cluster_policy() -> AnyPolicy {
        ClusterAdmissionPolicy::new(
            "psa-enforce",
            ClusterAdmissionPolicySpec {
                policy_server: "default".to_string(),
                module: "registry://ghcr.io/example/policies/psa:v0.1.0".to_string(),
                rules: Vec::new(),
                mutating: true,
                settings: None,
            },
        )
        .to_any()
    }

    #[test]
    fn test_validating_registration_labels_and_annotations() {
        let config = generate_validating(&namespaced_policy(), "admission-system");
        let labels = config.metadata.labels.as_ref().expect("labels");
        assert_eq!(
            labels.get(POLICY_SCOPE_LABEL_KEY).map(String::as_str),
            Some("namespaced")
        );
        assert_eq!(
            labels.get(POLICY_SERVER_LABEL_KEY).map(String::as_str),
            Some("default")
        );

        let annotations = config.metadata.annotations.as_ref().expect("annotations");
        assert_eq!(
            annotations.get(POLICY_NAME_ANNOTATION_KEY).map(String::as_str),
            Some("no-privileged-pods")
        );
        assert_eq!(
            annotations
                .get(POLICY_NAMESPACE_ANNOTATION_KEY)
                .map(String::as_str),
            Some("team-a")
        );
    }

    #[test]
    fn test_client_config_targets_server_service() {
        let config = generate_validating(&namespaced_policy(), "admission-system");
        let webhook = &config.webhooks.expect("webhooks")[0];
        let service = webhook
            .client_config
            .service
            .as_ref()
            .expect("service reference");
        assert_eq!(service.name, "policy-server-default");
        assert_eq!(service.namespace, "admission-system");
        assert_eq!(
            service.path.as_deref(),
            Some("/validate/team-a/no-privileged-pods")
        );
    }

    #[test]
    fn test_cluster_policy_has_no_namespace_annotation() {
        let config = generate_mutating(&cluster_policy(), "admission-system");
        let annotations = config.metadata.annotations.as_ref().expect("annotations");
        assert!(!annotations.contains_key(POLICY_NAMESPACE_ANNOTATION_KEY));
        let labels = config.metadata.labels.as_ref().expect("labels");
        assert_eq!(
            labels.get(POLICY_SCOPE_LABEL_KEY).map(String::as_str),
            Some("cluster")
        );
    }

    #[test]
    fn test_rules_carry_over() {
        let config = generate_validating(&namespaced_policy(), "admission-system");
        let webhook = &config.webhooks.expect("webhooks")[0];
        let rules = webhook.rules.as_ref().expect("rules");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resources.as_deref(), Some(&["pods".to_string()][..]));
        assert_eq!(
            rules[0].operations.as_deref(),
            Some(&["CREATE".to_string()][..])
        );
    }
}
