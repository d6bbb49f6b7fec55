//! Naming conventions shared by the controllers, the event router, and the
//! resource generators.
//!
//! A PolicyServer's generated infrastructure (Deployment, ConfigMap, Service)
//! cannot carry ownership links back to the policies it serves, and webhook
//! configurations are cluster-scoped while admission policies may be
//! namespaced. Association is therefore reconstructed from these names,
//! labels, and annotations instead of owner references.

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "admission-operator";

/// Finalizer blocking deletion until application-level cleanup confirms
pub const FINALIZER: &str = "policies.example.com/finalizer";

/// Label carrying the owning policy-server name (pods, webhook configurations)
pub const POLICY_SERVER_LABEL_KEY: &str = "policies.example.com/policy-server";

/// Label carrying the policy scope on webhook configurations
pub const POLICY_SCOPE_LABEL_KEY: &str = "policies.example.com/policy-scope";

/// Marker label identifying objects managed by this operator
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Annotation on webhook configurations naming the policy they register
pub const POLICY_NAME_ANNOTATION_KEY: &str = "policies.example.com/policy-name";

/// Annotation on webhook configurations naming the policy's namespace.
/// Only present for namespaced policies.
pub const POLICY_NAMESPACE_ANNOTATION_KEY: &str = "policies.example.com/policy-namespace";

/// ConfigMap data key holding the serialized policy-server -> policies map
pub const POLICY_MAP_KEY: &str = "policy-map.json";

/// ConfigMap data key holding the policy server's own configuration payload
pub const POLICY_CONFIG_KEY: &str = "policies.json";

const POLICY_SERVER_PREFIX: &str = "policy-server-";

/// Deployment name for a policy server.
pub fn policy_server_deployment_name(server_name: &str) -> String {
    format!("{POLICY_SERVER_PREFIX}{server_name}")
}

/// ConfigMap name for a policy server. Matches the deployment name so that
/// either can be derived from the other without a lookup.
pub fn policy_server_config_map_name(server_name: &str) -> String {
    policy_server_deployment_name(server_name)
}

/// Service name for a policy server.
pub fn policy_server_service_name(server_name: &str) -> String {
    policy_server_deployment_name(server_name)
}

/// Recover the policy-server name from a generated infrastructure name.
///
/// Inverse of [`policy_server_deployment_name`]; returns `None` for names
/// this operator did not generate.
pub fn policy_server_name_from_infra(infra_name: &str) -> Option<&str> {
    infra_name
        .strip_prefix(POLICY_SERVER_PREFIX)
        .filter(|rest| !rest.is_empty())
}

/// Webhook configuration name for a cluster-scoped policy.
pub fn cluster_policy_registration_name(policy_name: &str) -> String {
    format!("clusterwide-{policy_name}")
}

/// Webhook configuration name for a namespaced policy.
pub fn namespaced_policy_registration_name(namespace: &str, policy_name: &str) -> String {
    format!("namespaced-{namespace}-{policy_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infra_names_share_one_derivation() {
        assert_eq!(policy_server_deployment_name("default"), "policy-server-default");
        assert_eq!(
            policy_server_config_map_name("default"),
            policy_server_deployment_name("default")
        );
        assert_eq!(
            policy_server_service_name("default"),
            policy_server_deployment_name("default")
        );
    }

    #[test]
    fn test_infra_name_round_trips() {
        let name = policy_server_deployment_name("team-a");
        assert_eq!(policy_server_name_from_infra(&name), Some("team-a"));
    }

    #[test]
    fn test_foreign_infra_name_is_rejected() {
        assert_eq!(policy_server_name_from_infra("coredns"), None);
        assert_eq!(policy_server_name_from_infra("policy-server-"), None);
    }

    #[test]
    fn test_registration_names_are_scope_disjoint() {
        // A cluster policy and a namespaced policy with the same name must
        // never collide on the registration object.
        assert_ne!(
            cluster_policy_registration_name("psp"),
            namespaced_policy_registration_name("default", "psp")
        );
    }
}
