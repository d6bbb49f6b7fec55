//! Mock admission backend for functional tests.
//!
//! Simulates the domain collaborator without a cluster: servers become
//! ready when the test says so, registrations live in an in-memory map
//! keyed the same way the real backend keys webhook configurations, and
//! every call is recorded so tests can assert on ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use admission_operator::admission::{AdmissionBackend, ConvergeError};
use admission_operator::crd::{AnyPolicy, PolicyServer};

#[derive(Default)]
struct MockState {
    /// Servers whose infrastructure counts as rolled out.
    ready_servers: BTreeSet<String>,
    /// Registration entries by registration name.
    registrations: BTreeMap<String, String>,
    /// Every backend call, in order.
    calls: Vec<String>,
    /// Fail the next retraction with a non-NotReady error.
    fail_next_retract: bool,
}

/// In-memory [`AdmissionBackend`] used by the functional tests.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a server's infrastructure as rolled out and serving.
    pub fn set_server_ready(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .ready_servers
            .insert(name.to_string());
    }

    /// Make the next retraction fail, as a store outage would.
    pub fn fail_next_retract(&self) {
        self.state.lock().unwrap().fail_next_retract = true;
    }

    pub fn registration_count(&self) -> usize {
        self.state.lock().unwrap().registrations.len()
    }

    pub fn has_registration(&self, registration_name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .registrations
            .contains_key(registration_name)
    }

    /// Number of times teardown ran, across all servers.
    pub fn teardown_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.starts_with("tear_down:"))
            .count()
    }

    /// The recorded call sequence.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn unavailable() -> ConvergeError {
        ConvergeError::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the server is currently unable to handle the request".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        }))
    }
}

#[async_trait]
impl AdmissionBackend for MockBackend {
    async fn converge_server(
        &self,
        server: &PolicyServer,
        policies: &[AnyPolicy],
    ) -> Result<(), ConvergeError> {
        let name = server.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("converge_server:{name}:{}", policies.len()));
        if state.ready_servers.contains(&name) {
            Ok(())
        } else {
            Err(ConvergeError::NotReady(name))
        }
    }

    async fn tear_down_server(&self, server: &PolicyServer) -> Result<(), ConvergeError> {
        let name = server.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("tear_down:{name}"));
        Ok(())
    }

    async fn converge_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError> {
        let server = policy.policy_server_name().to_string();
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("converge_policy:{}", policy.name()));
        if !state.ready_servers.contains(&server) {
            return Err(ConvergeError::NotReady(server));
        }
        state
            .registrations
            .insert(policy.registration_name(), policy.name());
        Ok(())
    }

    async fn retract_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("retract_policy:{}", policy.name()));
        if state.fail_next_retract {
            state.fail_next_retract = false;
            return Err(Self::unavailable());
        }
        // Absent entries count as confirmed removal, like a 404 delete.
        state.registrations.remove(&policy.registration_name());
        Ok(())
    }
}

/// Build a namespaced policy bound to the given server.
pub fn namespaced_policy(
    name: &str,
    namespace: &str,
    server: &str,
) -> admission_operator::crd::AdmissionPolicy {
    use admission_operator::crd::{AdmissionPolicy, AdmissionPolicySpec};
    let mut policy = AdmissionPolicy::new(
        name,
        AdmissionPolicySpec {
            policy_server: server.to_string(),
            module: "registry://ghcr.io/example/policies/noop:v1.0.0".to_string(),
            rules: Vec::new(),
            mutating: false,
            settings: None,
        },
    );
    policy.metadata.namespace = Some(namespace.to_string());
    policy
}

/// Build a cluster-scoped policy bound to the given server.
pub fn cluster_policy(
    name: &str,
    server: &str,
) -> admission_operator::crd::ClusterAdmissionPolicy {
    use admission_operator::crd::{ClusterAdmissionPolicy, ClusterAdmissionPolicySpec};
    ClusterAdmissionPolicy::new(
        name,
        ClusterAdmissionPolicySpec {
            policy_server: server.to_string(),
            module: "registry://ghcr.io/example/policies/noop:v1.0.0".to_string(),
            rules: Vec::new(),
            mutating: false,
            settings: None,
        },
    )
}

/// Build a policy server with the given name.
pub fn policy_server(name: &str) -> PolicyServer {
    use admission_operator::crd::PolicyServerSpec;
    PolicyServer::new(
        name,
        PolicyServerSpec {
            image: "ghcr.io/example/policy-server:v1.9.0".to_string(),
            replicas: 1,
            env: Default::default(),
            service_account_name: None,
            labels: Default::default(),
        },
    )
}

/// Mark a policy as terminating (deletion requested).
pub fn mark_terminating(policy: &mut admission_operator::crd::AdmissionPolicy) {
    policy.metadata.deletion_timestamp = Some(
        k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(k8s_openapi::chrono::Utc::now()),
    );
}
