//! Domain collaborator: convergence of a policy server's infrastructure and
//! of policy webhook registrations.
//!
//! The controllers talk to this layer through [`AdmissionBackend`]; the
//! trait boundary is what keeps the reconciliation core testable without a
//! cluster. The distinguished [`ConvergeError::NotReady`] condition is not a
//! failure: reconcilers translate it into a fixed-delay requeue.

mod backend;

pub use backend::KubeBackend;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{AnyPolicy, PolicyServer};

/// Error type for backend operations.
#[derive(Error, Debug)]
pub enum ConvergeError {
    /// Dependent infrastructure exists but is not yet usable. Expected
    /// during rollout; handled with a bounded requeue, never surfaced as a
    /// reconciliation failure.
    #[error("policy server {0} is not ready")]
    NotReady(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvergeError {
    /// Check whether this is the distinguished not-ready condition.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ConvergeError::NotReady(_))
    }
}

/// Converges admission infrastructure and registrations.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Converge a policy server's generated infrastructure toward its spec,
    /// including the configuration for the given dependent policies.
    async fn converge_server(
        &self,
        server: &PolicyServer,
        policies: &[AnyPolicy],
    ) -> Result<(), ConvergeError>;

    /// Tear down whatever garbage collection cannot reach once the policy
    /// server is gone. Runs only when zero non-terminating policies
    /// reference the server.
    async fn tear_down_server(&self, server: &PolicyServer) -> Result<(), ConvergeError>;

    /// Create or update the webhook registration entry for one policy.
    async fn converge_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError>;

    /// Remove the webhook registration entry for one policy. Must be
    /// confirmed complete before the policy's finalizer may be cleared.
    async fn retract_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError>;
}
