//! Error types for the controllers.
//!
//! Classification drives retry behavior: not-found is absorbed as success,
//! version conflicts are absorbed or requeued depending on the path, and
//! everything else feeds the scheduler's default backoff.

use std::time::Duration;

use thiserror::Error;

use crate::admission::ConvergeError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Backend convergence failure (the not-ready condition never reaches
    /// this variant; reconcilers translate it into a delayed requeue first)
    #[error("reconciliation error: {0}")]
    Converge(#[from] ConvergeError),

    /// One or more dependent policies could not be deleted
    #[error("could not remove all policies bound to policy server {server}")]
    DependentCleanup {
        server: String,
        errors: Vec<kube::Error>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Check whether a Kubernetes API error is a 404.
pub fn is_api_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Check whether a Kubernetes API error is an optimistic-concurrency
/// conflict (409).
pub fn is_api_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(e) => is_api_not_found(e),
            _ => false,
        }
    }

    /// Check if this error should be retried promptly
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => retryable_kube_error(e),
            // A failed converge or dependent cleanup is retried; the next
            // attempt re-reads fresh state.
            Error::Converge(_) | Error::DependentCleanup { .. } => true,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(3600)
        }
    }
}

fn retryable_kube_error(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code >= 500 || e.code == 429 || e.code == 409)
        || matches!(err, kube::Error::Service(_))
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: String::new(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_not_found_classification() {
        assert!(is_api_not_found(&api_error(404)));
        assert!(!is_api_not_found(&api_error(409)));
        assert!(Error::Kube(api_error(404)).is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(is_api_conflict(&api_error(409)));
        assert!(!is_api_conflict(&api_error(404)));
    }

    #[test]
    fn test_dependent_cleanup_is_retryable() {
        let err = Error::DependentCleanup {
            server: "default".to_string(),
            errors: vec![api_error(500)],
        };
        assert!(err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(Error::Kube(api_error(500)).is_retryable());
        assert!(Error::Kube(api_error(429)).is_retryable());
        assert!(!Error::Kube(api_error(404)).is_retryable());
    }
}
