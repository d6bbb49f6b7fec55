//! Reverse lookup from a policy-server name to the policies referencing it.
//!
//! Backed by the reflector stores the controllers already maintain; the view
//! may lag true cluster state. Callers tolerate staleness: a stale answer is
//! reconciled away by the next re-trigger, never locked around.

use std::collections::BTreeSet;

use kube::runtime::reflector::Store;

use crate::crd::{AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, PolicyResource};

/// Index over both policy variants.
#[derive(Clone)]
pub struct PolicyIndex {
    namespaced: Store<AdmissionPolicy>,
    cluster: Store<ClusterAdmissionPolicy>,
}

impl PolicyIndex {
    /// Create an index over the given reflector stores.
    pub fn new(namespaced: Store<AdmissionPolicy>, cluster: Store<ClusterAdmissionPolicy>) -> Self {
        Self {
            namespaced,
            cluster,
        }
    }

    /// All policies, of either variant, referencing the given policy server,
    /// deduplicated by identity.
    pub fn policies_referencing(&self, server_name: &str) -> Vec<AnyPolicy> {
        let mut seen = BTreeSet::new();
        let mut policies = Vec::new();

        for policy in self.namespaced.state() {
            if policy.policy_server_name() == server_name && seen.insert(policy.identity()) {
                policies.push(policy.to_any());
            }
        }
        for policy in self.cluster.state() {
            if policy.policy_server_name() == server_name && seen.insert(policy.identity()) {
                policies.push(policy.to_any());
            }
        }

        policies
    }
}
