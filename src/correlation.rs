//! Correlation payload stored alongside a policy server's generated
//! infrastructure.
//!
//! Webhook configurations and policy-server pods cannot carry ownership
//! references back to the policies they serve. The controller instead writes
//! a serialized policy-server-name -> policy-identity-list map into the
//! server's ConfigMap; the event router decodes it to recover which policies
//! must be re-converged when infrastructure changes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use thiserror::Error;

use crate::crd::{AnyPolicy, PolicyIdentity};
use crate::naming::POLICY_MAP_KEY;

/// Decode failure for a correlation payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// ConfigMap has no payload entry under the expected key
    #[error("config map has no {POLICY_MAP_KEY} entry")]
    MissingKey,

    /// Payload body failed to parse
    #[error("malformed policy map: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialized map of policy-server name to the policies scheduled on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PolicyMap(BTreeMap<String, Vec<PolicyIdentity>>);

impl PolicyMap {
    /// Build the payload for one policy server from its current dependents.
    pub fn for_server(server_name: &str, policies: &[AnyPolicy]) -> Self {
        let identities = policies.iter().map(AnyPolicy::identity).collect();
        Self(BTreeMap::from([(server_name.to_string(), identities)]))
    }

    /// Decode the payload out of a policy server's ConfigMap.
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self, PayloadError> {
        let body = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(POLICY_MAP_KEY))
            .ok_or(PayloadError::MissingKey)?;
        Ok(serde_json::from_str(body)?)
    }

    /// Serialize the payload for storage in a ConfigMap.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Every policy identity listed, across all servers in the map.
    pub fn identities(&self) -> impl Iterator<Item = &PolicyIdentity> {
        self.0.values().flatten()
    }
}
