//! Kubernetes-backed implementation of [`AdmissionBackend`].

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::crd::{AnyPolicy, PolicyServer};
use crate::naming::{
    self, FIELD_MANAGER, MANAGED_BY_LABEL_KEY, POLICY_SERVER_LABEL_KEY,
};
use crate::resources;

use super::{AdmissionBackend, ConvergeError};

/// Backend converging infrastructure through the Kubernetes API.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    deployments_namespace: String,
}

impl KubeBackend {
    /// Create a backend placing generated infrastructure in the given
    /// namespace.
    pub fn new(client: Client, deployments_namespace: impl Into<String>) -> Self {
        Self {
            client,
            deployments_namespace: deployments_namespace.into(),
        }
    }

    async fn apply<K>(&self, api: &Api<K>, obj: &K) -> Result<(), kube::Error>
    where
        K: Resource + Serialize + DeserializeOwned + Clone + std::fmt::Debug,
    {
        api.patch(
            &obj.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await?;
        Ok(())
    }

    /// Ready replica count of a policy server's deployment; 0 when the
    /// deployment does not exist yet.
    async fn ready_replicas(&self, server_name: &str) -> Result<i32, kube::Error> {
        let api: Api<Deployment> =
            Api::namespaced(self.client.clone(), &self.deployments_namespace);
        let name = naming::policy_server_deployment_name(server_name);
        match api.get(&name).await {
            Ok(deployment) => Ok(deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn delete_registrations_for<K>(&self, server_name: &str) -> Result<(), kube::Error>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let selector = format!(
            "{MANAGED_BY_LABEL_KEY}={FIELD_MANAGER},{POLICY_SERVER_LABEL_KEY}={server_name}"
        );
        let registrations = api.list(&ListParams::default().labels(&selector)).await?;
        for registration in registrations {
            match api
                .delete(&registration.name_any(), &DeleteParams::default())
                .await
            {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdmissionBackend for KubeBackend {
    async fn converge_server(
        &self,
        server: &PolicyServer,
        policies: &[AnyPolicy],
    ) -> Result<(), ConvergeError> {
        let name = server.name_any();
        let namespace = &self.deployments_namespace;

        let config_map = resources::config_map::generate(server, namespace, policies)?;
        let cm_api = Api::namespaced(self.client.clone(), namespace);
        self.apply(&cm_api, &config_map).await?;

        let deployment = resources::deployment::generate(server, namespace);
        let deploy_api = Api::namespaced(self.client.clone(), namespace);
        self.apply(&deploy_api, &deployment).await?;

        let service = resources::service::generate(server, namespace);
        let svc_api = Api::namespaced(self.client.clone(), namespace);
        self.apply(&svc_api, &service).await?;

        debug!(server = %name, "Applied policy server infrastructure");

        // Rollout completeness gates the Ready condition and the policies
        // waiting on this server.
        if self.ready_replicas(&name).await? < server.spec.replicas {
            return Err(ConvergeError::NotReady(name));
        }
        Ok(())
    }

    async fn tear_down_server(&self, server: &PolicyServer) -> Result<(), ConvergeError> {
        let name = server.name_any();

        // Generated infrastructure is garbage-collected through owner
        // references; registrations are cluster-scoped and must be removed
        // here.
        self.delete_registrations_for::<ValidatingWebhookConfiguration>(&name)
            .await?;
        self.delete_registrations_for::<MutatingWebhookConfiguration>(&name)
            .await?;

        debug!(server = %name, "Removed webhook registrations");
        Ok(())
    }

    async fn converge_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError> {
        let server_name = policy.policy_server_name().to_string();

        let servers: Api<PolicyServer> = Api::all(self.client.clone());
        match servers.get(&server_name).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(ConvergeError::NotReady(server_name));
            }
            Err(e) => return Err(e.into()),
        }

        // At least one evaluation replica must be serving before the API
        // server is pointed at it.
        if self.ready_replicas(&server_name).await? < 1 {
            return Err(ConvergeError::NotReady(server_name));
        }

        if policy.mutating() {
            let registration =
                resources::webhook::generate_mutating(policy, &self.deployments_namespace);
            let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
            self.apply(&api, &registration).await?;
        } else {
            let registration =
                resources::webhook::generate_validating(policy, &self.deployments_namespace);
            let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
            self.apply(&api, &registration).await?;
        }

        debug!(policy = %policy.name(), server = %policy.policy_server_name(), "Registered policy");
        Ok(())
    }

    async fn retract_policy(&self, policy: &AnyPolicy) -> Result<(), ConvergeError> {
        let name = policy.registration_name();

        let result = if policy.mutating() {
            let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
            api.delete(&name, &DeleteParams::default()).await.map(|_| ())
        } else {
            let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
            api.delete(&name, &DeleteParams::default()).await.map(|_| ())
        };

        match result {
            Ok(()) => {}
            // Already gone counts as confirmed removal.
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        debug!(policy = %policy.name(), "Retracted policy registration");
        Ok(())
    }
}
