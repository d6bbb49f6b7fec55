//! Finalizer protocol helpers.
//!
//! The finalizer is the only ordering guarantee the controllers enforce:
//! it is added before any side effect is taken on behalf of an object, and
//! removed only as the terminal step of a deletion branch, after the
//! corresponding cleanup is confirmed complete.

use kube::{Api, Resource, ResourceExt, api::Patch, api::PatchParams};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::{is_api_conflict, is_api_not_found, Error};
use crate::naming::FINALIZER;

/// Check whether an object already carries the finalizer.
pub fn has_finalizer<T: Resource>(resource: &T) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer if absent.
pub async fn ensure<T>(api: &Api<T>, resource: &T) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    if has_finalizer(resource) {
        return Ok(());
    }

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": resource.resource_version(),
        }
    });
    api.patch(
        &resource.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Remove the finalizer as the terminal step of a deletion branch.
///
/// Both a vanished object and a version conflict mean someone else already
/// advanced deletion; neither is a failure here.
pub async fn remove<T>(api: &Api<T>, name: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(e) if is_api_not_found(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();
    let Some(position) = finalizers.iter().position(|f| f == FINALIZER) else {
        return Ok(());
    };
    finalizers.remove(position);

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": resource.resource_version(),
        }
    });
    match api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_api_not_found(&e) || is_api_conflict(&e) => {
            debug!(name = %name, "Object advanced concurrently during finalizer removal");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
