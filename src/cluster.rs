use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{self, ApiResource, Scope};
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::render::Manifest;
use crate::resource::{FieldPath, ResourceRef};

pub const FIELD_MANAGER: &str = "cloudpak-installer";

/// Result of reading a single field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Present(Value),
    Absent,
}

/// The verbs the installer needs from the control plane. Transport agnostic.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create-or-update. Applying an identical manifest twice is a no-op.
    async fn apply(&self, manifest: &Manifest) -> Result<(), ClientError>;

    /// Fetch the whole object, `Ok(None)` when it does not exist.
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ClientError>;

    async fn patch(&self, resource: &ResourceRef, patch: &Value) -> Result<(), ClientError>;

    /// Deleting something already gone is not an error.
    async fn delete(&self, resource: &ResourceRef) -> Result<(), ClientError>;

    async fn get_field(
        &self,
        resource: &ResourceRef,
        path: &FieldPath,
    ) -> Result<FieldValue, ClientError> {
        let object = self.get(resource).await?;
        Ok(match object.as_ref().and_then(|o| path.lookup(o)) {
            Some(v) => FieldValue::Present(v.clone()),
            None => FieldValue::Absent,
        })
    }
}

#[derive(Clone, Debug)]
enum Operation<'a> {
    Apply(&'a Value),
    Get,
    Patch(&'a Value),
    Delete,
}

impl Operation<'_> {
    fn verb(&self) -> &'static str {
        match self {
            Operation::Apply(_) => "apply",
            Operation::Get => "get",
            Operation::Patch(_) => "patch",
            Operation::Delete => "delete",
        }
    }
}

/// `ClusterClient` backed by the Kubernetes API through kube-rs.
pub struct KubeClusterClient {
    client: Client,
    resources: Mutex<HashMap<String, (ApiResource, bool)>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> KubeClusterClient {
        KubeClusterClient {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    pub async fn try_default() -> Result<KubeClusterClient, kube::Error> {
        Ok(KubeClusterClient::new(Client::try_default().await?))
    }

    /// Resolve the plural and scope of a kind. Discovery can lag right after
    /// an operator installs its CRDs, so fall back to a pluralized guess.
    async fn api_resource(&self, resource: &ResourceRef) -> (ApiResource, bool) {
        let key = format!("{}/{}", resource.api_version, resource.kind);
        if let Some(found) = self.resources.lock().await.get(&key) {
            return found.clone();
        }

        let (group, version) = match resource.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), resource.api_version.clone()),
        };
        let gvk = GroupVersionKind::gvk(&group, &version, &resource.kind);

        match discovery::pinned_kind(&self.client, &gvk).await {
            Ok((ar, caps)) => {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                let entry = (ar, namespaced);
                self.resources.lock().await.insert(key, entry.clone());
                entry
            }
            Err(e) => {
                debug!(
                    kind = %resource.kind,
                    api_version = %resource.api_version,
                    error = %e,
                    "Kind not found in discovery, using fallback pluralization"
                );
                let mut ar = ApiResource::from_gvk(&gvk);
                ar.plural = pluralize_kind(&resource.kind);
                (ar, resource.namespace.is_some())
            }
        }
    }

    async fn api_for(&self, resource: &ResourceRef) -> Api<DynamicObject> {
        let (ar, namespaced) = self.api_resource(resource).await;
        match (&resource.namespace, namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    async fn perform_operation(
        &self,
        resource: &ResourceRef,
        operation: Operation<'_>,
    ) -> Result<Option<Value>, ClientError> {
        let api = self.api_for(resource).await;
        debug!(resource = %resource, verb = operation.verb(), "Cluster operation");

        match operation {
            Operation::Apply(document) => {
                let params = PatchParams::apply(FIELD_MANAGER).force();
                api.patch(&resource.name, &params, &Patch::Apply(document))
                    .await?;
                info!(resource = %resource, "Applied");
                Ok(None)
            }
            Operation::Get => match api.get_opt(&resource.name).await? {
                Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
                None => Ok(None),
            },
            Operation::Patch(patch) => {
                api.patch(&resource.name, &PatchParams::default(), &Patch::Merge(patch))
                    .await?;
                info!(resource = %resource, "Patched");
                Ok(None)
            }
            Operation::Delete => match api.delete(&resource.name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!(resource = %resource, "Deleted");
                    Ok(None)
                }
                Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, manifest: &Manifest) -> Result<(), ClientError> {
        self.perform_operation(&manifest.resource, Operation::Apply(&manifest.document))
            .await?;
        Ok(())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ClientError> {
        self.perform_operation(resource, Operation::Get).await
    }

    async fn patch(&self, resource: &ResourceRef, patch: &Value) -> Result<(), ClientError> {
        self.perform_operation(resource, Operation::Patch(patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), ClientError> {
        self.perform_operation(resource, Operation::Delete).await?;
        Ok(())
    }
}

fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with("ss") || lower.ends_with('x') {
        format!("{}es", lower)
    } else if lower.ends_with('s') {
        lower
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_component_kinds() {
        assert_eq!(pluralize_kind("EventStreams"), "eventstreams");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("QueueManager"), "queuemanagers");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("CatalogSource"), "catalogsources");
    }
}
