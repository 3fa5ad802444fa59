//! Kubernetes-backed gateway implementation
//!
//! `KubeGateway` resolves kinds through a cached `Discovery` snapshot and
//! performs all mutations with Server-Side Apply semantics under a fixed
//! field manager. The discovery cache can be refreshed mid-run when freshly
//! installed CRDs introduce kinds the initial snapshot does not know.

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
    core::GroupVersionKind as KubeGvk,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client,
};
use tokio::sync::RwLock;

use capstan_core::{GroupVersionKind, ObjectRef, UnstructuredObject};

use crate::error::{ClusterError, ConflictCause, ConflictStatus, Result};
use crate::gateway::{ApiWarning, ClusterGateway, DeleteOptions, PatchOptions, UpdateOptions};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "capstan";

/// Gateway backed by a live cluster connection
pub struct KubeGateway {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeGateway {
    /// Connect and run the initial discovery pass
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(classify_kube_error)?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
        let kube_gvk = KubeGvk::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let discovery = self.discovery.read().await;
        discovery
            .resolve_gvk(&kube_gvk)
            .ok_or_else(|| ClusterError::NoMatch(gvk.to_string()))
    }

    fn api_for(
        &self,
        resource: &ApiResource,
        capabilities: &ApiCapabilities,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        if capabilities.scope == Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), namespace.unwrap_or("default"), resource)
        } else {
            Api::all_with(self.client.clone(), resource)
        }
    }

    async fn api_for_ref(&self, reference: &ObjectRef) -> Result<Api<DynamicObject>> {
        let (resource, capabilities) = self.resolve(&reference.gvk).await?;
        Ok(self.api_for(&resource, &capabilities, reference.namespace.as_deref()))
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn patch(
        &self,
        obj: &UnstructuredObject,
        options: &PatchOptions,
    ) -> Result<(UnstructuredObject, Vec<ApiWarning>)> {
        let reference = obj.object_ref();
        let api = self.api_for_ref(&reference).await?;

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = options.force_apply;
        params.dry_run = options.force_dry_run;

        let result = api
            .patch(&reference.name, &params, &Patch::Apply(obj.to_value()))
            .await
            .map_err(classify_kube_error)?;
        // Warning headers are not surfaced by the typed client.
        Ok((from_dynamic(result)?, Vec::new()))
    }

    async fn update(
        &self,
        obj: &UnstructuredObject,
        options: &UpdateOptions,
    ) -> Result<(UnstructuredObject, Vec<ApiWarning>)> {
        let reference = obj.object_ref();
        let api = self.api_for_ref(&reference).await?;

        let mut params = PostParams::default();
        params.dry_run = options.force_dry_run;
        params.field_manager = Some(FIELD_MANAGER.to_string());

        let dynamic = to_dynamic(obj)?;
        let result = api
            .replace(&reference.name, &params, &dynamic)
            .await
            .map_err(classify_kube_error)?;
        Ok((from_dynamic(result)?, Vec::new()))
    }

    async fn delete(
        &self,
        reference: &ObjectRef,
        options: &DeleteOptions,
    ) -> Result<Vec<ApiWarning>> {
        let api = self.api_for_ref(reference).await?;

        let params = DeleteParams {
            dry_run: options.force_dry_run,
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };

        api.delete(&reference.name, &params)
            .await
            .map_err(classify_kube_error)?;
        Ok(Vec::new())
    }

    async fn get(&self, reference: &ObjectRef) -> Result<(UnstructuredObject, Vec<ApiWarning>)> {
        let api = self.api_for_ref(reference).await?;
        let result = api.get(&reference.name).await.map_err(classify_kube_error)?;
        Ok((from_dynamic(result)?, Vec::new()))
    }

    async fn get_gvks(
        &self,
        group: &str,
        version: Option<&str>,
        kind: &str,
    ) -> Result<Vec<GroupVersionKind>> {
        let discovery = self.discovery.read().await;
        let mut gvks = Vec::new();
        for api_group in discovery.groups() {
            if api_group.name() != group {
                continue;
            }
            let versions: Vec<String> = api_group.versions().map(|v| v.to_string()).collect();
            for served in versions {
                if let Some(wanted) = version {
                    if wanted != served {
                        continue;
                    }
                }
                for (resource, _capabilities) in api_group.versioned_resources(&served) {
                    if resource.kind == kind {
                        gvks.push(GroupVersionKind::new(group, served.clone(), kind));
                    }
                }
            }
        }
        Ok(gvks)
    }

    async fn rediscover_resources(&self) -> Result<()> {
        let fresh = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(classify_kube_error)?;
        *self.discovery.write().await = fresh;
        Ok(())
    }
}

fn to_dynamic(obj: &UnstructuredObject) -> Result<DynamicObject> {
    serde_json::from_value(obj.to_value())
        .map_err(|e| ClusterError::Api(format!("object is not a valid API resource: {}", e)))
}

fn from_dynamic(obj: DynamicObject) -> Result<UnstructuredObject> {
    let value = serde_json::to_value(obj)
        .map_err(|e| ClusterError::Api(format!("unexpected API response shape: {}", e)))?;
    UnstructuredObject::from_value(value)
        .map_err(|e| ClusterError::Api(format!("unexpected API response shape: {}", e)))
}

/// Map kube transport errors onto the taxonomy the apply ladder consumes
fn classify_kube_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::NotFound(response.message),
            409 => ClusterError::Conflict(parse_conflict_status(&response.message)),
            500 => ClusterError::InternalError(response.message),
            _ => ClusterError::Api(format!("{} ({})", response.message, response.reason)),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

/// Reconstruct conflict causes from an apiserver 409 message
///
/// The typed error response does not carry `status.details.causes`, so the
/// field paths are recovered from the server's message, which reads like:
/// `Apply failed with 1 conflict: conflict with "kubectl" using apps/v1: .spec.replicas`
pub(crate) fn parse_conflict_status(message: &str) -> ConflictStatus {
    let normalized = message.replace("conflicts with", "conflict with");
    let mut causes = Vec::new();
    for part in normalized.split("conflict with ").skip(1) {
        let Some((manager, fields)) = part.split_once(": ") else {
            continue;
        };
        for field in fields.split(',') {
            let field = field.trim().trim_start_matches('.');
            if field.is_empty() {
                continue;
            }
            causes.push(ConflictCause {
                field: field.to_string(),
                message: format!("conflict with {}", manager),
            });
        }
    }
    ConflictStatus { causes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_conflict() {
        let status = parse_conflict_status(
            r#"Apply failed with 1 conflict: conflict with "kubectl-client-side-apply" using apps/v1: .spec.replicas"#,
        );
        assert_eq!(status.causes.len(), 1);
        assert_eq!(status.causes[0].field, "spec.replicas");
        assert!(status.causes[0].message.contains("kubectl-client-side-apply"));
    }

    #[test]
    fn test_parse_multiple_conflicting_fields() {
        let status = parse_conflict_status(
            r#"Apply failed with 2 conflicts: conflicts with "hpa-controller" using apps/v1: .spec.replicas, .spec.minReadySeconds"#,
        );
        let fields: Vec<&str> = status.causes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["spec.replicas", "spec.minReadySeconds"]);
    }

    #[test]
    fn test_parse_unrecognized_message_yields_no_causes() {
        let status = parse_conflict_status("Operation cannot be fulfilled: object was modified");
        assert!(status.causes.is_empty());
    }

    #[test]
    fn test_classify_api_errors() {
        let make = |code: u16, reason: &str| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "m".to_string(),
                reason: reason.to_string(),
                code,
            })
        };
        assert!(classify_kube_error(make(404, "NotFound")).is_not_found());
        assert!(classify_kube_error(make(409, "Conflict")).is_conflict());
        assert!(classify_kube_error(make(500, "InternalError")).is_internal());
        assert!(matches!(
            classify_kube_error(make(403, "Forbidden")),
            ClusterError::Api(_)
        ));
    }
}
