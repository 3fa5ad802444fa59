//! The cluster gateway trait
//!
//! The orchestrator talks to the cluster exclusively through this seam. The
//! production implementation is [`crate::client::KubeGateway`]; tests drive
//! the orchestrator with scripted in-memory gateways.

use async_trait::async_trait;

use capstan_core::{GroupVersionKind, ObjectRef, UnstructuredObject};

use crate::error::Result;

/// Options for server-side apply patches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Ask the server to simulate the mutation
    pub force_dry_run: bool,
    /// Forcibly claim ownership of conflicting fields
    pub force_apply: bool,
}

/// Options for full-object updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub force_dry_run: bool,
}

/// Options for deletions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub force_dry_run: bool,
}

/// A warning returned by the API server alongside a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiWarning {
    pub text: String,
}

impl ApiWarning {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Typed operations against the remote API
///
/// Implementations must be safe to share across worker tasks; one instance is
/// used for the whole run.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Server-side apply
    async fn patch(
        &self,
        obj: &UnstructuredObject,
        options: &PatchOptions,
    ) -> Result<(UnstructuredObject, Vec<ApiWarning>)>;

    /// Full replace; rejected by the server on a stale resourceVersion
    async fn update(
        &self,
        obj: &UnstructuredObject,
        options: &UpdateOptions,
    ) -> Result<(UnstructuredObject, Vec<ApiWarning>)>;

    /// Delete a single object. `NotFound` is returned as an error; callers
    /// that treat it as success must check [`crate::error::ClusterError::is_not_found`].
    async fn delete(&self, reference: &ObjectRef, options: &DeleteOptions)
        -> Result<Vec<ApiWarning>>;

    /// Read a single object
    async fn get(&self, reference: &ObjectRef) -> Result<(UnstructuredObject, Vec<ApiWarning>)>;

    /// Enumerate concrete GVKs for possibly-wildcard inputs; a `None` version
    /// matches every served version of the group/kind
    async fn get_gvks(
        &self,
        group: &str,
        version: Option<&str>,
        kind: &str,
    ) -> Result<Vec<GroupVersionKind>>;

    /// Refresh the cached API surface, picking up freshly installed kinds
    async fn rediscover_resources(&self) -> Result<()>;

    /// Normalize a desired object for server-side apply. Idempotent.
    fn fix_object_for_patch(&self, obj: &UnstructuredObject) -> UnstructuredObject {
        fix_object_for_patch(obj)
    }
}

/// Strip server-managed noise that must never be part of an apply request
pub fn fix_object_for_patch(obj: &UnstructuredObject) -> UnstructuredObject {
    let mut fixed = obj.clone();
    fixed.remove_path("metadata.managedFields");
    fixed.remove_path("metadata.creationTimestamp");
    fixed.remove_path("status");
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fix_object_for_patch_is_idempotent() {
        let obj = UnstructuredObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cfg",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": [{"manager": "kubectl"}]
            },
            "status": {"phase": "Active"},
            "data": {"k": "v"}
        }))
        .unwrap();

        let fixed = fix_object_for_patch(&obj);
        assert!(fixed.get_path("metadata.managedFields").is_none());
        assert!(fixed.get_path("metadata.creationTimestamp").is_none());
        assert!(fixed.get_path("status").is_none());
        assert!(fixed.get_path("data.k").is_some());

        assert_eq!(fix_object_for_patch(&fixed), fixed);
    }
}
