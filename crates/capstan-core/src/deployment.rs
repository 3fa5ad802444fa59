//! Deployment items
//!
//! A deployment item is one ordered unit of work for the orchestrator: a set
//! of desired objects (regular and hook candidates mixed), deletion
//! directives, and per-item scheduling flags. Items are produced by the
//! project loader, which is outside this crate.

use serde::{Deserialize, Serialize};

use crate::objects::UnstructuredObject;

/// Deletion directive attached to a deployment item
///
/// `version` may be omitted, in which case every served version of the
/// `(group, kind)` pair is enumerated through the cluster gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectRef {
    #[serde(default)]
    pub group: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,
}

/// One unit of deployment work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentItem {
    /// Display name for progress and logging (usually the item's path
    /// relative to the deployment project)
    pub name: String,

    /// Desired objects, apply and hook candidates mixed
    #[serde(default)]
    pub objects: Vec<UnstructuredObject>,

    /// Objects to delete before anything is applied
    #[serde(default)]
    pub delete_objects: Vec<DeleteObjectRef>,

    /// Per-item readiness default from the item's config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_wait_readiness: Option<bool>,

    /// Per-item readiness default from the project definition
    #[serde(default)]
    pub wait_readiness: bool,

    /// Barrier flag from the item's config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_barrier: Option<bool>,

    /// Barrier flag from the project definition
    #[serde(default)]
    pub barrier: bool,

    /// Result of the inclusion/exclusion filters evaluated by the loader
    #[serde(default = "default_true")]
    pub include_for_deploy: bool,
}

fn default_true() -> bool {
    true
}

impl DeploymentItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include_for_deploy: true,
            ..Default::default()
        }
    }

    /// Whether the scheduler must drain in-flight work after dispatching
    /// this item
    pub fn is_barrier(&self) -> bool {
        self.config_barrier.unwrap_or(false) || self.barrier
    }

    /// Per-item readiness default, before per-object annotations are applied
    pub fn default_wait_readiness(&self) -> bool {
        self.config_wait_readiness.unwrap_or(false) || self.wait_readiness
    }

    /// Whether the item passed the deploy inclusion filters
    pub fn check_inclusion_for_deploy(&self) -> bool {
        self.include_for_deploy
    }
}
