//! Capstan Kube - Server-side-apply orchestration
//!
//! This crate drives ordered deployment items against a cluster:
//! - **Cluster Gateway**: Typed Patch/Update/Delete/Get operations with a
//!   distinguishable error taxonomy, backed by kube-rs in production
//! - **Apply State Machine**: Per-object patch → conflict-resolve → update →
//!   delete+recreate ladder with mid-run CRD rediscovery
//! - **Hooks**: Weight-ordered lifecycle hooks with deletion policies
//! - **Readiness**: Pluggable validators polled until ready/failed/timeout
//! - **Scheduler**: Bounded-parallel workers honoring barrier items
//! - **Progress and Issues**: Per-item progress contexts and a shared
//!   errors-and-warnings sink

pub mod annotations;
pub mod apply;
pub mod client;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod health;
pub mod hooks;
pub mod progress;
pub mod remote;
pub mod sink;

pub use annotations::DeletePolicy;
pub use apply::{ApplyUtil, ApplyUtilOptions};
pub use client::KubeGateway;
pub use diff::{resolve_field_manager_conflicts, LostOwnership};
pub use error::{ClusterError, ConflictCause, ConflictStatus, Result};
pub use gateway::{
    fix_object_for_patch, ApiWarning, ClusterGateway, DeleteOptions, PatchOptions, UpdateOptions,
};
pub use health::{ConditionValidator, NoopValidator, ObjectValidator, ValidateResult, ValidationError};
pub use hooks::{determine_hooks, Hook, HookPhase, HooksUtil};
pub use progress::{
    ConsoleProgress, NullProgress, ProgressBackend, ProgressCtx, ProgressLevel, ProgressReporter,
};
pub use remote::RemoteObjects;
pub use sink::{DeploymentIssue, ErrorsAndWarnings};
