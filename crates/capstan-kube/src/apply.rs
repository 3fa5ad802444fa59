//! The apply orchestrator
//!
//! `ApplyUtil` drives a list of deployment items against the cluster with
//! server-side apply semantics. Each object walks a retry ladder:
//!
//! 1. patch (server-side apply)
//! 2. on a field-manager conflict: resolve or force, then patch again
//! 3. on other errors: update with the remote resourceVersion (replace)
//! 4. as a last resort: delete and re-apply (force replace)
//!
//! Apply should succeed in the common path; conflicts are semantically rich
//! and solvable without destruction; replace preserves object identity where
//! apply cannot; delete+recreate may sever owner references and controller
//! state, so it only runs when explicitly enabled.
//!
//! Items run concurrently under a bounded worker budget. A barrier item
//! forces the scheduler to drain all in-flight work after dispatching it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use capstan_core::{random_suffix, DeploymentItem, ObjectRef, UnstructuredObject};

use crate::diff::resolve_field_manager_conflicts;
use crate::error::{ClusterError, ConflictStatus, Result};
use crate::gateway::{ApiWarning, ClusterGateway, DeleteOptions, PatchOptions, UpdateOptions};
use crate::health::ObjectValidator;
use crate::hooks::{determine_hooks, HookPhase, HooksUtil};
use crate::progress::{ProgressCtx, ProgressReporter};
use crate::remote::RemoteObjects;
use crate::sink::ErrorsAndWarnings;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Options controlling one apply run
#[derive(Debug, Clone)]
pub struct ApplyUtilOptions {
    /// Skip conflict resolution and forcibly claim conflicting fields
    pub force_apply: bool,
    /// Fall back from apply to update on unexpected errors
    pub replace_on_error: bool,
    /// Fall back further to delete+recreate
    pub force_replace_on_error: bool,
    /// Simulate every mutation server-side
    pub dry_run: bool,
    /// The first recorded error stops dispatching further work
    pub abort_on_error: bool,
    /// Default per-object readiness timeout; zero waits forever
    pub wait_object_timeout: Duration,
    /// Disable all readiness waits
    pub no_wait: bool,
    /// Worker budget for concurrent deployment items
    pub parallelism: usize,
}

impl Default for ApplyUtilOptions {
    fn default() -> Self {
        Self {
            force_apply: false,
            replace_on_error: false,
            force_replace_on_error: false,
            dry_run: false,
            abort_on_error: false,
            wait_object_timeout: Duration::ZERO,
            no_wait: false,
            parallelism: 8,
        }
    }
}

/// Shared run state, all of it behind one mutex
#[derive(Debug, Default)]
struct ApplyState {
    applied_objects: HashMap<ObjectRef, UnstructuredObject>,
    applied_hook_objects: HashMap<ObjectRef, UnstructuredObject>,
    deleted_objects: HashSet<ObjectRef>,
    deleted_hook_objects: HashSet<ObjectRef>,
    abort_signal: bool,
    deployed_new_crd: bool,
}

/// Concurrent server-side-apply orchestrator for one run
pub struct ApplyUtil<G: ClusterGateway> {
    sink: Arc<ErrorsAndWarnings>,
    deployments: Vec<Arc<DeploymentItem>>,
    remote_objects: Arc<RemoteObjects>,
    gateway: Arc<G>,
    validator: Arc<dyn ObjectValidator>,
    options: ApplyUtilOptions,
    state: Mutex<ApplyState>,
}

impl<G: ClusterGateway + 'static> ApplyUtil<G> {
    pub fn new(
        sink: Arc<ErrorsAndWarnings>,
        deployments: Vec<DeploymentItem>,
        remote_objects: Arc<RemoteObjects>,
        gateway: Arc<G>,
        validator: Arc<dyn ObjectValidator>,
        options: ApplyUtilOptions,
    ) -> Self {
        Self {
            sink,
            deployments: deployments.into_iter().map(Arc::new).collect(),
            remote_objects,
            gateway,
            validator,
            options,
            state: Mutex::new(ApplyState {
                // Assume someone deployed CRDs in the meantime, so the first
                // NoMatch of the run still triggers one rediscovery.
                deployed_new_crd: true,
                ..Default::default()
            }),
        }
    }

    // ========== Run state ==========

    fn state(&self) -> MutexGuard<'_, ApplyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_result(&self, applied: UnstructuredObject, hook: bool) {
        let reference = applied.object_ref();
        let mut state = self.state();
        if hook {
            state.applied_hook_objects.insert(reference.clone(), applied.clone());
        }
        state.applied_objects.insert(reference, applied);
    }

    fn handle_api_warnings(&self, reference: &ObjectRef, warnings: Vec<ApiWarning>) {
        self.sink.add_api_warnings(reference, warnings);
    }

    pub fn handle_warning(&self, reference: &ObjectRef, warning: impl std::fmt::Display) {
        self.sink.add_warning(reference, warning);
    }

    pub fn handle_error(&self, reference: &ObjectRef, error: impl std::fmt::Display) {
        if self.options.abort_on_error {
            self.state().abort_signal = true;
        }
        self.sink.add_error(reference, error);
    }

    pub fn had_error(&self, reference: &ObjectRef) -> bool {
        self.sink.had_error(reference)
    }

    /// Whether the abort signal was raised; once true it stays true
    pub fn abort_requested(&self) -> bool {
        self.state().abort_signal
    }

    pub fn applied_objects(&self) -> HashMap<ObjectRef, UnstructuredObject> {
        self.state().applied_objects.clone()
    }

    pub fn applied_hook_objects(&self) -> HashMap<ObjectRef, UnstructuredObject> {
        self.state().applied_hook_objects.clone()
    }

    pub fn deleted_objects(&self) -> HashSet<ObjectRef> {
        self.state().deleted_objects.clone()
    }

    pub fn deleted_hook_objects(&self) -> HashSet<ObjectRef> {
        self.state().deleted_hook_objects.clone()
    }

    // ========== Deletion ==========

    /// Delete a single object, honoring dry-run. NotFound is not an error;
    /// the return value tells whether the object actually went away.
    pub async fn delete_object(&self, reference: &ObjectRef, hook: bool) -> bool {
        let options = DeleteOptions {
            force_dry_run: self.options.dry_run,
        };
        match self.gateway.delete(reference, &options).await {
            Ok(warnings) => {
                self.handle_api_warnings(reference, warnings);
                let mut state = self.state();
                if hook {
                    state.deleted_hook_objects.insert(reference.clone());
                } else {
                    state.deleted_objects.insert(reference.clone());
                }
                true
            }
            Err(err) => {
                if !err.is_not_found() {
                    self.handle_error(reference, err);
                }
                false
            }
        }
    }

    // ========== The retry ladder ==========

    /// Apply one object through the full ladder
    ///
    /// `replaced` marks objects whose deletion was simulated earlier in a
    /// dry-run; they get a dummy name so the server produces a create diff
    /// instead of a modify diff against the still-existing object.
    pub async fn apply_object(&self, x: &UnstructuredObject, replaced: bool, hook: bool) {
        let reference = x.object_ref();
        debug!(object = %reference, "applying object");

        let mut x = self.gateway.fix_object_for_patch(x);
        let remote_object = self.remote_objects.get_remote_object(&reference);

        let mut dummy_name = None;
        if self.options.dry_run && replaced {
            if let Some(remote) = remote_object {
                let real_name = remote.name();
                let tmp_name = format!("{}-{}", x.name(), random_suffix(8));
                x.set_name(&tmp_name);
                dummy_name = Some((tmp_name, real_name));
            }
        }

        let options = PatchOptions {
            force_dry_run: self.options.dry_run,
            force_apply: false,
        };
        let mut outcome = self.gateway.patch(&x, &options).await;
        match self.should_retry_for_new_crds(&outcome).await {
            Ok(true) => outcome = self.gateway.patch(&x, &options).await,
            Ok(false) => {}
            Err(err) => outcome = Err(err),
        }

        if let (Ok((result, _)), Some((tmp_name, real_name))) = (&mut outcome, &dummy_name) {
            result.replace_keys(tmp_name, real_name);
            result.replace_values(tmp_name, real_name);
        }

        match outcome {
            Ok((result, warnings)) => {
                self.handle_api_warnings(&reference, warnings);
                self.handle_result(result, hook);
            }
            Err(err) if err.is_no_match() => self.handle_error(&reference, err),
            Err(ClusterError::Conflict(status)) => {
                self.retry_apply_with_conflicts(&x, hook, remote_object, status)
                    .await;
            }
            Err(err) if err.is_internal() => self.handle_error(&reference, err),
            Err(err) => {
                self.retry_apply_with_replace(&x, hook, remote_object, err)
                    .await;
            }
        }
    }

    /// New-CRD protocol around a patch outcome
    ///
    /// A successful apply of a CRD arms the rediscovery latch and asks for
    /// one retry, so the run exercises fresh discovery once the server
    /// serves the new kind. A NoMatch disarms the latch, rediscovers once
    /// and retries; with the latch already down, NoMatch stays an error.
    async fn should_retry_for_new_crds(
        &self,
        outcome: &Result<(UnstructuredObject, Vec<ApiWarning>)>,
    ) -> Result<bool> {
        match outcome {
            Ok((result, _)) => {
                let reference = result.object_ref();
                if reference.gvk.group == "apiextensions.k8s.io"
                    && reference.gvk.kind == "CustomResourceDefinition"
                {
                    self.state().deployed_new_crd = true;
                    return Ok(true);
                }
                Ok(false)
            }
            Err(err) if err.is_no_match() => {
                let armed = {
                    let mut state = self.state();
                    if state.deployed_new_crd {
                        state.deployed_new_crd = false;
                        true
                    } else {
                        false
                    }
                };
                if !armed {
                    return Ok(false);
                }
                debug!("unknown kind after a CRD deployment, rediscovering API resources");
                // A rediscovery failure supersedes the original NoMatch.
                self.gateway.rediscover_resources().await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Conflict rung: resolve field ownership (or force) and patch again.
    /// A failure here ends the ladder; replacing after an unresolved
    /// ownership dispute would be unsafe.
    async fn retry_apply_with_conflicts(
        &self,
        x: &UnstructuredObject,
        hook: bool,
        remote_object: Option<&UnstructuredObject>,
        status: ConflictStatus,
    ) {
        let reference = x.object_ref();

        let Some(remote) = remote_object else {
            self.handle_error(&reference, ClusterError::Conflict(status));
            return;
        };

        let resolved = if self.options.force_apply {
            x.clone()
        } else {
            match resolve_field_manager_conflicts(x, remote, &status) {
                Ok((resolved, lost_ownership)) => {
                    for lost in lost_ownership {
                        self.handle_warning(
                            &reference,
                            format!(
                                "{}. Not updating field '{}' as we lost field ownership",
                                lost.message, lost.field
                            ),
                        );
                    }
                    resolved
                }
                Err(err) => {
                    self.handle_error(&reference, err);
                    return;
                }
            }
        };

        let options = PatchOptions {
            force_dry_run: self.options.dry_run,
            force_apply: true,
        };
        match self.gateway.patch(&resolved, &options).await {
            Ok((result, warnings)) => {
                self.handle_api_warnings(&reference, warnings);
                self.handle_result(result, hook);
            }
            Err(err) => self.handle_error(&reference, err),
        }
    }

    /// Replace rung: update with the remote resourceVersion stamped in
    async fn retry_apply_with_replace(
        &self,
        x: &UnstructuredObject,
        hook: bool,
        remote_object: Option<&UnstructuredObject>,
        apply_error: ClusterError,
    ) {
        let reference = x.object_ref();

        let Some(remote) = remote_object else {
            self.handle_error(&reference, apply_error);
            return;
        };
        if !self.options.replace_on_error {
            self.handle_error(&reference, apply_error);
            return;
        }

        warn!(object = %reference, "patching failed, retrying with replace instead of patch");
        self.handle_warning(&reference, "Patching failed, retrying with replace instead of patch");

        let mut replacement = x.clone();
        if let Some(rv) = remote.resource_version() {
            replacement.set_resource_version(&rv);
        }

        let options = UpdateOptions {
            force_dry_run: self.options.dry_run,
        };
        match self.gateway.update(&replacement, &options).await {
            Ok((result, warnings)) => {
                self.handle_api_warnings(&reference, warnings);
                self.handle_result(result, hook);
            }
            Err(err) => self.retry_apply_force_replace(x, hook, err).await,
        }
    }

    /// Last rung: delete and re-apply
    async fn retry_apply_force_replace(
        &self,
        x: &UnstructuredObject,
        hook: bool,
        apply_error: ClusterError,
    ) {
        let reference = x.object_ref();

        if !self.options.force_replace_on_error {
            self.handle_error(&reference, apply_error);
            return;
        }

        warn!(object = %reference, "patching failed, retrying by deleting and re-applying");
        self.handle_warning(&reference, "Patching failed, retrying by deleting and re-applying");

        if !self.delete_object(&reference, hook).await {
            return;
        }

        if self.options.dry_run {
            // The simulated delete cannot be observed by the server, so the
            // desired object stands in for the re-created result.
            self.handle_result(x.clone(), hook);
            return;
        }

        let options = PatchOptions {
            force_dry_run: self.options.dry_run,
            force_apply: false,
        };
        match self.gateway.patch(x, &options).await {
            Ok((result, warnings)) => {
                self.handle_api_warnings(&reference, warnings);
                self.handle_result(result, hook);
            }
            Err(err) => self.handle_error(&reference, err),
        }
    }

    // ========== Readiness ==========

    /// Poll an object until it is ready, fails validation, disappears or
    /// times out. A zero `timeout` falls back to the run-wide default.
    pub async fn wait_readiness(
        &self,
        reference: &ObjectRef,
        timeout: Duration,
        pctx: &ProgressCtx,
    ) -> bool {
        if self.options.dry_run {
            return true;
        }

        let timeout = if timeout.is_zero() {
            self.options.wait_object_timeout
        } else {
            timeout
        };

        pctx.debug(format!("Waiting for {} to get ready", reference));

        let start = Instant::now();
        let mut did_log = false;
        let mut last_log = Instant::now();

        loop {
            let elapsed = start.elapsed().as_secs();

            match self.gateway.get(reference).await {
                Err(err) if err.is_not_found() => {
                    if did_log {
                        pctx.warning(format!(
                            "Cancelled waiting for {} as it disappeared while waiting for it ({}s elapsed)",
                            reference, elapsed
                        ));
                    }
                    self.handle_error(
                        reference,
                        format!("{} disappeared while waiting for it to become ready", reference),
                    );
                    return false;
                }
                Err(err) => {
                    self.handle_error(reference, err);
                    return false;
                }
                Ok((obj, warnings)) => {
                    self.handle_api_warnings(reference, warnings);
                    let validation = self.validator.validate(&obj).await;
                    if validation.ready {
                        if did_log {
                            pctx.info(format!(
                                "Finished waiting for {} ({}s elapsed)",
                                reference, elapsed
                            ));
                        }
                        return true;
                    }
                    if !validation.errors.is_empty() {
                        if did_log {
                            pctx.warning(format!(
                                "Cancelled waiting for {} due to errors ({}s elapsed)",
                                reference, elapsed
                            ));
                        }
                        for error in validation.errors {
                            self.handle_error(reference, error.error);
                        }
                        return false;
                    }
                }
            }

            if !timeout.is_zero() && start.elapsed() >= timeout {
                let message = format!("timed out while waiting for {}", reference);
                pctx.warning(format!("{} ({}s elapsed)", message, elapsed));
                self.handle_error(reference, message);
                return false;
            }

            pctx.set_status(format!(
                "Waiting for {} to get ready... ({}s elapsed)",
                reference, elapsed
            ));

            if !did_log {
                pctx.info(format!(
                    "Waiting for {} to get ready... ({}s elapsed)",
                    reference, elapsed
                ));
                did_log = true;
                last_log = Instant::now();
            } else if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                pctx.info(format!(
                    "Still waiting for {} to get ready... ({}s elapsed)",
                    reference, elapsed
                ));
                last_log = Instant::now();
            }

            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    // ========== Per-item drive ==========

    async fn apply_deployment_item(&self, item: &DeploymentItem, pctx: &ProgressCtx) {
        let mut to_delete = Vec::new();
        for directive in &item.delete_objects {
            match self
                .gateway
                .get_gvks(&directive.group, directive.version.as_deref(), &directive.kind)
                .await
            {
                Ok(gvks) => {
                    for gvk in gvks {
                        to_delete.push(ObjectRef::new(
                            gvk,
                            directive.namespace.clone(),
                            directive.name.clone(),
                        ));
                    }
                }
                Err(err) => {
                    let reference = ObjectRef::new(
                        capstan_core::GroupVersionKind::new(
                            directive.group.clone(),
                            directive.version.clone().unwrap_or_default(),
                            directive.kind.clone(),
                        ),
                        directive.namespace.clone(),
                        directive.name.clone(),
                    );
                    self.handle_error(&reference, err);
                }
            }
        }

        let initial_deploy = item
            .objects
            .iter()
            .all(|o| self.remote_objects.get_remote_object(&o.object_ref()).is_none());

        let apply_objects: Vec<&UnstructuredObject> = item
            .objects
            .iter()
            .filter(|o| crate::hooks::Hook::from_object(o).is_none())
            .collect();

        let pre_hooks = determine_hooks(&item.objects, HookPhase::pre_deploy_set(initial_deploy));
        let post_hooks = determine_hooks(&item.objects, HookPhase::post_deploy_set(initial_deploy));

        let total = apply_objects.len() + pre_hooks.len() + post_hooks.len();
        pctx.set_total(total as u64);

        if !item.check_inclusion_for_deploy() {
            pctx.info_and_status("Skipped");
            pctx.finish();
            return;
        }

        if !to_delete.is_empty() {
            pctx.info(format!("Deleting {} objects", to_delete.len()));
            for (i, reference) in to_delete.iter().enumerate() {
                pctx.set_status(format!(
                    "Deleting object {} ({} of {})",
                    reference,
                    i + 1,
                    to_delete.len()
                ));
                self.delete_object(reference, false).await;
                pctx.increment();
            }
        }

        let hooks = HooksUtil::new(self);
        hooks.run_hooks(&pre_hooks, pctx).await;

        if !apply_objects.is_empty() {
            pctx.info(format!("Applying {} objects", apply_objects.len()));
        }
        let mut log_time = Instant::now();
        let mut did_log = false;
        for (i, obj) in apply_objects.iter().enumerate() {
            if self.abort_requested() {
                break;
            }

            let reference = obj.object_ref();
            pctx.set_status(format!(
                "Applying object {} ({} of {})",
                reference,
                i + 1,
                apply_objects.len()
            ));
            self.apply_object(obj, false, false).await;
            pctx.increment();

            if log_time.elapsed() >= PROGRESS_LOG_INTERVAL
                || (did_log && i == apply_objects.len() - 1)
            {
                pctx.info(format!("...applied {} of {} objects", i + 1, apply_objects.len()));
                log_time = Instant::now();
                did_log = true;
            }

            let wait_readiness =
                item.default_wait_readiness() || crate::annotations::parse_wait_readiness(obj);
            if !self.options.no_wait && wait_readiness {
                self.wait_readiness(&reference, Duration::ZERO, pctx).await;
            }
        }

        hooks.run_hooks(&post_hooks, pctx).await;

        let mut final_status = String::new();
        {
            let state = self.state();
            if !state.applied_objects.is_empty() {
                final_status += &format!(" Applied {} objects.", state.applied_objects.len());
            }
            if !state.applied_hook_objects.is_empty() {
                final_status += &format!(" Applied {} hooks.", state.applied_hook_objects.len());
            }
            if !state.deleted_objects.is_empty() {
                final_status += &format!(" Deleted {} objects.", state.deleted_objects.len());
            }
            if !state.deleted_hook_objects.is_empty() {
                final_status += &format!(" Deleted {} hooks.", state.deleted_hook_objects.len());
            }
        }
        if self.sink.error_count() != 0 {
            final_status += &format!(" Encountered {} errors.", self.sink.error_count());
        }
        if self.sink.warning_count() != 0 {
            final_status += &format!(" Encountered {} warnings.", self.sink.warning_count());
        }

        pctx.set_status(final_status.trim());
        pctx.finish();
    }

    // ========== Scheduler ==========

    /// Run every deployment item to completion
    ///
    /// Items are dispatched in order to a pool bounded by
    /// `options.parallelism`. Barrier items drain all in-flight workers
    /// after their own dispatch; the abort signal stops further dispatch but
    /// never cancels running workers. Errors land in the sink.
    pub async fn apply_deployments(self: Arc<Self>, progress: &dyn ProgressReporter) {
        info!("running server-side apply for all objects");

        let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        for item in &self.deployments {
            if self.abort_requested() {
                break;
            }

            let pctx = ProgressCtx::new(progress.begin_item(&item.name));
            let this = Arc::clone(&self);
            let item_clone = Arc::clone(item);
            let semaphore = Arc::clone(&semaphore);

            workers.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                this.apply_deployment_item(&item_clone, &pctx).await;
            }));

            if item.is_barrier() {
                info!("waiting on barrier...");
                for worker in workers.drain(..) {
                    let _ = worker.await;
                }
            }
        }

        for worker in workers.drain(..) {
            let _ = worker.await;
        }
        progress.flush();
    }

    // ========== Replace loop ==========

    /// Read-modify-write with conflict retry
    ///
    /// Reads the remote object (or uses `first_version` for the first
    /// iteration), hands a copy to the callback, and updates when the
    /// callback changed anything. On a resourceVersion conflict the loop
    /// re-reads and tries again, unbounded; on any other error it records
    /// and stops.
    pub async fn replace_object<F>(
        &self,
        reference: &ObjectRef,
        first_version: Option<UnstructuredObject>,
        callback: F,
    ) where
        F: Fn(&UnstructuredObject) -> Result<UnstructuredObject>,
    {
        let mut seeded = first_version;
        loop {
            let remote = match seeded.take() {
                Some(obj) => obj,
                None => match self.gateway.get(reference).await {
                    Ok((obj, warnings)) => {
                        self.handle_api_warnings(reference, warnings);
                        obj
                    }
                    Err(err) if err.is_not_found() => return,
                    Err(err) => {
                        self.handle_error(reference, err);
                        return;
                    }
                },
            };

            let modified = match callback(&remote) {
                Ok(modified) => modified,
                Err(err) => {
                    self.handle_error(reference, err);
                    return;
                }
            };
            if modified == remote {
                self.handle_result(remote, false);
                return;
            }

            match self.gateway.update(&modified, &UpdateOptions::default()).await {
                Ok((result, warnings)) => {
                    self.handle_api_warnings(reference, warnings);
                    self.handle_result(result, false);
                    return;
                }
                Err(err) if err.is_conflict() => {
                    warn!(object = %reference, "conflict while replacing, retrying");
                    continue;
                }
                Err(err) => {
                    self.handle_error(reference, err);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The ladder, scheduler and replace loop are exercised end-to-end in
    // tests/apply_scenarios.rs against a scripted gateway.

    #[test]
    fn test_default_options() {
        let options = ApplyUtilOptions::default();
        assert_eq!(options.parallelism, 8);
        assert!(!options.force_apply);
        assert!(!options.replace_on_error);
        assert!(!options.force_replace_on_error);
        assert!(!options.dry_run);
        assert!(!options.abort_on_error);
        assert!(!options.no_wait);
        assert_eq!(options.wait_object_timeout, Duration::ZERO);
    }
}
