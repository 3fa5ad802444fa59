//! Deployment hooks
//!
//! A hook is an object whose lifecycle is tied to a deployment phase instead
//! of the steady-state desired set. Hooks are recognized by annotation,
//! ordered by weight, and executed sequentially through the apply state
//! machine before or after the regular objects of their item.

use capstan_core::UnstructuredObject;
use tracing::debug;

use crate::annotations::{self, DeletePolicy};
use crate::apply::ApplyUtil;
use crate::gateway::ClusterGateway;
use crate::progress::ProgressCtx;

/// Deployment phase a hook can attach to
///
/// The `initial`/`upgrade` variants only fire when the item as a whole is in
/// that mode; the unqualified variants fire in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreDeployInitial,
    PreDeployUpgrade,
    PreDeploy,
    PostDeployInitial,
    PostDeployUpgrade,
    PostDeploy,
}

impl HookPhase {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre-deploy-initial" => Some(HookPhase::PreDeployInitial),
            "pre-deploy-upgrade" => Some(HookPhase::PreDeployUpgrade),
            "pre-deploy" => Some(HookPhase::PreDeploy),
            "post-deploy-initial" => Some(HookPhase::PostDeployInitial),
            "post-deploy-upgrade" => Some(HookPhase::PostDeployUpgrade),
            "post-deploy" => Some(HookPhase::PostDeploy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::PreDeployInitial => "pre-deploy-initial",
            HookPhase::PreDeployUpgrade => "pre-deploy-upgrade",
            HookPhase::PreDeploy => "pre-deploy",
            HookPhase::PostDeployInitial => "post-deploy-initial",
            HookPhase::PostDeployUpgrade => "post-deploy-upgrade",
            HookPhase::PostDeploy => "post-deploy",
        }
    }

    /// Pre-phase set for an initial deploy or an upgrade
    pub fn pre_deploy_set(initial_deploy: bool) -> &'static [HookPhase] {
        if initial_deploy {
            &[HookPhase::PreDeployInitial, HookPhase::PreDeploy]
        } else {
            &[HookPhase::PreDeployUpgrade, HookPhase::PreDeploy]
        }
    }

    /// Post-phase set for an initial deploy or an upgrade
    pub fn post_deploy_set(initial_deploy: bool) -> &'static [HookPhase] {
        if initial_deploy {
            &[HookPhase::PostDeployInitial, HookPhase::PostDeploy]
        } else {
            &[HookPhase::PostDeployUpgrade, HookPhase::PostDeploy]
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook candidate derived from an annotated object
#[derive(Debug, Clone)]
pub struct Hook {
    pub object: UnstructuredObject,
    pub phases: Vec<HookPhase>,
    pub weight: i32,
    pub delete_policy: DeletePolicy,
}

impl Hook {
    /// `None` when the object carries no hook annotation
    pub fn from_object(obj: &UnstructuredObject) -> Option<Self> {
        let value = obj.annotation(annotations::capstan::HOOK)?;
        let phases = annotations::parse_list(value)
            .iter()
            .filter_map(|p| HookPhase::parse(p))
            .collect();
        Some(Self {
            object: obj.clone(),
            phases,
            weight: annotations::parse_hook_weight(obj),
            delete_policy: annotations::parse_delete_policy(obj),
        })
    }

    pub fn runs_in_any(&self, phases: &[HookPhase]) -> bool {
        self.phases.iter().any(|p| phases.contains(p))
    }
}

/// Collect the hooks of an object list that run in any of the given phases,
/// ordered by weight (ascending, stable on input order)
pub fn determine_hooks(objects: &[UnstructuredObject], phases: &[HookPhase]) -> Vec<Hook> {
    let mut hooks: Vec<Hook> = objects
        .iter()
        .filter_map(Hook::from_object)
        .filter(|h| h.runs_in_any(phases))
        .collect();
    hooks.sort_by_key(|h| h.weight);
    hooks
}

/// Hook execution helper bound to one apply run
pub struct HooksUtil<'a, G: ClusterGateway> {
    util: &'a ApplyUtil<G>,
}

impl<'a, G: ClusterGateway + 'static> HooksUtil<'a, G> {
    pub fn new(util: &'a ApplyUtil<G>) -> Self {
        Self { util }
    }

    /// Run hooks sequentially through the apply state machine
    ///
    /// Deletion policies are honored on both sides of the run: an existing
    /// instance is removed before apply under `before-hook-creation`, and the
    /// applied object is removed again under `hook-succeeded`/`hook-failed`
    /// depending on whether errors were recorded for its reference.
    pub async fn run_hooks(&self, hooks: &[Hook], pctx: &ProgressCtx) {
        for hook in hooks {
            if self.util.abort_requested() {
                break;
            }

            let reference = hook.object.object_ref();
            debug!(hook = %reference, "running hook");
            pctx.set_status(format!("Running hook {}", reference));

            let mut replaced = false;
            if hook.delete_policy.before_hook_creation {
                replaced = self.util.delete_object(&reference, true).await;
            }

            self.util.apply_object(&hook.object, replaced, true).await;
            pctx.increment();

            let failed = self.util.had_error(&reference);
            if (!failed && hook.delete_policy.on_succeeded)
                || (failed && hook.delete_policy.on_failed)
            {
                self.util.delete_object(&reference, true).await;
            }
        }
    }
}
