//! Annotation parsing with Helm compatibility
//!
//! Capstan honors its own `capstan.io/*` annotations and falls back to the
//! `helm.sh/*` equivalents where the semantics coincide, so charts migrated
//! from Helm keep working without edits.

use capstan_core::UnstructuredObject;

/// Capstan-native annotations
pub mod capstan {
    /// Hook phase annotation
    pub const HOOK: &str = "capstan.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "capstan.io/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "capstan.io/hook-delete-policy";
    /// Block on readiness after applying this object
    pub const WAIT_READINESS: &str = "capstan.io/wait-readiness";
}

/// Helm-compatible annotations (for migration)
pub mod helm {
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
}

/// Read an annotation, preferring the Capstan key over the Helm fallback
pub fn get_annotation<'a>(
    obj: &'a UnstructuredObject,
    capstan_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    obj.annotation(capstan_key).or_else(|| obj.annotation(helm_key))
}

/// Parse a comma-separated annotation value into trimmed entries
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a boolean-ish annotation value ("true" or "1")
pub fn parse_bool(value: Option<&str>) -> bool {
    value
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
        .unwrap_or(false)
}

/// Parse the hook weight (default: 0)
pub fn parse_hook_weight(obj: &UnstructuredObject) -> i32 {
    get_annotation(obj, capstan::HOOK_WEIGHT, helm::HOOK_WEIGHT)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// When to delete a hook object around its execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePolicy {
    /// Delete any existing instance before the hook object is applied
    pub before_hook_creation: bool,
    /// Delete after the hook ran without recorded errors
    pub on_succeeded: bool,
    /// Delete after the hook ran with recorded errors
    pub on_failed: bool,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            before_hook_creation: true,
            on_succeeded: false,
            on_failed: false,
        }
    }
}

/// Parse the hook delete policy annotation
///
/// The value is a comma-separated combination of `before-hook-creation`,
/// `hook-succeeded` and `hook-failed`; an absent annotation defaults to
/// `before-hook-creation`, unknown entries are ignored.
pub fn parse_delete_policy(obj: &UnstructuredObject) -> DeletePolicy {
    let Some(value) = get_annotation(obj, capstan::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
    else {
        return DeletePolicy::default();
    };

    let mut policy = DeletePolicy {
        before_hook_creation: false,
        on_succeeded: false,
        on_failed: false,
    };
    for entry in parse_list(value) {
        match entry.as_str() {
            "before-hook-creation" => policy.before_hook_creation = true,
            "hook-succeeded" => policy.on_succeeded = true,
            "hook-failed" => policy.on_failed = true,
            _ => {}
        }
    }
    policy
}

/// Whether the object asks for a readiness wait after apply
pub fn parse_wait_readiness(obj: &UnstructuredObject) -> bool {
    parse_bool(obj.annotation(capstan::WAIT_READINESS))
}
