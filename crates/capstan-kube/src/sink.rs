//! Concurrency-safe aggregation of per-object errors and warnings
//!
//! Workers from every deployment item report into one shared sink; the final
//! command rendering reads it after the run has drained. Duplicate messages
//! for the same reference are collapsed.

use std::collections::HashMap;
use std::sync::Mutex;

use capstan_core::ObjectRef;

use crate::gateway::ApiWarning;

/// One recorded error or warning, attributed to an object reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentIssue {
    pub reference: ObjectRef,
    pub message: String,
}

#[derive(Debug, Default)]
struct SinkState {
    errors: HashMap<ObjectRef, Vec<String>>,
    warnings: HashMap<ObjectRef, Vec<String>>,
}

/// Shared sink for errors and warnings collected during a run
#[derive(Debug, Default)]
pub struct ErrorsAndWarnings {
    state: Mutex<SinkState>,
}

impl ErrorsAndWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&self, reference: &ObjectRef, error: impl std::fmt::Display) {
        let message = error.to_string();
        let mut state = self.lock();
        let entries = state.errors.entry(reference.clone()).or_default();
        if !entries.contains(&message) {
            entries.push(message);
        }
    }

    pub fn add_warning(&self, reference: &ObjectRef, warning: impl std::fmt::Display) {
        let message = warning.to_string();
        let mut state = self.lock();
        let entries = state.warnings.entry(reference.clone()).or_default();
        if !entries.contains(&message) {
            entries.push(message);
        }
    }

    pub fn add_api_warnings(&self, reference: &ObjectRef, warnings: Vec<ApiWarning>) {
        for warning in warnings {
            self.add_warning(reference, warning.text);
        }
    }

    /// Whether any error was previously recorded for this reference
    pub fn had_error(&self, reference: &ObjectRef) -> bool {
        self.lock().errors.contains_key(reference)
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.values().map(Vec::len).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.lock().warnings.values().map(Vec::len).sum()
    }

    pub fn errors(&self) -> Vec<DeploymentIssue> {
        Self::flatten(&self.lock().errors)
    }

    pub fn warnings(&self) -> Vec<DeploymentIssue> {
        Self::flatten(&self.lock().warnings)
    }

    fn flatten(map: &HashMap<ObjectRef, Vec<String>>) -> Vec<DeploymentIssue> {
        map.iter()
            .flat_map(|(reference, messages)| {
                messages.iter().map(move |message| DeploymentIssue {
                    reference: reference.clone(),
                    message: message.clone(),
                })
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::{GroupVersionKind, UnstructuredObject};

    fn some_ref(name: &str) -> ObjectRef {
        UnstructuredObject::new("v1", "ConfigMap", Some("default"), name).object_ref()
    }

    #[test]
    fn test_had_error_only_for_recorded_refs() {
        let sink = ErrorsAndWarnings::new();
        let a = some_ref("a");
        let b = some_ref("b");

        sink.add_error(&a, "patch failed");
        assert!(sink.had_error(&a));
        assert!(!sink.had_error(&b));
    }

    #[test]
    fn test_counts_and_dedup() {
        let sink = ErrorsAndWarnings::new();
        let r = some_ref("a");

        sink.add_error(&r, "boom");
        sink.add_error(&r, "boom");
        sink.add_error(&r, "other");
        sink.add_warning(&r, "careful");

        assert_eq!(sink.error_count(), 2);
        assert_eq!(sink.warning_count(), 1);
    }

    #[test]
    fn test_api_warnings_do_not_count_as_errors() {
        let sink = ErrorsAndWarnings::new();
        let r = ObjectRef::new(
            GroupVersionKind::new("apps", "v1", "Deployment"),
            Some("prod".to_string()),
            "web",
        );

        sink.add_api_warnings(&r, vec![ApiWarning::new("deprecated field")]);
        assert_eq!(sink.error_count(), 0);
        assert_eq!(sink.warning_count(), 1);
        assert!(!sink.had_error(&r));

        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "deprecated field");
    }
}
