//! Object readiness validation
//!
//! The readiness waiter polls an applied object and hands each observed state
//! to a validator. A validator yields one of three outcomes: ready, not yet
//! ready (keep polling), or failed with one or more errors (stop waiting).

use async_trait::async_trait;
use serde_json::Value;

use capstan_core::UnstructuredObject;

/// One validation failure for an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub error: String,
}

/// Outcome of a single validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateResult {
    pub ready: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidateResult {
    pub fn ready() -> Self {
        Self {
            ready: true,
            errors: Vec::new(),
        }
    }

    pub fn pending() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ready: false,
            errors: vec![ValidationError {
                error: error.into(),
            }],
        }
    }
}

/// Decides whether an observed object has reached its desired state
#[async_trait]
pub trait ObjectValidator: Send + Sync {
    async fn validate(&self, obj: &UnstructuredObject) -> ValidateResult;
}

/// Validator that treats every object as immediately ready
///
/// Useful when readiness is delegated entirely to per-object tooling outside
/// the orchestrator.
pub struct NoopValidator;

#[async_trait]
impl ObjectValidator for NoopValidator {
    async fn validate(&self, _obj: &UnstructuredObject) -> ValidateResult {
        ValidateResult::ready()
    }
}

/// Generic condition-based validator
///
/// Ready when `status.conditions` carries `Ready=True` or `Available=True`.
/// Workloads without such a condition fall back to comparing
/// `status.readyReplicas` against `spec.replicas`. Objects with neither
/// signal are considered ready so they never block a deployment.
pub struct ConditionValidator;

#[async_trait]
impl ObjectValidator for ConditionValidator {
    async fn validate(&self, obj: &UnstructuredObject) -> ValidateResult {
        if let Some(conditions) = obj.get_path("status.conditions").and_then(Value::as_array) {
            for condition in conditions {
                let kind = condition.get("type").and_then(Value::as_str).unwrap_or("");
                let status = condition.get("status").and_then(Value::as_str).unwrap_or("");
                if (kind == "Ready" || kind == "Available") && status == "True" {
                    return ValidateResult::ready();
                }
            }
        }

        let desired = obj.get_path("spec.replicas").and_then(Value::as_u64);
        let ready = obj.get_path("status.readyReplicas").and_then(Value::as_u64);
        if let Some(desired) = desired {
            if ready.unwrap_or(0) >= desired {
                return ValidateResult::ready();
            }
            return ValidateResult::pending();
        }

        // Nothing to judge readiness by; do not block the deployment.
        ValidateResult::ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_validator_is_always_ready() {
        let obj = UnstructuredObject::new("v1", "ConfigMap", Some("default"), "cfg");
        assert!(NoopValidator.validate(&obj).await.ready);
    }

    #[tokio::test]
    async fn test_condition_validator_ready_condition() {
        let obj = UnstructuredObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "status": {"conditions": [
                {"type": "Progressing", "status": "True"},
                {"type": "Available", "status": "True"}
            ]}
        }))
        .unwrap();
        assert!(ConditionValidator.validate(&obj).await.ready);
    }

    #[tokio::test]
    async fn test_condition_validator_replica_counts() {
        let pending = UnstructuredObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {"name": "db"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1}
        }))
        .unwrap();
        let result = ConditionValidator.validate(&pending).await;
        assert!(!result.ready);
        assert!(result.errors.is_empty());

        let complete = UnstructuredObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {"name": "db"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3}
        }))
        .unwrap();
        assert!(ConditionValidator.validate(&complete).await.ready);
    }

    #[tokio::test]
    async fn test_condition_validator_defaults_to_ready() {
        let obj = UnstructuredObject::new("v1", "ConfigMap", Some("default"), "cfg");
        assert!(ConditionValidator.validate(&obj).await.ready);
    }
}
