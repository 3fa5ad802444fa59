//! Field-manager conflict resolution
//!
//! When a server-side apply is rejected because another manager owns some of
//! the fields we declared, the conflict can usually be resolved without
//! destruction: drop the contested fields from the desired object and
//! re-apply. The caller emits one warning per field whose ownership was lost.

use capstan_core::UnstructuredObject;

use crate::error::{ClusterError, ConflictStatus, Result};

/// A field we declared but will not update because another manager owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostOwnership {
    pub field: String,
    pub message: String,
}

/// Produce a desired object with all conflicting fields stripped
///
/// Fields whose desired value already matches the remote value are stripped
/// silently; nothing is lost by leaving them to their current owner. The
/// function is pure; the inputs are not modified.
pub fn resolve_field_manager_conflicts(
    desired: &UnstructuredObject,
    remote: &UnstructuredObject,
    status: &ConflictStatus,
) -> Result<(UnstructuredObject, Vec<LostOwnership>)> {
    if status.causes.is_empty() {
        return Err(ClusterError::ConflictResolution(
            "server reported a conflict without naming any fields".to_string(),
        ));
    }

    let mut resolved = desired.clone();
    let mut lost = Vec::new();

    for cause in &status.causes {
        let field = cause.field.trim_start_matches('.');
        if field.is_empty() {
            return Err(ClusterError::ConflictResolution(format!(
                "conflict cause with empty field path: {}",
                cause.message
            )));
        }

        let desired_value = desired.get_path(field);
        let remote_value = remote.get_path(field);

        resolved.remove_path(field);

        if desired_value != remote_value {
            lost.push(LostOwnership {
                field: field.to_string(),
                message: if cause.message.is_empty() {
                    "Field is owned by another field manager".to_string()
                } else {
                    cause.message.clone()
                },
            });
        }
    }

    Ok((resolved, lost))
}
