//! Snapshot of remote cluster objects
//!
//! The discovery pass that runs before apply (outside this crate) collects
//! the currently observed remote objects. During the apply phase the snapshot
//! is read-only; the state machine uses it both to pick its retry ladder and
//! to supply the `resourceVersion` for the update fallback.

use std::collections::HashMap;

use capstan_core::{ObjectRef, UnstructuredObject};

/// Read-through view of remote objects keyed by reference
#[derive(Debug, Default)]
pub struct RemoteObjects {
    objects: HashMap<ObjectRef, UnstructuredObject>,
}

impl RemoteObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of observed objects, keying each by its own ref
    pub fn from_objects(objects: impl IntoIterator<Item = UnstructuredObject>) -> Self {
        let mut remote = Self::new();
        for obj in objects {
            remote.insert(obj);
        }
        remote
    }

    pub fn insert(&mut self, obj: UnstructuredObject) {
        self.objects.insert(obj.object_ref(), obj);
    }

    /// `None` means the server holds no prior version of the object
    pub fn get_remote_object(&self, reference: &ObjectRef) -> Option<&UnstructuredObject> {
        self.objects.get(reference)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_ref() {
        let obj = UnstructuredObject::new("apps/v1", "Deployment", Some("prod"), "web");
        let remote = RemoteObjects::from_objects([obj.clone()]);

        assert_eq!(remote.len(), 1);
        assert_eq!(remote.get_remote_object(&obj.object_ref()), Some(&obj));

        let other = UnstructuredObject::new("apps/v1", "Deployment", Some("prod"), "api");
        assert_eq!(remote.get_remote_object(&other.object_ref()), None);
    }
}
