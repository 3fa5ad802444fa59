//! Unstructured Kubernetes objects and their references
//!
//! An `UnstructuredObject` is an opaque JSON tree with just enough metadata
//! accessors for the orchestrator: name, resourceVersion, annotations and the
//! object reference. No compile-time type knowledge is required; resources of
//! any kind (including custom resources) are handled uniformly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Group, version and kind of an API object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse from an apiVersion string
    ///
    /// - "apps/v1" -> group="apps", version="v1"
    /// - "v1" -> group="", version="v1" (core API)
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self {
            group,
            version,
            kind: kind.into(),
        }
    }

    /// Format back into an apiVersion string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Unique reference to a single API object
///
/// Two references compare equal only when all five components (group, version,
/// kind, namespace, name) match. This is the primary key for all maps in the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(gvk: GroupVersionKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.gvk.kind, self.name),
            None => write!(f, "{}/{}", self.gvk.kind, self.name),
        }
    }
}

/// An opaque API object represented as a nested JSON mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnstructuredObject(Map<String, Value>);

impl UnstructuredObject {
    /// Build a minimal object with apiVersion, kind and metadata
    pub fn new(
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(ns) = namespace {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }
        let mut root = Map::new();
        root.insert(
            "apiVersion".to_string(),
            Value::String(api_version.to_string()),
        );
        root.insert("kind".to_string(), Value::String(kind.to_string()));
        root.insert("metadata".to_string(), Value::Object(metadata));
        Self(root)
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::InvalidObject {
                message: format!("expected a mapping at the object root, got {}", type_name(&other)),
            }),
        }
    }

    /// Parse a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn api_version(&self) -> &str {
        self.0
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.metadata_str("name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<String> {
        self.metadata_str("namespace")
    }

    pub fn resource_version(&self) -> Option<String> {
        self.metadata_str("resourceVersion")
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .insert("name".to_string(), Value::String(name.to_string()));
    }

    pub fn set_resource_version(&mut self, rv: &str) {
        self.metadata_mut()
            .insert("resourceVersion".to_string(), Value::String(rv.to_string()));
    }

    /// Read a single annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let annotations = self
            .metadata_mut()
            .entry("annotations".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = annotations {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    /// Compute the object's reference from apiVersion, kind and metadata
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            gvk: GroupVersionKind::from_api_version(self.api_version(), self.kind()),
            namespace: self.namespace(),
            name: self.name(),
        }
    }

    /// Read the value at a dotted field path, with numeric components
    /// indexing into sequences (e.g. "spec.template.spec.containers.0.image")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current: Option<&Value> = None;
        for (i, part) in path.split('.').enumerate() {
            let next = if i == 0 {
                self.0.get(part)
            } else {
                match current? {
                    Value::Object(map) => map.get(part),
                    Value::Array(seq) => part.parse::<usize>().ok().and_then(|idx| seq.get(idx)),
                    _ => None,
                }
            };
            current = Some(next?);
        }
        current
    }

    /// Remove the field at a dotted path. Returns true when something was
    /// actually removed.
    pub fn remove_path(&mut self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((last, prefix)) = parts.split_last() else {
            return false;
        };

        if prefix.is_empty() {
            return self.0.remove(*last).is_some();
        }

        let mut current = match self.0.get_mut(prefix[0]) {
            Some(v) => v,
            None => return false,
        };
        for part in &prefix[1..] {
            let next = match current {
                Value::Object(map) => map.get_mut(*part),
                Value::Array(seq) => part
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| seq.get_mut(idx)),
                _ => None,
            };
            current = match next {
                Some(v) => v,
                None => return false,
            };
        }

        match current {
            Value::Object(map) => map.remove(*last).is_some(),
            Value::Array(seq) => match last.parse::<usize>() {
                Ok(idx) if idx < seq.len() => {
                    seq.remove(idx);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Replace a substring in every mapping key of the tree
    pub fn replace_keys(&mut self, from: &str, to: &str) {
        let mut root = Value::Object(std::mem::take(&mut self.0));
        replace_keys_value(&mut root, from, to);
        if let Value::Object(map) = root {
            self.0 = map;
        }
    }

    /// Replace a substring in every string scalar of the tree
    pub fn replace_values(&mut self, from: &str, to: &str) {
        let mut root = Value::Object(std::mem::take(&mut self.0));
        replace_values_value(&mut root, from, to);
        if let Value::Object(map) = root {
            self.0 = map;
        }
    }

    fn metadata_str(&self, key: &str) -> Option<String> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let metadata = self
            .0
            .entry("metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        metadata
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("metadata was just set to an object"))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn replace_keys_value(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            for (key, mut val) in entries {
                replace_keys_value(&mut val, from, to);
                map.insert(key.replace(from, to), val);
            }
        }
        Value::Array(seq) => {
            for item in seq {
                replace_keys_value(item, from, to);
            }
        }
        _ => {}
    }
}

fn replace_values_value(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::Object(map) => {
            for (_, val) in map.iter_mut() {
                replace_values_value(val, from, to);
            }
        }
        Value::Array(seq) => {
            for item in seq {
                replace_values_value(item, from, to);
            }
        }
        Value::String(s) => {
            if s.contains(from) {
                *s = s.replace(from, to);
            }
        }
        _ => {}
    }
}
