//! Cluster spec model: the desired object graph of one cluster and accessors
//! for the status fields the cluster manager polls on.
//!
//! Objects are kept as [`DynamicObject`] since the engine never needs typed
//! access beyond a handful of well-known status fields.

use std::fmt;
use std::path::PathBuf;

use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;

use crate::kube_utils::parse_api_version;
use crate::{Error, STATUS_TRUE};

/// Kind of the root object of a cluster spec
pub const CLUSTER_KIND: &str = "Cluster";

/// Namespace for objects whose manifest doesn't name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Group/version/kind plus name/namespace of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    /// API version (e.g., "anywhere.eks.amazonaws.com/v1alpha1")
    pub api_version: String,
    /// Kind (e.g., "Cluster")
    pub kind: String,
    /// Namespace (empty for cluster-scoped)
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectIdentity {
    /// Create a new ObjectIdentity
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Identity of an object, which must carry apiVersion, kind and name
    pub fn from_object(obj: &DynamicObject) -> Result<Self, Error> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| Error::serialization("object is missing apiVersion/kind"))?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::serialization(format!("{} is missing metadata.name", types.kind)))?;

        Ok(Self::new(
            &types.api_version,
            &types.kind,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            name,
        ))
    }

    /// This identity, placed in [`DEFAULT_NAMESPACE`] if it names no namespace
    pub fn in_default_namespace(mut self) -> Self {
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
        self
    }

    /// Split the api version into (group, version); group is empty for core
    pub fn group_version(&self) -> (String, String) {
        parse_api_version(&self.api_version)
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Connection coordinates of a control-plane cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagementCluster {
    /// Cluster name, for logging
    pub name: String,
    /// Path to a kubeconfig with admin access to the cluster
    pub kubeconfig: PathBuf,
}

impl ManagementCluster {
    /// Create a new ManagementCluster
    pub fn new(name: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig: kubeconfig.into(),
        }
    }
}

/// Desired state of one cluster: the root cluster object and its children
/// (machine configs, datacenter configs, ...).
#[derive(Clone, Debug)]
pub struct ClusterSpec {
    /// The root cluster object
    pub cluster: DynamicObject,
    /// Objects the cluster references
    pub children: Vec<DynamicObject>,
}

impl ClusterSpec {
    /// Create a new ClusterSpec. Objects without a namespace are placed in
    /// [`DEFAULT_NAMESPACE`], so every operation addresses them the same way.
    pub fn new(mut cluster: DynamicObject, mut children: Vec<DynamicObject>) -> Self {
        for obj in std::iter::once(&mut cluster).chain(children.iter_mut()) {
            default_namespace(obj);
        }
        Self { cluster, children }
    }

    /// Parse a multi-document YAML stream. The first document of kind
    /// `Cluster` becomes the root; every other document is a child.
    pub fn from_yaml(manifests: &str) -> Result<Self, Error> {
        let mut cluster = None;
        let mut children = Vec::new();

        for doc in serde_yaml::Deserializer::from_str(manifests) {
            let value = serde_yaml::Value::deserialize(doc)
                .map_err(|e| Error::serialization(format!("invalid YAML document: {}", e)))?;
            if value.is_null() {
                continue;
            }
            let json = serde_json::to_value(&value)
                .map_err(|e| Error::serialization(format!("invalid YAML document: {}", e)))?;
            let obj: DynamicObject = serde_json::from_value(json)
                .map_err(|e| Error::serialization(format!("invalid object: {}", e)))?;
            // Validate identity up front so later phases can rely on it
            let identity = ObjectIdentity::from_object(&obj)?;

            if cluster.is_none() && identity.kind == CLUSTER_KIND {
                cluster = Some(obj);
            } else {
                children.push(obj);
            }
        }

        let cluster = cluster
            .ok_or_else(|| Error::serialization("no Cluster object found in manifests"))?;
        Ok(Self::new(cluster, children))
    }

    /// The root object followed by every child, in apply order
    pub fn cluster_and_children(&self) -> impl Iterator<Item = &DynamicObject> {
        std::iter::once(&self.cluster).chain(self.children.iter())
    }

    /// Identity of the root cluster object
    pub fn cluster_identity(&self) -> Result<ObjectIdentity, Error> {
        ObjectIdentity::from_object(&self.cluster)
    }

    /// Name of the root cluster object
    pub fn name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }

    /// Whether keel is responsible for installing/upgrading the CNI
    pub fn is_cni_managed(&self) -> bool {
        is_cni_managed(&self.cluster)
    }
}

/// `status.failureMessage`, if set and non-empty
pub fn failure_message(obj: &DynamicObject) -> Option<&str> {
    obj.data
        .get("status")
        .and_then(|s| s.get("failureMessage"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
}

/// The status condition with the given type, if present
pub fn find_condition<'a>(obj: &'a DynamicObject, condition_type: &str) -> Option<&'a Value> {
    obj.data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
}

/// Whether the condition of the given type has status "True"
pub fn has_condition(obj: &DynamicObject, condition_type: &str) -> bool {
    find_condition(obj, condition_type)
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some(STATUS_TRUE)
}

/// `metadata.generation`
pub fn generation(obj: &DynamicObject) -> Option<i64> {
    obj.metadata.generation
}

/// `status.observedGeneration`
pub fn observed_generation(obj: &DynamicObject) -> Option<i64> {
    obj.data
        .get("status")
        .and_then(|s| s.get("observedGeneration"))
        .and_then(Value::as_i64)
}

/// CNI is managed when kindnetd is configured, or cilium is configured
/// without `skipUpgrade: true`.
pub fn is_cni_managed(obj: &DynamicObject) -> bool {
    let Some(cni) = obj
        .data
        .get("spec")
        .and_then(|s| s.get("clusterNetwork"))
        .and_then(|n| n.get("cniConfig"))
    else {
        return false;
    };

    if cni.get("kindnetd").is_some_and(|k| !k.is_null()) {
        return true;
    }
    match cni.get("cilium") {
        Some(cilium) if !cilium.is_null() => {
            cilium.get("skipUpgrade").and_then(Value::as_bool) != Some(true)
        }
        _ => false,
    }
}

/// Set `metadata.namespace` to [`DEFAULT_NAMESPACE`] when missing or empty
pub fn default_namespace(obj: &mut DynamicObject) {
    if obj.metadata.namespace.as_deref().map_or(true, str::is_empty) {
        obj.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
}

/// Set an annotation, creating the map if needed
pub fn set_annotation(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

/// Remove an annotation if present
pub fn remove_annotation(obj: &mut DynamicObject, key: &str) {
    if let Some(annotations) = obj.metadata.annotations.as_mut() {
        annotations.remove(key);
    }
}
