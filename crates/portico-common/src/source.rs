//! Identity of source objects
//!
//! Every diagnostic, index key and generated name in the translator refers
//! back to the Kubernetes object it came from through an [`ObjectSource`].

use std::fmt;

use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::wellknown::normalize_group;

/// An API group and kind, the key under which extensions register
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    /// API group, empty for core
    pub group: String,
    /// Resource kind
    pub kind: String,
}

impl GroupKind {
    /// Create a group/kind pair, normalizing the core group
    pub fn new(group: impl AsRef<str>, kind: impl Into<String>) -> Self {
        Self {
            group: normalize_group(Some(group.as_ref())).to_string(),
            kind: kind.into(),
        }
    }

    /// Group/kind of a statically typed resource
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::group(&()), K::kind(&()))
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "core/{}", self.kind)
        } else {
            write!(f, "{}/{}", self.group, self.kind)
        }
    }
}

/// Reference to a source object: group, kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectSource {
    /// API group, empty for core
    pub group: String,
    /// Resource kind
    pub kind: String,
    /// Namespace, empty for cluster scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectSource {
    /// Create a new object source
    pub fn new(
        group_kind: GroupKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group_kind.group,
            kind: group_kind.kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Object source of a statically typed resource
    pub fn from_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self::new(
            GroupKind::of::<K>(),
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        )
    }

    /// Canonical `group/kind/namespace/name` key
    pub fn resource_name(&self) -> String {
        format!("{}/{}/{}/{}", self.group, self.kind, self.namespace, self.name)
    }

    /// The group/kind of this object
    pub fn group_kind(&self) -> GroupKind {
        GroupKind {
            group: self.group.clone(),
            kind: self.kind.clone(),
        }
    }

    /// `namespace/name` form used in log lines
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

/// Object identity used for change detection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionedIdentity {
    /// The object
    pub source: ObjectSource,
    /// Kubernetes UID
    pub uid: String,
    /// `metadata.generation`, zero when the kind does not track it
    pub generation: i64,
    /// `metadata.resourceVersion`
    pub resource_version: String,
}

impl VersionedIdentity {
    /// Identity of a statically typed resource
    pub fn from_resource<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            source: ObjectSource::from_resource(obj),
            uid: meta.uid.clone().unwrap_or_default(),
            generation: meta.generation.unwrap_or_default(),
            resource_version: meta.resource_version.clone().unwrap_or_default(),
        }
    }

    /// Whether two identities describe the same version of the same object
    ///
    /// Generation dominates when both sides track it, since status writes
    /// bump the resource version without changing the spec.
    pub fn same_version(&self, other: &Self) -> bool {
        if self.source != other.source || self.uid != other.uid {
            return false;
        }
        if self.generation != 0 && other.generation != 0 {
            return self.generation == other.generation;
        }
        self.resource_version == other.resource_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;

    fn identity(generation: i64, rv: &str) -> VersionedIdentity {
        VersionedIdentity {
            source: ObjectSource::new(GroupKind::new("", "Service"), "default", "foo"),
            uid: "uid-1".to_string(),
            generation,
            resource_version: rv.to_string(),
        }
    }

    #[test]
    fn test_resource_name_format() {
        let src = ObjectSource::new(
            GroupKind::new("gateway.networking.k8s.io", "HTTPRoute"),
            "default",
            "r",
        );
        assert_eq!(src.resource_name(), "gateway.networking.k8s.io/HTTPRoute/default/r");
        assert_eq!(src.to_string(), src.resource_name());
        assert_eq!(src.namespaced_name(), "default/r");
    }

    #[test]
    fn test_group_kind_of_core_type() {
        let gk = GroupKind::of::<Service>();
        assert_eq!(gk.group, "");
        assert_eq!(gk.kind, "Service");
        assert_eq!(gk.to_string(), "core/Service");
        assert_eq!(GroupKind::new("core", "Service"), gk);
    }

    #[test]
    fn test_object_source_from_resource() {
        let mut svc = Service::default();
        svc.metadata.name = Some("foo".to_string());
        svc.metadata.namespace = Some("default".to_string());
        let src = ObjectSource::from_resource(&svc);
        assert_eq!(src.resource_name(), "/Service/default/foo");
    }

    #[test]
    fn test_generation_dominates_resource_version() {
        assert!(identity(2, "100").same_version(&identity(2, "101")));
        assert!(!identity(2, "100").same_version(&identity(3, "100")));
    }

    #[test]
    fn test_resource_version_used_without_generation() {
        assert!(identity(0, "100").same_version(&identity(0, "100")));
        assert!(!identity(0, "100").same_version(&identity(0, "101")));
        assert!(!identity(2, "100").same_version(&identity(0, "101")));
    }

    #[test]
    fn test_different_uid_is_different_object() {
        let mut other = identity(1, "1");
        other.uid = "uid-2".to_string();
        assert!(!identity(1, "1").same_version(&other));
    }
}
