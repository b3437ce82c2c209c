//! Data structures used throughout the controller.
//!
//! A [`Pod`] is the group object whose annotations carry the desired
//! attachments and the resulting interface status.  Only the fields the
//! reconciliation core reads or writes are modelled; the object store owns
//! everything else.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Annotation holding the desired network attachments.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Annotation holding the status of the currently attached interfaces.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    /// Runtime-qualified id, e.g. `docker://<id>`.
    #[serde(default)]
    pub container_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Concurrency token; bumped by the store on every accepted write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl Pod {
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Id of the first recorded container with its runtime scheme stripped.
    ///
    /// All containers of a pod share one network namespace, so the first one
    /// is as good as any. Returns `None` while no container has started.
    pub fn container_id(&self) -> Option<&str> {
        let uri = self.container_statuses.first()?.container_id.as_str();
        let id = match uri.split_once("//") {
            Some((_, id)) => id,
            None => uri,
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

/// An update notification delivered by the object store.
#[derive(Debug, Clone)]
pub struct PodUpdate {
    pub old: Pod,
    pub new: Pod,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_container(id: &str) -> Pod {
        Pod {
            namespace: "ns1".into(),
            name: "tiny-winy-pod".into(),
            container_statuses: vec![ContainerStatus {
                name: "app".into(),
                container_id: id.into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn container_id_strips_runtime_scheme() {
        let pod = pod_with_container("docker://1234567890");
        assert_eq!(pod.container_id(), Some("1234567890"));
    }

    #[test]
    fn container_id_without_scheme_is_returned_verbatim() {
        let pod = pod_with_container("abcdef");
        assert_eq!(pod.container_id(), Some("abcdef"));
    }

    #[test]
    fn container_id_is_none_without_statuses() {
        let pod = Pod::default();
        assert_eq!(pod.container_id(), None);
        assert_eq!(pod_with_container("").container_id(), None);
    }

    #[test]
    fn namespaced_name_display() {
        assert_eq!(NamespacedName::new("ns1", "pod").to_string(), "ns1/pod");
    }
}
