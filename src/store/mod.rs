//! Read and write access to the cluster objects the controller consumes.
//!
//! The controller never owns cluster state; it borrows a [`PodStore`] and a
//! [`DefinitionStore`] for its whole lifetime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{NamespacedName, Pod, PodUpdate};

pub mod cluster;
pub mod memory;
pub use cluster::{ClusterDefinitionStore, ClusterPodStore};
pub use memory::{MemoryDefinitionStore, MemoryPodStore};

/// A named plugin-chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachmentDefinition {
    pub namespace: String,
    pub name: String,
    /// CNI configuration, handed to the plugin verbatim.
    pub config: String,
}

#[async_trait]
pub trait PodStore: Send + Sync {
    /// Indexed point lookup; a missing pod is [`Error::NotFound`](crate::Error::NotFound).
    async fn get(&self, key: &NamespacedName) -> Result<Pod>;

    /// Writes `pod` if its `resource_version` is still current and returns
    /// the stored object. A stale version is [`Error::Conflict`](crate::Error::Conflict).
    async fn update(&self, pod: Pod) -> Result<Pod>;

    /// Update notifications for every accepted write.
    fn subscribe(&self) -> broadcast::Receiver<PodUpdate>;
}

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<NetworkAttachmentDefinition>;
}
