//! In-process stores for tests and embedding without an API server.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{broadcast, RwLock};

use super::{DefinitionStore, NetworkAttachmentDefinition, PodStore};
use crate::error::{Error, Result};
use crate::types::{NamespacedName, Pod, PodUpdate};

const UPDATE_CHANNEL_CAPACITY: usize = 128;

pub struct MemoryPodStore {
    pods: RwLock<HashMap<NamespacedName, Pod>>,
    updates: broadcast::Sender<PodUpdate>,
}

impl Default for MemoryPodStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPodStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            pods: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Creates or unconditionally replaces a pod, as an external writer
    /// would. Replacing an existing pod notifies subscribers.
    pub async fn apply(&self, mut pod: Pod) -> Pod {
        let mut pods = self.pods.write().await;
        let key = pod.key();
        let old = pods.get(&key).cloned();
        pod.resource_version = old.as_ref().map_or(1, |o| o.resource_version + 1);
        pods.insert(key, pod.clone());
        drop(pods);

        if let Some(old) = old {
            self.notify(old, pod.clone());
        }
        pod
    }

    fn notify(&self, old: Pod, new: Pod) {
        // No receivers is fine: nobody is watching yet.
        if self.updates.send(PodUpdate { old, new }).is_err() {
            debug!("pod update dropped, no subscribers");
        }
    }
}

#[async_trait]
impl PodStore for MemoryPodStore {
    async fn get(&self, key: &NamespacedName) -> Result<Pod> {
        self.pods
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("pod", &key.namespace, &key.name))
    }

    async fn update(&self, mut pod: Pod) -> Result<Pod> {
        let mut pods = self.pods.write().await;
        let key = pod.key();
        let old = pods
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found("pod", &key.namespace, &key.name))?;
        if old.resource_version != pod.resource_version {
            return Err(Error::Conflict {
                namespace: key.namespace,
                name: key.name,
                resource_version: pod.resource_version,
            });
        }
        pod.resource_version += 1;
        pods.insert(key, pod.clone());
        drop(pods);

        self.notify(old, pod.clone());
        Ok(pod)
    }

    fn subscribe(&self) -> broadcast::Receiver<PodUpdate> {
        self.updates.subscribe()
    }
}

#[derive(Default)]
pub struct MemoryDefinitionStore {
    definitions: RwLock<HashMap<NamespacedName, NetworkAttachmentDefinition>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, definition: NetworkAttachmentDefinition) {
        let key = NamespacedName::new(&definition.namespace, &definition.name);
        self.definitions.write().await.insert(key, definition);
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<NetworkAttachmentDefinition> {
        self.definitions
            .read()
            .await
            .get(&NamespacedName::new(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found("network-attachment-definition", namespace, name))
    }
}
