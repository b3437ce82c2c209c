//! Stores backed by the Kubernetes API server.
//!
//! Pods are watched into a local cache that turns watch events into
//! old/new update pairs. Point lookups and writes go to the API server, so
//! a write is always checked against the latest `resourceVersion`.

use std::collections::HashMap;
use std::pin::pin;

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod as KubePod;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use log::{debug, info, warn};
use tokio::sync::{broadcast, RwLock};

use super::{DefinitionStore, NetworkAttachmentDefinition, PodStore};
use crate::error::{Error, Result};
use crate::types::{ContainerStatus, NamespacedName, Pod, PodUpdate};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

const NAD_GROUP: &str = "k8s.cni.cncf.io";
const NAD_VERSION: &str = "v1";
const NAD_KIND: &str = "NetworkAttachmentDefinition";

/// Last observed state of every watched pod.
pub struct PodCache {
    pods: RwLock<HashMap<NamespacedName, Pod>>,
    updates: broadcast::Sender<PodUpdate>,
}

impl Default for PodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PodCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            pods: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Records `pod`. Announces an update when an older copy was known and
    /// the object changed.
    pub async fn observe(&self, pod: Pod) {
        let old = self.pods.write().await.insert(pod.key(), pod.clone());
        match old {
            Some(old) if old.resource_version != pod.resource_version => {
                if self.updates.send(PodUpdate { old, new: pod }).is_err() {
                    debug!("pod update dropped, no subscribers");
                }
            }
            _ => {}
        }
    }

    pub async fn remove(&self, key: &NamespacedName) {
        self.pods.write().await.remove(key);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PodUpdate> {
        self.updates.subscribe()
    }
}

pub struct ClusterPodStore {
    client: Client,
    cache: PodCache,
}

impl ClusterPodStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: PodCache::new(),
        }
    }

    /// Mirrors pods matching `config` into the cache until the watch ends.
    /// Transient watch errors are retried with backoff.
    pub async fn watch(&self, config: watcher::Config) {
        let api: Api<KubePod> = Api::all(self.client.clone());
        let mut events = pin!(watcher(api, config).default_backoff());

        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Apply(object)) | Ok(watcher::Event::InitApply(object)) => {
                    match pod_from_kube(&object) {
                        Ok(pod) => self.cache.observe(pod).await,
                        Err(e) => warn!("skipping pod {}: {}", object.name_any(), e),
                    }
                }
                Ok(watcher::Event::Delete(object)) => {
                    let key =
                        NamespacedName::new(object.namespace().unwrap_or_default(), object.name_any());
                    self.cache.remove(&key).await;
                }
                Ok(watcher::Event::Init) => debug!("pod watch (re)listing"),
                Ok(watcher::Event::InitDone) => info!("pod watch synced"),
                Err(e) => warn!("pod watch error: {}", e),
            }
        }
        info!("pod watch ended");
    }
}

#[async_trait]
impl PodStore for ClusterPodStore {
    async fn get(&self, key: &NamespacedName) -> Result<Pod> {
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), &key.namespace);
        match api.get(&key.name).await {
            Ok(object) => pod_from_kube(&object),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found("pod", &key.namespace, &key.name))
            }
            Err(e) => Err(Error::Store(format!("failed to get pod {}: {}", key, e))),
        }
    }

    async fn update(&self, pod: Pod) -> Result<Pod> {
        let key = pod.key();
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), &key.namespace);
        let mut object = match api.get(&key.name).await {
            Ok(object) => object,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(Error::not_found("pod", &key.namespace, &key.name))
            }
            Err(e) => return Err(Error::Store(format!("failed to get pod {}: {}", key, e))),
        };

        // The API server rejects the replace if the pod moved past this version.
        object.metadata.resource_version = Some(pod.resource_version.to_string());
        object.metadata.annotations = Some(pod.annotations.clone());

        match api.replace(&key.name, &PostParams::default(), &object).await {
            Ok(stored) => pod_from_kube(&stored),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::Conflict {
                namespace: key.namespace,
                name: key.name,
                resource_version: pod.resource_version,
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found("pod", &key.namespace, &key.name))
            }
            Err(e) => Err(Error::Store(format!("failed to update pod {}: {}", key, e))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PodUpdate> {
        self.cache.subscribe()
    }
}

pub struct ClusterDefinitionStore {
    client: Client,
    resource: ApiResource,
}

impl ClusterDefinitionStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: ApiResource::from_gvk(&GroupVersionKind::gvk(
                NAD_GROUP,
                NAD_VERSION,
                NAD_KIND,
            )),
        }
    }
}

#[async_trait]
impl DefinitionStore for ClusterDefinitionStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<NetworkAttachmentDefinition> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        match api.get(name).await {
            Ok(object) => Ok(NetworkAttachmentDefinition {
                namespace: namespace.to_string(),
                name: name.to_string(),
                config: definition_config(&object.data).to_string(),
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found("network-attachment-definition", namespace, name))
            }
            Err(e) => Err(Error::Store(format!(
                "failed to get network-attachment-definition {}/{}: {}",
                namespace, name, e
            ))),
        }
    }
}

/// `spec.config` of a network-attachment-definition; absent means the
/// delegate's default configuration.
fn definition_config(data: &serde_json::Value) -> &str {
    data.get("spec")
        .and_then(|spec| spec.get("config"))
        .and_then(|config| config.as_str())
        .unwrap_or_default()
}

fn pod_from_kube(object: &KubePod) -> Result<Pod> {
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let resource_version: u64 = match object.resource_version() {
        Some(version) => version.parse().map_err(|_| {
            Error::Store(format!(
                "pod {}/{} has a non-numeric resourceVersion {:?}",
                namespace, name, version
            ))
        })?,
        None => 0,
    };

    let container_statuses = object
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|s| ContainerStatus {
                    name: s.name.clone(),
                    container_id: s.container_id.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Pod {
        uid: object.uid().unwrap_or_default(),
        annotations: object.annotations().clone(),
        namespace,
        name,
        resource_version,
        container_statuses,
    })
}
