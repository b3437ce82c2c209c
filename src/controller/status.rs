use log::warn;

use super::Controller;
use crate::annotations::{pod_network_status, serialize_network_status, NetworkStatus};
use crate::error::{Error, Result};
use crate::types::{Pod, NETWORK_STATUS_ANNOTATION};

impl Controller {
    /// Rewrites the pod's network-status annotation with the list `compute`
    /// derives from the pod and its current status.
    ///
    /// `compute` returning `None` means the status already holds the change
    /// and nothing is written. A write rejected as stale re-reads the pod and
    /// recomputes, at most `conflict_retries` times.
    pub(crate) async fn update_network_status<F>(&self, mut pod: Pod, compute: F) -> Result<Pod>
    where
        F: Fn(&Pod, &[NetworkStatus]) -> Result<Option<Vec<NetworkStatus>>> + Send,
    {
        let key = pod.key();
        let mut retries = 0;
        loop {
            let current = pod_network_status(&pod)?;
            let Some(updated) = compute(&pod, &current)? else {
                return Ok(pod);
            };
            pod.annotations.insert(
                NETWORK_STATUS_ANNOTATION.to_string(),
                serialize_network_status(&updated)?,
            );

            match self.pods.update(pod).await {
                Ok(stored) => return Ok(stored),
                Err(Error::Conflict { .. }) if retries < self.conflict_retries => {
                    retries += 1;
                    warn!(
                        "network-status of pod {} changed concurrently, retrying ({}/{})",
                        key, retries, self.conflict_retries
                    );
                    pod = self.pods.get(&key).await?;
                }
                Err(e @ (Error::Conflict { .. } | Error::NotFound { .. })) => return Err(e),
                Err(e) => {
                    return Err(Error::Store(format!(
                        "failed to update the network-status annotation of pod {}: {}",
                        key, e
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::delegate::{DelegateClient, DelegateRequest, DelegateResponse};
    use crate::events::RecordingEvents;
    use crate::runtime::ContainerRuntime;
    use crate::store::{MemoryDefinitionStore, MemoryPodStore, PodStore};

    struct NoRuntime;

    #[async_trait]
    impl ContainerRuntime for NoRuntime {
        async fn netns_path(&self, _container_id: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    struct NoDelegate;

    #[async_trait]
    impl DelegateClient for NoDelegate {
        async fn invoke(&self, _request: DelegateRequest) -> Result<DelegateResponse> {
            Ok(DelegateResponse::default())
        }
    }

    fn controller(pods: Arc<MemoryPodStore>) -> Controller {
        Controller::new(
            pods,
            Arc::new(MemoryDefinitionStore::new()),
            Arc::new(NoRuntime),
            Arc::new(NoDelegate),
            Arc::new(RecordingEvents::new()),
        )
    }

    fn pod() -> Pod {
        Pod {
            namespace: "ns1".into(),
            name: "tiny-winy-pod".into(),
            ..Default::default()
        }
    }

    fn one_entry(_: &Pod, current: &[NetworkStatus]) -> Result<Option<Vec<NetworkStatus>>> {
        let mut updated = current.to_vec();
        updated.push(NetworkStatus {
            name: "ns1/a".into(),
            interface: "net1".into(),
            ..Default::default()
        });
        Ok(Some(updated))
    }

    #[tokio::test]
    async fn deleted_pod_surfaces_as_not_found() {
        let pods = Arc::new(MemoryPodStore::new());
        let err = controller(pods)
            .update_network_status(pod(), one_entry)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "pod", .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let pods = Arc::new(MemoryPodStore::new());
        let stored = pods.apply(pod()).await;
        let result = controller(pods.clone())
            .update_network_status(stored.clone(), |_, _| Ok(None))
            .await
            .unwrap();
        assert_eq!(result.resource_version, stored.resource_version);
        assert_eq!(pods.get(&stored.key()).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn exhausted_conflict_retries_keep_the_conflict() {
        let pods = Arc::new(MemoryPodStore::new());
        let mut stale = pods.apply(pod()).await;
        stale.resource_version = 0;

        let err = controller(pods.clone())
            .with_conflict_retries(0)
            .update_network_status(stale, one_entry)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }), "{:?}", err);
    }
}
