//! Event sinks for user-visible reconciliation outcomes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event as KubeEvent, EventType, Recorder, Reporter};
use kube::Client;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::types::NamespacedName;

/// An informational event attached to a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub object: NamespacedName,
    pub reason: String,
    pub message: String,
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: Event);
}

/// Logs events and publishes them to the API server, attached to the pod
/// they concern.
pub struct ClusterEvents {
    recorder: Recorder,
}

impl ClusterEvents {
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for ClusterEvents {
    async fn record(&self, event: Event) {
        info!("[{}] {}: {}", event.object, event.reason, event.message);
        let regarding = pod_reference(&event.object);
        let published = self
            .recorder
            .publish(
                &KubeEvent {
                    type_: EventType::Normal,
                    reason: event.reason.clone(),
                    note: Some(event.message.clone()),
                    action: event.reason.clone(),
                    secondary: None,
                },
                &regarding,
            )
            .await;
        if let Err(e) = published {
            warn!("failed to publish event {} for pod {}: {}", event.reason, event.object, e);
        }
    }
}

fn pod_reference(pod: &NamespacedName) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("Pod".into()),
        namespace: Some(pod.namespace.clone()),
        name: Some(pod.name.clone()),
        ..Default::default()
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn record(&self, event: Event) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_refer_to_the_pod() {
        let reference = pod_reference(&NamespacedName::new("ns1", "tiny-winy-pod"));
        assert_eq!(reference.kind.as_deref(), Some("Pod"));
        assert_eq!(reference.api_version.as_deref(), Some("v1"));
        assert_eq!(reference.namespace.as_deref(), Some("ns1"));
        assert_eq!(reference.name.as_deref(), Some("tiny-winy-pod"));
    }

    #[tokio::test]
    async fn recording_events_keeps_order() {
        let events = RecordingEvents::new();
        for reason in ["AddedInterface", "RemovedInterface"] {
            events
                .record(Event {
                    object: NamespacedName::new("ns1", "p"),
                    reason: reason.into(),
                    message: String::new(),
                })
                .await;
        }
        let reasons: Vec<_> = events.events().await.into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec!["AddedInterface", "RemovedInterface"]);
    }
}
