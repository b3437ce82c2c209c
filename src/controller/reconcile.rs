use log::{error, info, warn};

use super::{Controller, Direction, ReconcileRequest};
use crate::annotations::{
    add_interface_status, find_attachment, pod_network_selection, pod_network_status,
    remove_interface_status, NetworkSelectionElement, NetworkStatus,
};
use crate::delegate::{Command, DelegateRequest};
use crate::error::{Error, Result};
use crate::store::NetworkAttachmentDefinition;
use crate::types::Pod;

impl Controller {
    /// Works through the request's networks in order, stopping at the first
    /// error. Entries already reflected in the pod's network status are
    /// skipped, which makes replaying a partially applied request safe.
    pub(crate) async fn reconcile(&self, request: &ReconcileRequest) -> Result<()> {
        let _guard = self.locks.lock(&request.pod).await;
        let mut pod = self.pods.get(&request.pod).await?;

        for network in &request.networks {
            pod = match request.direction {
                Direction::Add => self.add_network(request, pod, network).await?,
                Direction::Remove => self.remove_network(request, pod, network).await?,
            };
        }
        Ok(())
    }

    async fn add_network(
        &self,
        request: &ReconcileRequest,
        pod: Pod,
        network: &NetworkSelectionElement,
    ) -> Result<Pod> {
        info!("network to add: {}", network.key());
        let statuses = pod_network_status(&pod)?;
        if find_attachment(&statuses, network, &current_selections(&pod)).is_some() {
            info!("network {} already attached to pod {}, skipping", network.key(), request.pod);
            return Ok(pod);
        }
        if let Some(iface) = network.interface() {
            if let Some(taken) = statuses.iter().find(|s| s.interface == iface) {
                return Err(Error::Annotation(format!(
                    "interface {} of pod {} already belongs to network {}",
                    iface, request.pod, taken.name
                )));
            }
        }

        let definition = self.definition(network).await?;
        let response = self
            .delegate
            .invoke(delegate_request(
                Command::Add,
                request,
                &pod,
                network,
                network.interface().unwrap_or_default(),
                &definition,
            ))
            .await?;
        let result = response.result.ok_or_else(|| {
            Error::Delegate(format!("empty ADD result for network {}", network.key()))
        })?;
        info!("ADD result for {}: {:?}", network.key(), result);

        let status = NetworkStatus::from_result(network, &result);
        let interface = status.interface.clone();
        let pod = self
            .update_network_status(pod, |pod, current| {
                if find_attachment(current, network, &current_selections(pod)).is_some() {
                    return Ok(None);
                }
                add_interface_status(current, status.clone()).map(Some)
            })
            .await?;

        self.event(
            &request.pod,
            "AddedInterface",
            format!(
                "pod [{}]: added interface {} to network: {}",
                request.pod, interface, network.name
            ),
        )
        .await;
        Ok(pod)
    }

    async fn remove_network(
        &self,
        request: &ReconcileRequest,
        pod: Pod,
        network: &NetworkSelectionElement,
    ) -> Result<Pod> {
        info!("network to remove: {}", network.key());
        let statuses = pod_network_status(&pod)?;
        let Some(attached) = find_attachment(&statuses, network, &current_selections(&pod)).cloned()
        else {
            info!("network {} not attached to pod {}, skipping", network.key(), request.pod);
            return Ok(pod);
        };
        // The recorded interface is the one to delete.
        let interface = attached.interface.clone();

        let definition = self.definition(network).await?;
        let response = self
            .delegate
            .invoke(delegate_request(
                Command::Del,
                request,
                &pod,
                network,
                &interface,
                &definition,
            ))
            .await?;
        info!("DEL response for {}: {:?}", network.key(), response);

        let pod = self
            .update_network_status(pod, |_, current| Ok(remove_interface_status(current, &attached)))
            .await?;

        self.event(
            &request.pod,
            "RemovedInterface",
            format!(
                "pod [{}]: removed interface {} from network: {}",
                request.pod, interface, network.name
            ),
        )
        .await;
        Ok(pod)
    }

    async fn definition(
        &self,
        network: &NetworkSelectionElement,
    ) -> Result<NetworkAttachmentDefinition> {
        self.definitions
            .get(&network.namespace, &network.name)
            .await
            .map_err(|e| {
                error!(
                    "failed to access the network-attachment-definition {}: {}",
                    network.network_name(),
                    e
                );
                e
            })
    }
}

/// Selections currently on the pod. Unreadable ones claim no interfaces.
fn current_selections(pod: &Pod) -> Vec<NetworkSelectionElement> {
    pod_network_selection(pod).unwrap_or_else(|e| {
        warn!("ignoring the networks annotation of pod {}: {}", pod.key(), e);
        Vec::new()
    })
}

fn delegate_request(
    command: Command,
    request: &ReconcileRequest,
    pod: &Pod,
    network: &NetworkSelectionElement,
    interface: &str,
    definition: &NetworkAttachmentDefinition,
) -> DelegateRequest {
    DelegateRequest {
        command,
        container_id: pod.container_id().unwrap_or_default().to_string(),
        netns: request.netns.clone(),
        interface: interface.to_string(),
        pod_namespace: pod.namespace.clone(),
        pod_name: pod.name.clone(),
        pod_uid: pod.uid.clone(),
        config: definition.config.clone().into_bytes(),
        ip_request: network.ip_request.clone(),
        mac_request: network.mac_request.clone(),
    }
}
