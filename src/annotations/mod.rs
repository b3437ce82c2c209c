//! Pod annotations read and written by the controller.

pub mod selection;
pub mod status;

pub use selection::{
    exclusive_entries, parse_network_selection, NetworkSelectionElement, SelectionKey,
};
pub use status::{
    add_interface_status, find_attachment, parse_network_status, remove_interface_status,
    serialize_network_status, NetworkStatus,
};

use crate::error::{Error, Result};
use crate::types::{Pod, NETWORKS_ANNOTATION, NETWORK_STATUS_ANNOTATION};

/// Desired attachments of `pod`. A pod without the networks annotation is
/// an error, not an empty list.
pub fn pod_network_selection(pod: &Pod) -> Result<Vec<NetworkSelectionElement>> {
    let raw = pod.annotation(NETWORKS_ANNOTATION).ok_or_else(|| {
        Error::Annotation(format!(
            "pod {} is missing the \"{}\" annotation",
            pod.key(),
            NETWORKS_ANNOTATION
        ))
    })?;
    parse_network_selection(raw, &pod.namespace)
}

pub fn pod_network_status(pod: &Pod) -> Result<Vec<NetworkStatus>> {
    parse_network_status(pod.annotation(NETWORK_STATUS_ANNOTATION))
}
