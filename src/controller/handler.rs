use log::{debug, error, info};

use super::{Controller, Direction, ReconcileRequest};
use crate::annotations::{exclusive_entries, pod_network_selection};
use crate::error::Result;
use crate::types::Pod;

impl Controller {
    /// Turns one pod update into add/remove requests.
    ///
    /// Unparseable annotations discard the update; nothing is retried.
    pub async fn handle_pod_update(&self, old: &Pod, new: &Pod) {
        if old.annotations == new.annotations {
            return;
        }
        let key = new.key();
        debug!("pod [{}] updated", key);

        let old_networks = match pod_network_selection(old) {
            Ok(networks) => networks,
            Err(e) => {
                error!("failed to compute the network selection elements from the *old* pod {}: {}", key, e);
                return;
            }
        };
        let new_networks = match pod_network_selection(new) {
            Ok(networks) => networks,
            Err(e) => {
                error!("failed to compute the network selection elements from the *new* pod {}: {}", key, e);
                return;
            }
        };

        let to_add = exclusive_entries(&new_networks, &old_networks);
        let to_remove = exclusive_entries(&old_networks, &new_networks);
        info!("{} attachments to add to pod {}", to_add.len(), key);
        info!("{} attachments to remove from pod {}", to_remove.len(), key);
        if to_add.is_empty() && to_remove.is_empty() {
            return;
        }

        let netns = match self.netns_path(new).await {
            Ok(netns) => netns,
            Err(e) => {
                error!("failed to figure out the network namespace of pod {}: {}", key, e);
                return;
            }
        };

        for (direction, networks) in [(Direction::Add, to_add), (Direction::Remove, to_remove)] {
            if networks.is_empty() {
                continue;
            }
            self.enqueue(ReconcileRequest {
                pod: key.clone(),
                direction,
                networks,
                netns: netns.clone(),
            });
        }
    }

    /// Network namespace of the pod's first container; empty while no
    /// container is known yet.
    async fn netns_path(&self, pod: &Pod) -> Result<String> {
        match pod.container_id() {
            Some(id) => self.runtime.netns_path(id).await,
            None => Ok(String::new()),
        }
    }
}
