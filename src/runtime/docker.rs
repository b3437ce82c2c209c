use super::ContainerRuntime;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::Docker;
use log::debug;
use std::path::Path;

/// Client timeout for the Docker API, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the Docker daemon listening on `socket_path`.
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let docker = Docker::connect_with_socket(
            &socket_path.to_string_lossy(),
            DOCKER_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| Error::Runtime(format!("failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn netns_path(&self, container_id: &str) -> Result<String> {
        let detail = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| {
                Error::Runtime(format!("failed to inspect container {}: {}", container_id, e))
            })?;

        let pid = detail.state.and_then(|s| s.pid).unwrap_or_default();
        let netns = netns_for_pid(pid).ok_or_else(|| {
            Error::Runtime(format!("container {} has no running process", container_id))
        })?;
        debug!("container {} runs in netns {}", container_id, netns);
        Ok(netns)
    }
}

fn netns_for_pid(pid: i64) -> Option<String> {
    if pid > 0 {
        Some(format!("/proc/{}/ns/net", pid))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_path_is_derived_from_pid() {
        assert_eq!(netns_for_pid(4242).as_deref(), Some("/proc/4242/ns/net"));
        assert_eq!(netns_for_pid(0), None);
        assert_eq!(netns_for_pid(-1), None);
    }
}
