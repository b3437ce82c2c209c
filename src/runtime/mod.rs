use async_trait::async_trait;

use crate::error::Result;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Path of the network namespace the given container runs in.
    async fn netns_path(&self, container_id: &str) -> Result<String>;
}
