use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::controller::DEFAULT_CONFLICT_RETRIES;

/// Container runtimes the controller can resolve network namespaces with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CriType {
    Docker,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub cri_socket_path: PathBuf,
    pub cri_type: CriType,
    pub multus_socket_path: PathBuf,
    /// Number of parallel worker loops.
    pub workers: usize,
    pub conflict_retries: u32,
    /// Only pods scheduled to this node are watched; all pods when unset.
    pub node_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cri_socket_path: "/run/docker.sock".into(),
            cri_type: CriType::Docker,
            multus_socket_path: "/run/multus/multus.sock".into(),
            workers: 1,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            node_name: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("dynamic-networks.toml"))
                .merge(Json::file("dynamic-networks.json"))
                .merge(Env::prefixed("DYNAMIC_NETWORKS_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.workers == 0 {
            anyhow::bail!("Invalid configuration: workers must be at least 1");
        }
        if config.multus_socket_path.as_os_str().is_empty() {
            anyhow::bail!("Invalid configuration: multus_socket_path must not be empty");
        }
        if config.cri_socket_path.as_os_str().is_empty() {
            anyhow::bail!("Invalid configuration: cri_socket_path must not be empty");
        }
        if config.node_name.as_deref() == Some("") {
            anyhow::bail!("Invalid configuration: node_name must not be empty when set");
        }
        Ok(config)
    }

    /// Field selector restricting the pod watch to this node.
    pub fn pod_field_selector(&self) -> Option<String> {
        self.node_name
            .as_ref()
            .map(|node| format!("spec.nodeName={}", node))
    }
}
