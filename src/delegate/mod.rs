//! Delegate invocation: asking the network plugin server to add or remove
//! one interface inside a pod's network namespace.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod multus;
pub use multus::MultusClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Add => "ADD",
            Command::Del => "DEL",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the plugin server needs to run one CNI command.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegateRequest {
    pub command: Command,
    pub container_id: String,
    pub netns: String,
    pub interface: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub pod_uid: String,
    /// Plugin chain configuration taken from the network attachment definition.
    pub config: Vec<u8>,
    pub ip_request: Vec<String>,
    pub mac_request: Option<String>,
}

impl DelegateRequest {
    /// CNI environment for this request.
    pub fn env(&self) -> BTreeMap<String, String> {
        let cni_args = format!(
            "IgnoreUnknown=true;K8S_POD_NAMESPACE={};K8S_POD_NAME={};K8S_POD_INFRA_CONTAINER_ID={};K8S_POD_UID={}",
            self.pod_namespace, self.pod_name, self.container_id, self.pod_uid
        );
        BTreeMap::from([
            ("CNI_COMMAND".to_string(), self.command.as_str().to_string()),
            ("CNI_CONTAINERID".to_string(), self.container_id.clone()),
            ("CNI_NETNS".to_string(), self.netns.clone()),
            ("CNI_IFNAME".to_string(), self.interface.clone()),
            ("CNI_ARGS".to_string(), cni_args),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegateResponse {
    #[serde(default)]
    pub result: Option<CniResult>,
}

/// CNI result as reported by the plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub interfaces: Vec<CniInterface>,
    #[serde(default)]
    pub ips: Vec<CniIp>,
    #[serde(default)]
    pub routes: Vec<CniRoute>,
    #[serde(default)]
    pub dns: Dns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniInterface {
    pub name: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub sandbox: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniIp {
    /// Address in CIDR notation.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Index into [`CniResult::interfaces`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniRoute {
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

#[async_trait]
pub trait DelegateClient: Send + Sync {
    /// Runs one CNI command through the plugin server.
    async fn invoke(&self, request: DelegateRequest) -> Result<DelegateResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_carries_pod_identity_in_cni_args() {
        let request = DelegateRequest {
            command: Command::Del,
            container_id: "1234".into(),
            netns: "/proc/42/ns/net".into(),
            interface: "net1".into(),
            pod_namespace: "ns1".into(),
            pod_name: "tiny-winy-pod".into(),
            pod_uid: "uid-1".into(),
            config: Vec::new(),
            ip_request: Vec::new(),
            mac_request: None,
        };

        let env = request.env();
        assert_eq!(env["CNI_COMMAND"], "DEL");
        assert_eq!(env["CNI_NETNS"], "/proc/42/ns/net");
        assert_eq!(env["CNI_IFNAME"], "net1");
        assert_eq!(
            env["CNI_ARGS"],
            "IgnoreUnknown=true;K8S_POD_NAMESPACE=ns1;K8S_POD_NAME=tiny-winy-pod;K8S_POD_INFRA_CONTAINER_ID=1234;K8S_POD_UID=uid-1"
        );
    }

    #[test]
    fn result_tolerates_missing_fields() {
        let result: CniResult = serde_json::from_str(
            r#"{"cniVersion":"1.0.0","interfaces":[{"name":"net1","sandbox":"/proc/42/ns/net"}]}"#,
        )
        .unwrap();
        assert_eq!(result.interfaces[0].mac, "");
        assert!(result.ips.is_empty());
        assert!(result.dns.is_empty());
    }
}
