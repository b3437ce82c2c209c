//! The network-status annotation: reading it, and computing the list that
//! results from attaching or detaching one interface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::selection::NetworkSelectionElement;
use crate::delegate::{CniResult, Dns};
use crate::error::{Error, Result};

/// Status of one attached interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// `<namespace>/<name>` of the definition the interface belongs to.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
    /// Fields written by other components, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NetworkStatus {
    /// Whether this entry is the attachment `element` refers to, given the
    /// pod's current `selections`.
    ///
    /// A requested interface must match exactly. Without one, the entry only
    /// matches when no selection names its interface explicitly.
    pub fn matches(
        &self,
        element: &NetworkSelectionElement,
        selections: &[NetworkSelectionElement],
    ) -> bool {
        if self.name != element.network_name() {
            return false;
        }
        match element.interface() {
            Some(iface) => self.interface == iface,
            None => !selections
                .iter()
                .any(|s| s.interface() == Some(self.interface.as_str())),
        }
    }

    /// Builds the status entry for an interface the plugin just created.
    pub fn from_result(
        element: &NetworkSelectionElement,
        result: &CniResult,
    ) -> NetworkStatus {
        let index = result
            .interfaces
            .iter()
            .position(|i| !i.sandbox.is_empty())
            .or(if result.interfaces.is_empty() { None } else { Some(0) });

        let mut status = NetworkStatus {
            name: element.network_name(),
            interface: element.interface().unwrap_or_default().to_string(),
            dns: result.dns.clone(),
            ..Default::default()
        };

        if let Some(index) = index {
            let iface = &result.interfaces[index];
            if !iface.name.is_empty() {
                status.interface = iface.name.clone();
            }
            status.mac = iface.mac.clone();
        }

        status.ips = result
            .ips
            .iter()
            .filter(|ip| ip.interface.is_none() || ip.interface == index)
            .map(|ip| match ip.address.split_once('/') {
                Some((addr, _)) => addr.to_string(),
                None => ip.address.clone(),
            })
            .collect();
        status
    }
}

/// Reads the status annotation; an absent or blank annotation is empty.
pub fn parse_network_status(annotation: Option<&str>) -> Result<Vec<NetworkStatus>> {
    match annotation.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            Error::Annotation(format!("failed to parse network-status annotation: {}", e))
        }),
    }
}

pub fn serialize_network_status(statuses: &[NetworkStatus]) -> Result<String> {
    Ok(serde_json::to_string(statuses)?)
}

/// The entry recorded for `element`, if it is attached.
pub fn find_attachment<'a>(
    current: &'a [NetworkStatus],
    element: &NetworkSelectionElement,
    selections: &[NetworkSelectionElement],
) -> Option<&'a NetworkStatus> {
    current.iter().find(|s| s.matches(element, selections))
}

/// Appends `status`, refusing to record an interface without a name or the
/// same interface name twice.
pub fn add_interface_status(
    current: &[NetworkStatus],
    status: NetworkStatus,
) -> Result<Vec<NetworkStatus>> {
    if status.interface.is_empty() {
        return Err(Error::Annotation(format!(
            "no interface name known for network {}",
            status.name
        )));
    }
    if current.iter().any(|s| s.interface == status.interface) {
        return Err(Error::Annotation(format!(
            "interface {} is already recorded in the network status",
            status.interface
        )));
    }
    let mut updated = current.to_vec();
    updated.push(status);
    Ok(updated)
}

/// Drops the single entry with `attached`'s network and interface. `None`
/// when no such entry is recorded.
pub fn remove_interface_status(
    current: &[NetworkStatus],
    attached: &NetworkStatus,
) -> Option<Vec<NetworkStatus>> {
    let index = current
        .iter()
        .position(|s| s.name == attached.name && s.interface == attached.interface)?;
    let mut updated = current.to_vec();
    updated.remove(index);
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{CniInterface, CniIp};

    fn element(name: &str, iface: Option<&str>) -> NetworkSelectionElement {
        NetworkSelectionElement {
            name: name.into(),
            namespace: "ns1".into(),
            interface_request: iface.map(Into::into),
            ..Default::default()
        }
    }

    fn status(name: &str, iface: &str) -> NetworkStatus {
        NetworkStatus {
            name: format!("ns1/{}", name),
            interface: iface.into(),
            ..Default::default()
        }
    }

    fn macvlan_result() -> CniResult {
        CniResult {
            cni_version: "1.0.0".into(),
            interfaces: vec![
                CniInterface {
                    name: "macvlan-host".into(),
                    ..Default::default()
                },
                CniInterface {
                    name: "net1".into(),
                    mac: "02:03:04:05:06:07".into(),
                    sandbox: "/proc/42/ns/net".into(),
                },
            ],
            ips: vec![CniIp {
                address: "10.1.1.11/24".into(),
                gateway: None,
                interface: Some(1),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn status_from_result_uses_sandbox_interface() {
        let status = NetworkStatus::from_result(&element("macvlan1-config", None), &macvlan_result());
        assert_eq!(status.name, "ns1/macvlan1-config");
        assert_eq!(status.interface, "net1");
        assert_eq!(status.mac, "02:03:04:05:06:07");
        assert_eq!(status.ips, vec!["10.1.1.11".to_string()]);
        assert!(!status.default);
    }

    #[test]
    fn status_from_empty_result_keeps_requested_interface() {
        let status = NetworkStatus::from_result(&element("net", Some("ens4")), &CniResult::default());
        assert_eq!(status.interface, "ens4");
        assert!(status.ips.is_empty());
    }

    #[test]
    fn absent_or_blank_status_is_empty() {
        assert!(parse_network_status(None).unwrap().is_empty());
        assert!(parse_network_status(Some(" ")).unwrap().is_empty());
        assert!(parse_network_status(Some("{")).is_err());
    }

    #[test]
    fn add_appends_and_rejects_duplicate_interfaces() {
        let current = vec![status("cbr0", "eth0")];
        let updated = add_interface_status(&current, status("a", "net1")).unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].interface, "net1");

        assert!(add_interface_status(&updated, status("b", "net1")).is_err());
    }

    #[test]
    fn add_rejects_unnamed_interfaces() {
        let current = vec![status("cbr0", "eth0")];
        assert!(add_interface_status(&current, status("a", "")).is_err());
        assert!(add_interface_status(&[], status("a", "")).is_err());
    }

    #[test]
    fn requested_interface_must_match_exactly() {
        let current = vec![status("a", "net1"), status("b", "ens4"), status("b", "ens5")];
        let selections = vec![element("b", Some("ens4"))];

        let found = find_attachment(&current, &element("b", Some("ens5")), &selections);
        assert_eq!(found, Some(&status("b", "ens5")));
        assert_eq!(find_attachment(&current, &element("b", Some("ens6")), &selections), None);
    }

    #[test]
    fn unnamed_selection_skips_explicitly_claimed_interfaces() {
        let current = vec![status("a", "eth5"), status("a", "net1")];
        let selections = vec![element("a", Some("eth5")), element("a", None)];

        let found = find_attachment(&current, &element("a", None), &selections);
        assert_eq!(found, Some(&status("a", "net1")));

        // Only the explicitly named attachment is recorded: nothing left for `a`.
        let only_explicit = vec![status("a", "eth5")];
        assert_eq!(find_attachment(&only_explicit, &element("a", None), &selections), None);

        // Without explicit claims any interface of the network will do.
        assert_eq!(
            find_attachment(&only_explicit, &element("a", None), &[]),
            Some(&status("a", "eth5"))
        );
    }

    #[test]
    fn remove_drops_exactly_one_entry() {
        let current = vec![status("a", "eth5"), status("a", "net1"), status("b", "ens4")];

        let updated = remove_interface_status(&current, &status("a", "net1")).unwrap();
        assert_eq!(updated, vec![status("a", "eth5"), status("b", "ens4")]);

        assert_eq!(remove_interface_status(&updated, &status("a", "net1")), None);
    }

    #[test]
    fn round_trip_preserves_order_and_unknown_fields() {
        let raw = r#"[{"name":"cbr0","interface":"eth0","ips":["10.244.0.5"],"default":true,"dns":{}},{"name":"ns1/a","interface":"net1","mac":"02:03:04:05:06:07","device-info":{"type":"pci"}}]"#;
        let parsed = parse_network_status(Some(raw)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[1].extra.contains_key("device-info"));

        let reparsed = parse_network_status(Some(&serialize_network_status(&parsed).unwrap())).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
