//! Network selection elements: parsing the networks annotation and
//! diffing two selection lists.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One desired attachment as written in the networks annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSelectionElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "interface", default, skip_serializing_if = "Option::is_none")]
    pub interface_request: Option<String>,
    #[serde(rename = "ips", default, skip_serializing_if = "Vec::is_empty")]
    pub ip_request: Vec<String>,
    #[serde(rename = "mac", default, skip_serializing_if = "Option::is_none")]
    pub mac_request: Option<String>,
    #[serde(rename = "default-route", default, skip_serializing_if = "Vec::is_empty")]
    pub gateway_request: Vec<String>,
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<BTreeMap<String, serde_json::Value>>,
}

/// Identity of a selection element for diffing: the definition reference
/// plus the requested interface name, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    pub namespace: String,
    pub name: String,
    pub interface: Option<String>,
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interface {
            Some(iface) => write!(f, "{}/{}/{}", self.namespace, self.name, iface),
            None => write!(f, "{}/{}", self.namespace, self.name),
        }
    }
}

impl NetworkSelectionElement {
    pub fn key(&self) -> SelectionKey {
        SelectionKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            interface: self.interface().map(str::to_string),
        }
    }

    /// The requested interface name; an empty request counts as none.
    pub fn interface(&self) -> Option<&str> {
        self.interface_request.as_deref().filter(|i| !i.is_empty())
    }

    /// `<namespace>/<name>` of the referenced definition.
    pub fn network_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Annotation(
                "network selection element is missing a name".into(),
            ));
        }
        for ip in &self.ip_request {
            parse_cidr(ip)?;
        }
        if let Some(mac) = &self.mac_request {
            validate_mac(mac)?;
        }
        Ok(())
    }
}

/// Parses the networks annotation.
///
/// Accepts either a JSON list of selection elements or the short
/// comma-separated `[<namespace>/]<name>[@<interface>]` form.  Elements
/// without a namespace inherit `default_namespace`.  A blank annotation is
/// the empty list.
pub fn parse_network_selection(
    annotation: &str,
    default_namespace: &str,
) -> Result<Vec<NetworkSelectionElement>> {
    let trimmed = annotation.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut elements: Vec<NetworkSelectionElement> = if trimmed.contains(&['[', '{', '"'][..]) {
        serde_json::from_str(trimmed).map_err(|e| {
            Error::Annotation(format!("failed to parse networks annotation as JSON: {}", e))
        })?
    } else {
        trimmed
            .split(',')
            .map(|item| parse_network_text(item.trim()))
            .collect::<Result<_>>()?
    };

    for element in &mut elements {
        if element.namespace.is_empty() {
            element.namespace = default_namespace.to_string();
        }
        element.validate()?;
    }
    Ok(elements)
}

fn parse_network_text(item: &str) -> Result<NetworkSelectionElement> {
    if item.matches('/').count() > 1 {
        return Err(Error::Annotation(format!(
            "network '{}' has more than one namespace separator",
            item
        )));
    }
    if item.matches('@').count() > 1 {
        return Err(Error::Annotation(format!(
            "network '{}' has more than one interface separator",
            item
        )));
    }

    let (rest, interface) = match item.split_once('@') {
        Some((rest, iface)) => (rest, Some(iface.to_string())),
        None => (item, None),
    };
    let (namespace, name) = match rest.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => ("", rest),
    };

    for part in [namespace, name] {
        if !part.is_empty() && !is_dns1123_label(part) {
            return Err(Error::Annotation(format!(
                "'{}' in network '{}' is not a valid DNS-1123 label",
                part, item
            )));
        }
    }

    Ok(NetworkSelectionElement {
        name: name.to_string(),
        namespace: namespace.to_string(),
        interface_request: interface,
        ..Default::default()
    })
}

/// Returns every element of `needles` whose identity key is absent from
/// `haystack`, in `needles` order.
pub fn exclusive_entries(
    needles: &[NetworkSelectionElement],
    haystack: &[NetworkSelectionElement],
) -> Vec<NetworkSelectionElement> {
    let present: HashSet<SelectionKey> = haystack.iter().map(|e| e.key()).collect();
    needles
        .iter()
        .filter(|needle| !present.contains(&needle.key()))
        .cloned()
        .collect()
}

fn is_dns1123_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    bytes.len() <= 63
        && bytes.first().is_some_and(alnum)
        && bytes.last().is_some_and(alnum)
        && bytes.iter().all(|b| alnum(b) || *b == b'-')
}

fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8)> {
    let invalid = || Error::Annotation(format!("invalid CIDR '{}' in ips request", cidr));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

fn validate_mac(mac: &str) -> Result<()> {
    let octets: Vec<&str> = mac.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(Error::Annotation(format!("invalid MAC address '{}'", mac)))
    }
}
