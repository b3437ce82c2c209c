//! Client for the multus delegate API: HTTP/1.1 over the multus server's
//! Unix socket.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use log::debug;
use serde::Serialize;
use tokio::net::UnixStream;

use super::{DelegateClient, DelegateRequest, DelegateResponse};
use crate::error::{Error, Result};

const DELEGATE_ENDPOINT: &str = "/delegate";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    env: BTreeMap<String, String>,
    /// Go's `[]byte` travels as base64.
    config: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface_attributes: Option<InterfaceAttributes<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceAttributes<'a> {
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    ip_request: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    mac_request: Option<&'a str>,
}

pub struct MultusClient {
    socket_path: PathBuf,
}

impl MultusClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    fn encode(request: &DelegateRequest) -> Result<Vec<u8>> {
        let interface_attributes =
            if request.ip_request.is_empty() && request.mac_request.is_none() {
                None
            } else {
                Some(InterfaceAttributes {
                    ip_request: &request.ip_request,
                    mac_request: request.mac_request.as_deref(),
                })
            };
        let wire = WireRequest {
            env: request.env(),
            config: STANDARD.encode(&request.config),
            interface_attributes,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Sends one POST on a fresh connection and returns the status and the
    /// whole body.
    async fn post(&self, path: &str, body: Vec<u8>) -> Result<(StatusCode, Bytes)> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Delegate(format!(
                "cannot connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::Delegate(format!("HTTP handshake failed: {}", e)))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("multus connection closed with error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::HOST, "multus")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::Delegate(format!("cannot build request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Error::Delegate(format!("request to multus server failed: {}", e)))?;
        let status = response.status();
        let payload = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Delegate(format!("cannot read multus response: {}", e)))?
            .to_bytes();
        Ok((status, payload))
    }
}

#[async_trait]
impl DelegateClient for MultusClient {
    async fn invoke(&self, request: DelegateRequest) -> Result<DelegateResponse> {
        let body = Self::encode(&request)?;
        debug!(
            "invoking {} for container {} iface {:?}",
            request.command, request.container_id, request.interface
        );

        let (status, payload) = self.post(DELEGATE_ENDPOINT, body).await?;
        if !status.is_success() {
            return Err(Error::Delegate(format!(
                "{} failed with status {}: {}",
                request.command,
                status.as_u16(),
                String::from_utf8_lossy(&payload).trim()
            )));
        }
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(DelegateResponse::default());
        }
        serde_json::from_slice(&payload)
            .map_err(|e| Error::Delegate(format!("invalid response from multus server: {}", e)))
    }
}
