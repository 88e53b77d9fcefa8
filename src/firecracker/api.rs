//! Firecracker HTTP API client (C4).
//!
//! A length-framed HTTP/1.1 client over AF_UNIX. The hypervisor's API
//! server is single-threaded and has been observed to misbehave under
//! pipelined requests, so this is a load-bearing invariant, not a detail:
//! every request opens a fresh connection, carries `Connection: close`, and
//! the connection is torn down after the response regardless of status.
//!
//! Reference: https://github.com/firecracker-microvm/firecracker/blob/main/src/api_server/swagger/firecracker.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::config::{Action, ActionType, BootSource, DriveConfig, MachineConfig, NetworkInterface, VsockConfig};

/// Errors from the Firecracker API client, split per §7's taxonomy: a
/// transport failure (socket unreachable, early close, readiness timeout)
/// is distinct from an API-level error (non-2xx status).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("request build error: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("response body was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("readiness wait timed out after {0:?}")]
    ReadinessTimeout(Duration),
}

/// Firecracker API client bound to a single Unix socket path. Cheap to
/// construct; holds no connection state between calls.
#[derive(Clone)]
pub struct FirecrackerClient {
    socket_path: PathBuf,
}

impl FirecrackerClient {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn put_machine_config(&self, config: &MachineConfig) -> Result<(), ApiError> {
        self.put("/machine-config", config).await
    }

    pub async fn put_boot_source(&self, config: &BootSource) -> Result<(), ApiError> {
        self.put("/boot-source", config).await
    }

    pub async fn put_drive(&self, config: &DriveConfig) -> Result<(), ApiError> {
        let path = format!("/drives/{}", config.drive_id);
        self.put(&path, config).await
    }

    pub async fn put_network_interface(&self, config: &NetworkInterface) -> Result<(), ApiError> {
        let path = format!("/network-interfaces/{}", config.iface_id);
        self.put(&path, config).await
    }

    pub async fn put_vsock(&self, config: &VsockConfig) -> Result<(), ApiError> {
        self.put("/vsock", config).await
    }

    pub async fn start_instance(&self) -> Result<(), ApiError> {
        self.put("/actions", &Action::new(ActionType::InstanceStart)).await
    }

    pub async fn send_ctrl_alt_del(&self) -> Result<(), ApiError> {
        self.put("/actions", &Action::new(ActionType::SendCtrlAltDel)).await
    }

    /// `GET /` liveness probe.
    pub async fn ping(&self) -> Result<(), ApiError> {
        self.get_raw("/").await.map(|_| ())
    }

    /// Poll `GET /` every 100ms until it succeeds or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ApiError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => return Err(ApiError::ReadinessTimeout(timeout)),
            }
        }
    }

    async fn put<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ApiError> {
        let body_bytes = serde_json::to_vec(body)?;
        self.send(Method::PUT, path, Some(body_bytes)).await?;
        Ok(())
    }

    async fn get_raw(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.send(Method::GET, path, None).await
    }

    /// Issue one request over a brand-new connection and tear it down
    /// afterward. `Content-Length` reflects the serialized body exactly;
    /// `Connection: close` is set unconditionally so neither side attempts
    /// to keep the socket alive for a second request.
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>, ApiError> {
        // A fresh `Client` per request guarantees no connection pooling
        // survives across calls, on top of the explicit `Connection: close`.
        let client: Client<UnixConnector> = Client::unix();
        let uri = Uri::new(&self.socket_path, path);

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Accept", "application/json")
            .header("Connection", "close");

        let request = match body {
            Some(bytes) => {
                builder = builder
                    .header("Content-Type", "application/json")
                    .header("Content-Length", bytes.len());
                builder.body(Body::from(bytes))?
            }
            None => builder.body(Body::empty())?,
        };

        debug!(%method, path, "firecracker API request");

        let response = client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;
        let mut raw = Vec::new();
        std::io::Read::read_to_end(&mut body.reader(), &mut raw).ok();

        if status.is_success() {
            Ok(raw)
        } else {
            let message = extract_fault_message(&raw);
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Error responses carry `{"fault_message": "..."}`; fall back to the raw
/// body when that shape isn't present.
fn extract_fault_message(raw: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct FaultEnvelope {
        fault_message: String,
    }

    serde_json::from_slice::<FaultEnvelope>(raw)
        .map(|e| e.fault_message)
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).to_string())
}
