//! The hyper/hyperlocal request plumbing: a UDS-bound `hyper::Client`, JSON
//! in, JSON or raw string out, non-2xx mapped to `HypervisorError::Api`.

use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector};
use log::{debug, error, trace};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

use super::HypervisorError;

/// Thin wrapper binding a `hyper::Client` to one UDS control socket. Kept
/// separate from `Client` in `mod.rs` so the injectable custom-transport
/// option can swap this out wholesale in tests without touching the
/// session/lifecycle code.
#[derive(Clone)]
pub struct Transport {
    socket_path: PathBuf,
    base_url: String,
    client: Client<UnixConnector>,
}

impl Transport {
    pub fn new(socket_path: PathBuf, base_url: String) -> Self {
        Self {
            socket_path,
            base_url,
            client: Client::unix(),
        }
    }

    fn uri(&self, path: &str) -> hyper::Uri {
        // The dialer always opens the UDS path regardless of URL authority;
        // `base_url` only affects what shows up in logs/traces, not where
        // the connection actually goes.
        let _ = &self.base_url;
        hyperlocal::Uri::new(&self.socket_path, path).into()
    }

    async fn send(&self, path: &str, method: Method, body: String) -> Result<String, HypervisorError> {
        let url = self.uri(path);
        debug!(target: "hypervisor::transport::send", "{method} {url}");
        trace!(target: "hypervisor::transport::send", "body: {body}");

        let request = Request::builder()
            .method(method)
            .uri(url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Body::from(body))
            .map_err(|e| HypervisorError::Io(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| HypervisorError::Io(e.to_string()))?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| HypervisorError::Io(e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        if !status.is_success() {
            error!(target: "hypervisor::transport::send", "{url} -> {status}: {text}");
            return Err(HypervisorError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    pub async fn put<T: Serialize>(&self, path: &str, body: &T) -> Result<(), HypervisorError> {
        let json = serde_json::to_string(body)?;
        self.send(path, Method::PUT, json).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HypervisorError> {
        let text = self.send(path, Method::GET, String::new()).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Raw `GET`, returning the parsed `serde_json::Value` rather than a
    /// typed struct — used when composing the snapshot config document,
    /// which re-serializes the hypervisor's own response bodies verbatim.
    pub async fn get_raw_json(&self, path: &str) -> Result<serde_json::Value, HypervisorError> {
        self.get(path).await
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
