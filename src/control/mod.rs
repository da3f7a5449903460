//! Control-plane client for running consensus-core processes.
//!
//! Two calls are needed: `status`, to read the public key a node reports,
//! and `dial_seeds`, to ask a node to connect to a list of peers. The HTTP
//! implementation speaks the node's URI-style JSON-RPC dialect.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::topology::PublicKey;

/// Default per-request timeout for control calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of a node's status used during provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    /// Validator public key reported by the node.
    pub pub_key: PublicKey,
}

/// Errors raised by control calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlError {
    /// Raised when the HTTP client cannot be constructed.
    #[error("failed to build control client: {0}")]
    Client(String),
    /// Raised when the request cannot be sent or the body cannot be read.
    #[error("control request to {endpoint} failed: {message}")]
    Request {
        /// Control endpoint (`host:port`).
        endpoint: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the node answers with a JSON-RPC error.
    #[error("node at {endpoint} returned an error: {message}")]
    Rpc {
        /// Control endpoint (`host:port`).
        endpoint: String,
        /// Error reported by the node.
        message: String,
    },
    /// Raised when a status response carries no public key.
    #[error("status from {endpoint} did not include a public key")]
    MissingPublicKey {
        /// Control endpoint (`host:port`).
        endpoint: String,
    },
}

/// Future returned by control calls.
pub type ControlFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ControlError>> + Send + 'a>>;

/// Client for the control endpoint of a running node.
pub trait ControlClient: Send + Sync {
    /// Queries the node status at `endpoint`.
    fn status<'a>(&'a self, endpoint: &'a str) -> ControlFuture<'a, NodeStatus>;

    /// Instructs the node at `endpoint` to dial `seeds`.
    fn dial_seeds<'a>(&'a self, endpoint: &'a str, seeds: &'a [String]) -> ControlFuture<'a, ()>;
}

/// [`ControlClient`] that talks HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpControlClient {
    client: reqwest::Client,
}

impl HttpControlClient {
    /// Builds a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Client`] when the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ControlError::Client(err.to_string()))?;
        Ok(Self { client })
    }

    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ControlError> {
        let url = format!("http://{endpoint}/{method}");
        let request_error = |err: reqwest::Error| ControlError::Request {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        };
        let body = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(request_error)?
            .json::<Value>()
            .await
            .map_err(request_error)?;
        rpc_result(endpoint, body)
    }
}

impl ControlClient for HttpControlClient {
    fn status<'a>(&'a self, endpoint: &'a str) -> ControlFuture<'a, NodeStatus> {
        Box::pin(async move {
            let result = self.call(endpoint, "status", &[]).await?;
            parse_status(endpoint, &result)
        })
    }

    fn dial_seeds<'a>(&'a self, endpoint: &'a str, seeds: &'a [String]) -> ControlFuture<'a, ()> {
        Box::pin(async move {
            let encoded = Value::from(seeds.to_vec()).to_string();
            self.call(endpoint, "dial_seeds", &[("seeds", encoded)])
                .await
                .map(|_| ())
        })
    }
}

/// Extracts the `result` member of a JSON-RPC envelope.
///
/// Older nodes wrap results as `[type_byte, payload]`; the payload is
/// unwrapped so callers always see the object.
fn rpc_result(endpoint: &str, body: Value) -> Result<Value, ControlError> {
    if let Some(message) = body.get("error").and_then(error_message) {
        return Err(ControlError::Rpc {
            endpoint: endpoint.to_owned(),
            message,
        });
    }
    let result = body.get("result").cloned().unwrap_or(Value::Null);
    match result {
        Value::Array(mut items) if items.len() == 2 && items.first().is_some_and(Value::is_u64) => {
            Ok(items.pop().unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_status(endpoint: &str, result: &Value) -> Result<NodeStatus, ControlError> {
    result
        .get("pub_key")
        .or_else(|| result.get("validator_info").and_then(|info| info.get("pub_key")))
        .filter(|key| !key.is_null())
        .map(|key| NodeStatus {
            pub_key: PublicKey::new(key.clone()),
        })
        .ok_or_else(|| ControlError::MissingPublicKey {
            endpoint: endpoint.to_owned(),
        })
}
