use serde::{Deserialize, Serialize};

use crate::models::requests::ServiceRequest;

// ── Client -> Server messages ──

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness check; answered with `pong`.
    Ping,
}

// ── Server -> Client messages ──

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full current result of the subscribed query.
    Snapshot { requests: Vec<ServiceRequest> },
    Pong,
    /// The subscription failed and the stream is closing.
    Error { message: String },
}
