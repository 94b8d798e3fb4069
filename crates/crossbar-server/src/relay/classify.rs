//! Routing decision for every inbound frame and worker datagram.
//!
//! Client frames are either relayed untouched to the opposite group or, when
//! they are a JSON object whose `type` equals the bridge marker, handed to
//! the worker and never relayed. Worker datagrams must be JSON; they are
//! re-broadcast verbatim.

use std::str::Utf8Error;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::websocket::connection::Frame;

/// Marker used by the deployed clients.
pub const DEFAULT_REQUEST_MARKER: &str = "POST";

/// Where a frame goes next.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayMessage {
    /// Relay to the opposite group unchanged.
    Plain(Frame),
    /// Send to the worker; do not relay.
    BridgeRequest(BridgePayload),
    /// Worker output; broadcast to both groups.
    BridgeResponse(BridgeResponse),
}

/// The worker-bound part of a bridge request.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgePayload {
    /// The `type` discriminator that matched.
    pub kind: String,
    /// The nested `data` value, `None` when absent or empty.
    pub data: Option<Value>,
}

/// A worker datagram that decoded as JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeResponse {
    body: String,
    value: Value,
}

impl BridgeResponse {
    /// The datagram text exactly as received.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The decoded JSON.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Text frame carrying the original datagram text.
    pub fn into_frame(self) -> Frame {
        Frame::text(self.body)
    }
}

/// A worker datagram that could not be used.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not UTF-8.
    #[error("datagram is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),
    /// Not JSON.
    #[error("datagram is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classifies frames against a configured bridge marker.
#[derive(Clone, Debug)]
pub struct MessageClassifier {
    marker: String,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_MARKER)
    }
}

impl MessageClassifier {
    /// Classifier matching `{"type": marker, ...}`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The configured marker.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Classify a frame received from a client.
    ///
    /// Never fails: anything that is not a marked JSON object is `Plain`.
    pub fn classify(&self, frame: Frame) -> RelayMessage {
        let Frame::Text(text) = &frame else {
            return RelayMessage::Plain(frame);
        };
        // Only objects can carry the marker; skip the parse for everything else.
        if !text.as_str().trim_start().starts_with('{') {
            return RelayMessage::Plain(frame);
        }
        match serde_json::from_str::<Value>(text.as_str()) {
            Ok(Value::Object(map)) if self.is_marked(&map) => {
                RelayMessage::BridgeRequest(self.extract(map))
            }
            _ => RelayMessage::Plain(frame),
        }
    }

    /// Validate a datagram received from the worker.
    pub fn classify_datagram(&self, datagram: &[u8]) -> Result<RelayMessage, DecodeError> {
        let body = std::str::from_utf8(datagram)?;
        let value = serde_json::from_str(body)?;
        Ok(RelayMessage::BridgeResponse(BridgeResponse {
            body: body.to_owned(),
            value,
        }))
    }

    fn is_marked(&self, map: &Map<String, Value>) -> bool {
        map.get("type").and_then(Value::as_str) == Some(self.marker.as_str())
    }

    fn extract(&self, mut map: Map<String, Value>) -> BridgePayload {
        BridgePayload {
            kind: self.marker.clone(),
            data: map.remove("data").filter(is_present),
        }
    }
}

/// Empty values (`null`, `false`, `0`, `""`, `[]`, `{}`) count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
