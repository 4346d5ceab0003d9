//! Feed frame decoder
//!
//! A frame is a JSON array of alternating action codes and payloads:
//! `[action, payload, action, payload, ...]`. Payloads are positional
//! arrays; trailing fields added by newer feed versions are ignored and
//! missing optional fields decode as `None`.
//!
//! Each pair decodes on its own. A malformed payload fails only its entry;
//! the rest of the frame is still delivered in order.

use super::types::{Action, AddedNode, BlockDetails, FeedMessage, NodeDetails, NodeStats};
use crate::store::Location;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    UnexpectedShape(String),
    Payload { action: Action, reason: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "Invalid JSON frame: {}", e),
            DecodeError::UnexpectedShape(msg) => write!(f, "Unexpected frame shape: {}", msg),
            DecodeError::Payload { action, reason } => {
                write!(f, "Malformed {:?} payload: {}", action, reason)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Outcome of decoding one `[action, payload]` pair
pub type DecodedMessage = Result<FeedMessage, DecodeError>;

/// Decode one frame into its messages, in frame order
///
/// Fails as a whole only when the frame is not a flat JSON array of pairs.
pub fn decode_frame(frame: &str) -> Result<Vec<DecodedMessage>, DecodeError> {
    let items: Vec<Value> = serde_json::from_str(frame)?;

    if items.len() % 2 != 0 {
        return Err(DecodeError::UnexpectedShape(format!(
            "odd number of elements ({})",
            items.len()
        )));
    }

    let mut messages = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(action), Some(payload)) = (iter.next(), iter.next()) {
        let decoded = match action.as_u64() {
            Some(code) => decode_message(code, payload),
            None => Err(DecodeError::UnexpectedShape(format!(
                "action code is not an integer: {}",
                action
            ))),
        };
        messages.push(decoded);
    }

    Ok(messages)
}

fn decode_message(code: u64, payload: Value) -> Result<FeedMessage, DecodeError> {
    let Some(action) = Action::from_code(code) else {
        return Ok(FeedMessage::Unknown(code));
    };

    let message = match action {
        Action::FeedVersion => FeedMessage::FeedVersion(payload),
        Action::AddedNode => FeedMessage::AddedNode(Box::new(decode_added_node(&payload)?)),
        Action::RemovedNode => FeedMessage::RemovedNode(scalar(action, payload)?),
        Action::StaleNode => FeedMessage::StaleNode(scalar(action, payload)?),
        Action::LocatedNode => {
            let items = positional(action, &payload)?;
            FeedMessage::LocatedNode {
                feed_id: field(action, items, 0, "id")?,
                location: Location {
                    lat: field(action, items, 1, "lat")?,
                    lng: field(action, items, 2, "lng")?,
                    city: field(action, items, 3, "city")?,
                },
            }
        }
        Action::ImportedBlock => {
            let items = positional(action, &payload)?;
            FeedMessage::ImportedBlock {
                feed_id: field(action, items, 0, "id")?,
                block: block_details(action, items.get(1))?,
            }
        }
        Action::NodeStats => {
            let items = positional(action, &payload)?;
            FeedMessage::NodeStats {
                feed_id: field(action, items, 0, "id")?,
                stats: node_stats(action, items.get(1))?,
            }
        }
        Action::SubscribedTo => FeedMessage::SubscribedTo(label(payload)),
        Action::Pong => FeedMessage::Pong(label(payload)),
        other => FeedMessage::Ignored(other),
    };

    Ok(message)
}

fn decode_added_node(payload: &Value) -> Result<AddedNode, DecodeError> {
    let action = Action::AddedNode;
    let items = positional(action, payload)?;

    let details = positional(action, items.get(1).unwrap_or(&Value::Null))?;

    Ok(AddedNode {
        feed_id: field(action, items, 0, "id")?,
        details: NodeDetails {
            name: field(action, details, 0, "name")?,
            implementation: field(action, details, 1, "implementation")?,
            version: field(action, details, 2, "version")?,
            address: field(action, details, 3, "address")?,
            network_id: field(action, details, 4, "network id")?,
        },
        stats: node_stats(action, items.get(2))?,
        // 3 and 4 are IO and hardware series, not tracked
        block: block_details(action, items.get(5))?,
        // `[lat, lng, city]` or null
        location: field::<Option<Location>>(action, items, 6, "location")?,
        startup_time: items.get(7).and_then(epoch_millis),
    })
}

fn node_stats(action: Action, value: Option<&Value>) -> Result<NodeStats, DecodeError> {
    let items = positional(action, value.unwrap_or(&Value::Null))?;
    Ok(NodeStats {
        peer_count: field(action, items, 0, "peer count")?,
        transactions_in_queue: field(action, items, 1, "transactions in queue")?,
    })
}

fn block_details(action: Action, value: Option<&Value>) -> Result<BlockDetails, DecodeError> {
    let items = positional(action, value.unwrap_or(&Value::Null))?;
    Ok(BlockDetails {
        block_number: field(action, items, 0, "block number")?,
        block_hash: field(action, items, 1, "block hash")?,
        block_time_ms: field(action, items, 2, "block time")?,
        block_timestamp: field(action, items, 3, "block timestamp")?,
        propagation_time_ms: field(action, items, 4, "propagation time")?,
    })
}

fn positional<'a>(action: Action, value: &'a Value) -> Result<&'a [Value], DecodeError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| DecodeError::Payload {
            action,
            reason: format!("expected an array, got {}", value),
        })
}

/// Deserialize element `idx`; a missing element reads as `null`
fn field<T: DeserializeOwned>(
    action: Action,
    items: &[Value],
    idx: usize,
    name: &str,
) -> Result<T, DecodeError> {
    let value = items.get(idx).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| DecodeError::Payload {
        action,
        reason: format!("{} (index {}): {}", name, idx, e),
    })
}

fn scalar<T: DeserializeOwned>(action: Action, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::Payload {
        action,
        reason: e.to_string(),
    })
}

fn label(payload: Value) -> String {
    match payload {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Startup time arrives as a number or a numeric string
fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
