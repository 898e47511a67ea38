//! Wire frames of the realtime protocol.
//!
//! A text frame is either a bare decimal count announcing that many string
//! fragments, or a JSON object `{t: "c"|"d", d: {...}}`. Every frame is
//! decoded into [`Inbound`]; anything else is rejected with a protocol error.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use spacebook_shared::{Result, SpacebookError};

/// Action tag marking a push notification.
const PUSH_ACTION: &str = "m";

/// Status of a successful response.
pub const STATUS_OK: &str = "ok";

/// Data envelope carried by a `"d"` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Request id, present only on a numbered response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u64>,
    /// Action tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Body>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    /// Path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The next `n` frames are fragments of one message.
    SegmentCount(usize),
    /// Connection established.
    Connected,
    /// Numbered response to one of our requests.
    Response { id: u64, envelope: Envelope },
    /// Unsolicited change notification.
    Push(PushNotification),
    /// Body of a response whose numbered ok-frame follows.
    BigPayload(Envelope),
}

/// Push notification: a path and the data now stored there.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub path: String,
    pub data: Value,
}

impl PushNotification {
    /// Whether this push concerns `logical_path`. Paths on the wire carry no
    /// leading slash.
    pub fn concerns(&self, logical_path: &str) -> bool {
        self.path.trim_start_matches('/') == logical_path.trim_start_matches('/')
    }
}

/// A completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub action: Option<String>,
    pub status: String,
    pub path: Option<String>,
    pub data: Value,
}

impl Response {
    /// Build the response for an ok-frame, merging a cached big payload:
    /// action and body come from the cache, the status stays live.
    pub(crate) fn assemble(id: u64, live: Envelope, cached: Option<Envelope>) -> Self {
        let status = live
            .b
            .as_ref()
            .and_then(|b| b.s.clone())
            .unwrap_or_default();
        let (action, body) = match cached {
            Some(big) => (big.a, big.b.unwrap_or_default()),
            None => (live.a, live.b.unwrap_or_default()),
        };
        Self {
            id,
            action,
            status,
            path: body.p,
            data: body.d.unwrap_or(Value::Null),
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    t: String,
    #[serde(default)]
    d: Option<Value>,
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<Inbound> {
    let trimmed = text.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let count = trimmed
            .parse()
            .map_err(|e| SpacebookError::protocol(format!("bad segment count {trimmed:?}: {e}")))?;
        return Ok(Inbound::SegmentCount(count));
    }

    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| SpacebookError::protocol(format!("undecodable frame: {e}")))?;

    match raw.t.as_str() {
        "c" => Ok(Inbound::Connected),
        "d" => {
            let envelope: Envelope = match raw.d {
                Some(d) => serde_json::from_value(d)
                    .map_err(|e| SpacebookError::protocol(format!("bad data envelope: {e}")))?,
                None => return Err(SpacebookError::protocol("data frame without envelope")),
            };
            Ok(classify(envelope))
        }
        other => Err(SpacebookError::protocol(format!("unknown frame type {other:?}"))),
    }
}

/// Decode a reassembled segmented message. Its envelope is always a big
/// payload, whatever its action tag.
pub fn decode_segmented(text: &str) -> Result<Envelope> {
    let raw: RawFrame = serde_json::from_str(text)
        .map_err(|e| SpacebookError::protocol(format!("undecodable segmented message: {e}")))?;
    match (raw.t.as_str(), raw.d) {
        ("d", Some(d)) => serde_json::from_value(d)
            .map_err(|e| SpacebookError::protocol(format!("bad data envelope: {e}"))),
        (other, _) => Err(SpacebookError::protocol(format!(
            "segmented message of type {other:?} carries no envelope"
        ))),
    }
}

fn classify(envelope: Envelope) -> Inbound {
    if let Some(id) = envelope.r {
        return Inbound::Response { id, envelope };
    }
    if envelope.a.as_deref() == Some(PUSH_ACTION) {
        let body = envelope.b.unwrap_or_default();
        return Inbound::Push(PushNotification {
            path: body.p.unwrap_or_default(),
            data: body.d.unwrap_or(Value::Null),
        });
    }
    Inbound::BigPayload(envelope)
}

/// Serialize a request as `{t: "d", d: payload + {r: id}}`.
pub fn encode_request(id: u64, payload: &Value) -> Result<String> {
    let Value::Object(fields) = payload else {
        return Err(SpacebookError::protocol("request payload must be a JSON object"));
    };
    let mut fields = fields.clone();
    fields.insert("r".into(), Value::from(id));
    Ok(json!({ "t": "d", "d": fields }).to_string())
}

/// Query payload for a logical path.
pub fn query(path: &str) -> Value {
    json!({ "a": "q", "b": { "p": path, "h": "" } })
}
