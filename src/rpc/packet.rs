//! Packet model - the wire unit of the correlation protocol.
//!
//! A packet is a structured message shaped `{id, kind, ...}` where `kind`
//! is one of `request`, `response` or `error`. The `id` is the caller's
//! opaque correlation token: locally generated calls use integer ids, but
//! inbound ids are kept verbatim and echoed back untouched, whatever their
//! shape.
//!
//! Messages that do not carry an `id` are not protocol messages at all and
//! are passed through to the environment's other traffic; messages with an
//! `id` but an unknown `kind` are answered with an `error` packet.

use serde_json::{json, Value};

/// One correlation-protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// A call: invoke `function` with `args` on the peer.
    Request {
        /// Correlation token, echoed in the eventual response.
        id: Value,
        /// Name of the registered function to invoke.
        function: String,
        /// Structured call payload.
        args: Value,
        /// Absolute deadline in epoch milliseconds, if the caller set one.
        expiry: Option<u64>,
    },
    /// Successful settlement of the call with the matching `id`.
    Response { id: Value, value: Value },
    /// Failed settlement; `reason` is a string or structured cause.
    Error { id: Value, reason: Value },
}

/// Classification of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed protocol packet.
    Packet(Packet),
    /// Carries an `id` but is not a routable packet; answered with an
    /// `error` packet echoing the id.
    Invalid { id: Value },
    /// No correlation id: not protocol traffic, passed through untouched.
    Passthrough(Value),
}

impl Packet {
    /// The packet's correlation id.
    pub fn id(&self) -> &Value {
        match self {
            Packet::Request { id, .. } | Packet::Response { id, .. } | Packet::Error { id, .. } => {
                id
            }
        }
    }

    /// Encode into the wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Packet::Request {
                id,
                function,
                args,
                expiry,
            } => {
                let mut message = json!({
                    "id": id,
                    "kind": "request",
                    "functionName": function,
                    "args": args,
                });
                if let (Some(exp), Some(obj)) = (expiry, message.as_object_mut()) {
                    obj.insert("expiry".into(), json!(exp));
                }
                message
            }
            Packet::Response { id, value } => json!({
                "id": id,
                "kind": "response",
                "value": value,
            }),
            Packet::Error { id, reason } => json!({
                "id": id,
                "kind": "error",
                "reason": reason,
            }),
        }
    }

    /// Classify one inbound message.
    pub fn classify(message: Value) -> Inbound {
        let obj = match message.as_object() {
            Some(o) => o,
            None => return Inbound::Passthrough(message),
        };
        let id = match obj.get("id") {
            None | Some(Value::Null) => return Inbound::Passthrough(message),
            Some(id) => id.clone(),
        };
        match obj.get("kind").and_then(Value::as_str) {
            Some("request") => {
                let function = match obj.get("functionName").and_then(Value::as_str) {
                    Some(name) => name.to_string(),
                    None => return Inbound::Invalid { id },
                };
                Inbound::Packet(Packet::Request {
                    id,
                    function,
                    args: obj.get("args").cloned().unwrap_or(Value::Null),
                    expiry: obj.get("expiry").and_then(Value::as_u64),
                })
            }
            Some("response") => Inbound::Packet(Packet::Response {
                id,
                value: obj.get("value").cloned().unwrap_or(Value::Null),
            }),
            Some("error") => Inbound::Packet(Packet::Error {
                id,
                reason: obj.get("reason").cloned().unwrap_or(Value::Null),
            }),
            _ => Inbound::Invalid { id },
        }
    }
}

/// Human-readable form of an error packet's reason.
pub fn reason_text(reason: &Value) -> String {
    match reason {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
