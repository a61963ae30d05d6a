//! Socket.IO v4 / Engine.IO v4 text packet codec.
//!
//! Only the WebSocket transport and the default namespace are supported, so
//! every frame is a single text message:
//!
//! | frame | meaning |
//! |---|---|
//! | `0{...}` | engine open (handshake) |
//! | `1` | engine close |
//! | `2` / `3` | ping / pong |
//! | `6` | noop |
//! | `40` | namespace connect (`40{"sid":..}` from the server) |
//! | `41` | namespace disconnect |
//! | `42[id]["event",data]` | event, optionally requesting an ack |
//! | `43id[data..]` | ack |
//! | `44{...}` | namespace connect error |

use serde::Deserialize;
use serde_json::Value;

use crate::error::ChannelError;

/// Engine.IO handshake payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenPayload),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack_id: Option<u64>,
        name: String,
        payload: Value,
    },
    Ack {
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: &str, payload: Value, ack_id: Option<u64>) -> Self {
        Packet::Event {
            ack_id,
            name: name.to_string(),
            payload,
        }
    }

    /// Encode into a text frame.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(payload) => format!(
                "0{{\"sid\":{},\"pingInterval\":{},\"pingTimeout\":{}}}",
                Value::String(payload.sid.clone()),
                payload.ping_interval,
                payload.ping_timeout
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(data)) => format!("40{}", data),
            Packet::Disconnect => "41".to_string(),
            Packet::Event {
                ack_id,
                name,
                payload,
            } => {
                let body = Value::Array(vec![Value::String(name.clone()), payload.clone()]);
                match ack_id {
                    Some(id) => format!("42{}{}", id, body),
                    None => format!("42{}", body),
                }
            }
            Packet::Ack { ack_id, args } => {
                format!("43{}{}", ack_id, Value::Array(args.clone()))
            }
            Packet::ConnectError(data) => format!("44{}", data),
        }
    }

    /// Decode a text frame.
    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        let mut chars = frame.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty frame".to_string()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| ChannelError::Protocol(format!("invalid open payload: {}", e))),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => decode_socket_packet(rest),
            other => Err(ChannelError::Protocol(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }
}

fn decode_socket_packet(frame: &str) -> Result<Packet, ChannelError> {
    let mut chars = frame.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| ChannelError::Protocol("missing socket packet type".to_string()))?;
    let rest = chars.as_str();

    if rest.starts_with('/') {
        return Err(ChannelError::Protocol(format!(
            "unsupported namespace in '{}'",
            frame
        )));
    }

    match socket_type {
        '0' => {
            if rest.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                parse_json(rest).map(|data| Packet::Connect(Some(data)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let (ack_id, body) = split_ack_id(rest)?;
            let mut items = match parse_json(body)? {
                Value::Array(items) => items.into_iter(),
                other => {
                    return Err(ChannelError::Protocol(format!(
                        "event body is not an array: {}",
                        other
                    )));
                }
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(ChannelError::Protocol("event without name".to_string())),
            };
            let payload = items.next().unwrap_or(Value::Null);
            Ok(Packet::Event {
                ack_id,
                name,
                payload,
            })
        }
        '3' => {
            let (ack_id, body) = split_ack_id(rest)?;
            let ack_id =
                ack_id.ok_or_else(|| ChannelError::Protocol("ack without id".to_string()))?;
            match parse_json(body)? {
                Value::Array(args) => Ok(Packet::Ack { ack_id, args }),
                other => Err(ChannelError::Protocol(format!(
                    "ack body is not an array: {}",
                    other
                ))),
            }
        }
        '4' => parse_json(rest).map(Packet::ConnectError),
        other => Err(ChannelError::Protocol(format!(
            "unknown socket packet type '{}'",
            other
        ))),
    }
}

/// Split the optional numeric ack id from the JSON body.
fn split_ack_id(frame: &str) -> Result<(Option<u64>, &str), ChannelError> {
    let digits = frame.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Ok((None, frame));
    }
    let (id, body) = frame.split_at(digits);
    let id = id
        .parse()
        .map_err(|e| ChannelError::Protocol(format!("invalid ack id '{}': {}", id, e)))?;
    Ok((Some(id), body))
}

fn parse_json(text: &str) -> Result<Value, ChannelError> {
    serde_json::from_str(text).map_err(|e| ChannelError::Protocol(format!("invalid json: {}", e)))
}
