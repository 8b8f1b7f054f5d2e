//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the websocket transport and text packets are handled; binary
//! attachments are rejected as unsupported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("empty packet")]
	Empty,

	#[error("unknown packet type {0:?}")]
	UnknownType(char),

	#[error("malformed packet: {0}")]
	Malformed(String),

	#[error("unsupported packet: {0}")]
	Unsupported(&'static str),
}

impl From<serde_json::Error> for ProtocolError {
	fn from(err: serde_json::Error) -> Self {
		Self::Malformed(err.to_string())
	}
}

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
	pub sid: String,
	#[serde(default)]
	pub upgrades: Vec<String>,
	pub ping_interval: u64,
	pub ping_timeout: u64,
	#[serde(default)]
	pub max_payload: u64,
}

impl OpenInfo {
	/// Longest silence tolerated before the server is considered gone.
	pub fn heartbeat_window(&self) -> Duration {
		Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
	Open(OpenInfo),
	Close,
	Ping(String),
	Pong(String),
	Message(String),
	Upgrade,
	Noop,
}

impl EnginePacket {
	pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
		let mut chars = frame.chars();
		let kind = chars.next().ok_or(ProtocolError::Empty)?;
		let body = chars.as_str();

		Ok(match kind {
			'0' => Self::Open(serde_json::from_str(body)?),
			'1' => Self::Close,
			'2' => Self::Ping(body.to_string()),
			'3' => Self::Pong(body.to_string()),
			'4' => Self::Message(body.to_string()),
			'5' => Self::Upgrade,
			'6' => Self::Noop,
			other => return Err(ProtocolError::UnknownType(other)),
		})
	}

	pub fn encode(&self) -> String {
		match self {
			Self::Open(info) => format!("0{}", serde_json::to_string(info).unwrap_or_default()),
			Self::Close => "1".to_string(),
			Self::Ping(body) => format!("2{body}"),
			Self::Pong(body) => format!("3{body}"),
			Self::Message(body) => format!("4{body}"),
			Self::Upgrade => "5".to_string(),
			Self::Noop => "6".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
	Connect { nsp: String, data: Option<Value> },
	Disconnect { nsp: String },
	Event { nsp: String, id: Option<u64>, name: String, args: Vec<Value> },
	Ack { nsp: String, id: u64, args: Vec<Value> },
	ConnectError { nsp: String, data: Value },
}

impl SocketPacket {
	pub fn nsp(&self) -> &str {
		match self {
			Self::Connect { nsp, .. } | Self::Disconnect { nsp } | Self::Event { nsp, .. } | Self::Ack { nsp, .. } | Self::ConnectError { nsp, .. } => nsp,
		}
	}

	pub fn decode(body: &str) -> Result<Self, ProtocolError> {
		let mut chars = body.chars();
		let kind = chars.next().ok_or(ProtocolError::Empty)?;
		let mut rest = chars.as_str();

		if matches!(kind, '5' | '6') {
			return Err(ProtocolError::Unsupported("binary attachments"));
		}

		let nsp = if rest.starts_with('/') {
			let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
			rest = tail;
			nsp.to_string()
		} else {
			DEFAULT_NAMESPACE.to_string()
		};

		let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
		let id = if digits > 0 {
			Some(rest[..digits].parse::<u64>().map_err(|e| ProtocolError::Malformed(e.to_string()))?)
		} else {
			None
		};
		rest = &rest[digits..];

		let data: Option<Value> = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };

		match kind {
			'0' => Ok(Self::Connect { nsp, data }),
			'1' => Ok(Self::Disconnect { nsp }),
			'2' => {
				let mut args = match data {
					Some(Value::Array(items)) => items,
					_ => return Err(ProtocolError::Malformed("event payload must be a json array".into())),
				};
				if args.is_empty() {
					return Err(ProtocolError::Malformed("event without a name".into()));
				}
				let name = match args.remove(0) {
					Value::String(name) => name,
					other => return Err(ProtocolError::Malformed(format!("event name must be a string, got {other}"))),
				};
				Ok(Self::Event { nsp, id, name, args })
			}
			'3' => {
				let id = id.ok_or_else(|| ProtocolError::Malformed("ack without id".into()))?;
				let args = match data {
					Some(Value::Array(items)) => items,
					None => Vec::new(),
					Some(_) => return Err(ProtocolError::Malformed("ack payload must be a json array".into())),
				};
				Ok(Self::Ack { nsp, id, args })
			}
			'4' => Ok(Self::ConnectError {
				nsp,
				data: data.unwrap_or(Value::Null),
			}),
			other => Err(ProtocolError::UnknownType(other)),
		}
	}

	pub fn encode(&self) -> String {
		let (kind, nsp, id, data) = match self {
			Self::Connect { nsp, data } => ('0', nsp, None, data.clone()),
			Self::Disconnect { nsp } => ('1', nsp, None, None),
			Self::Event { nsp, id, name, args } => {
				let mut items = Vec::with_capacity(args.len() + 1);
				items.push(Value::String(name.clone()));
				items.extend(args.iter().cloned());
				('2', nsp, *id, Some(Value::Array(items)))
			}
			Self::Ack { nsp, id, args } => ('3', nsp, Some(*id), Some(Value::Array(args.clone()))),
			Self::ConnectError { nsp, data } => ('4', nsp, None, Some(data.clone())),
		};

		let mut out = String::new();
		out.push(kind);
		if nsp != DEFAULT_NAMESPACE {
			out.push_str(nsp);
			out.push(',');
		}
		if let Some(id) = id {
			out.push_str(&id.to_string());
		}
		if let Some(data) = data {
			out.push_str(&data.to_string());
		}
		out
	}

	/// Wrap into the Engine.IO message frame that carries it.
	pub fn into_frame(self) -> String {
		EnginePacket::Message(self.encode()).encode()
	}

	/// Human-readable reason from a `CONNECT_ERROR` payload.
	pub fn error_message(data: &Value) -> String {
		match data {
			Value::String(message) => message.clone(),
			Value::Object(map) => map.get("message").and_then(Value::as_str).map_or_else(|| data.to_string(), str::to_string),
			Value::Null => "connection rejected".to_string(),
			other => other.to_string(),
		}
	}
}

/// Collapse event arguments into the single value handed to subscribers.
pub fn collapse_args(mut args: Vec<Value>) -> Value {
	match args.len() {
		0 => Value::Null,
		1 => args.remove(0),
		_ => Value::Array(args),
	}
}
