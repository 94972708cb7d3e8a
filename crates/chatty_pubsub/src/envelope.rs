#![forbid(unsafe_code)]

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::decode::{MessageData, decode_data};
use crate::resolver::ChannelIdCache;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
	#[error("invalid envelope json: {0}")]
	InvalidJson(#[from] serde_json::Error),
	#[error("envelope has no type")]
	MissingType,
}

/// Frame type, as far as the shard cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
	Message,
	Response,
	Pong,
	Reconnect,
	Other,
}

/// Parsed incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	pub kind: String,
	pub nonce: Option<String>,
	pub data: Option<MessageData>,
	pub error: Option<String>,
}

impl Envelope {
	pub fn kind(&self) -> EnvelopeKind {
		match self.kind.as_str() {
			"MESSAGE" => EnvelopeKind::Message,
			"RESPONSE" => EnvelopeKind::Response,
			"PONG" => EnvelopeKind::Pong,
			"RECONNECT" => EnvelopeKind::Reconnect,
			_ => EnvelopeKind::Other,
		}
	}

	/// Non-empty `error` field.
	pub fn error(&self) -> Option<&str> {
		self.error.as_deref().filter(|e| !e.is_empty())
	}
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
	#[serde(rename = "type", default)]
	kind: Option<String>,
	#[serde(default)]
	nonce: Option<String>,
	#[serde(default)]
	data: Option<serde_json::Value>,
	#[serde(default)]
	error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessageData {
	topic: String,
	message: String,
}

/// Parse one incoming text frame and decode its payload, if any.
pub fn decode_envelope(raw: &str, names: &ChannelIdCache) -> Result<Envelope, EnvelopeError> {
	let env: RawEnvelope = serde_json::from_str(raw)?;
	let kind = env.kind.filter(|k| !k.is_empty()).ok_or(EnvelopeError::MissingType)?;

	// Only MESSAGE frames carry `{topic, message}`; anything else is ignored.
	let data = env
		.data
		.and_then(|v| serde_json::from_value::<RawMessageData>(v).ok())
		.map(|d| decode_data(&d.topic, &d.message, names));

	Ok(Envelope {
		kind,
		nonce: env.nonce,
		data,
		error: env.error,
	})
}

#[derive(Debug, Serialize)]
struct ListenRequest<'a> {
	#[serde(rename = "type")]
	kind: &'static str,
	nonce: &'a str,
	data: ListenData<'a>,
}

#[derive(Debug, Serialize)]
struct ListenData<'a> {
	topics: Vec<&'a str>,
	auth_token: &'a str,
}

fn encode_listen_request<'a>(
	kind: &'static str,
	topics: impl IntoIterator<Item = &'a str>,
	auth_token: &'a str,
) -> anyhow::Result<String> {
	let req = ListenRequest {
		kind,
		nonce: "",
		data: ListenData {
			topics: topics.into_iter().collect(),
			auth_token,
		},
	};
	serde_json::to_string(&req).with_context(|| format!("serialize {kind} request"))
}

/// `{"type":"LISTEN","nonce":"","data":{"topics":[..],"auth_token":".."}}`
pub fn encode_listen<'a>(topics: impl IntoIterator<Item = &'a str>, auth_token: &'a str) -> anyhow::Result<String> {
	encode_listen_request("LISTEN", topics, auth_token)
}

pub fn encode_unlisten<'a>(topics: impl IntoIterator<Item = &'a str>, auth_token: &'a str) -> anyhow::Result<String> {
	encode_listen_request("UNLISTEN", topics, auth_token)
}

pub fn encode_ping() -> String {
	r#"{"type":"PING"}"#.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn listen_wire_shape() {
		let text = encode_listen(["chat_moderator_actions.1.2"], "tok").unwrap();
		assert_eq!(
			text,
			r#"{"type":"LISTEN","nonce":"","data":{"topics":["chat_moderator_actions.1.2"],"auth_token":"tok"}}"#
		);

		let text = encode_unlisten(["a.1", "b.2"], "tok").unwrap();
		let v: serde_json::Value = serde_json::from_str(&text).unwrap();
		assert_eq!(v["type"], "UNLISTEN");
		assert_eq!(v["data"]["topics"], serde_json::json!(["a.1", "b.2"]));
		assert_eq!(encode_ping(), r#"{"type":"PING"}"#);
	}

	#[test]
	fn missing_type_is_an_error() {
		let names = ChannelIdCache::new();
		assert!(matches!(
			decode_envelope(r#"{"nonce":"x"}"#, &names),
			Err(EnvelopeError::MissingType)
		));
		assert!(matches!(
			decode_envelope("{not json", &names),
			Err(EnvelopeError::InvalidJson(_))
		));
	}

	#[test]
	fn response_error_passthrough() {
		let names = ChannelIdCache::new();
		let env = decode_envelope(r#"{"type":"RESPONSE","nonce":"n1","error":"ERR_BADAUTH"}"#, &names).unwrap();
		assert_eq!(env.kind(), EnvelopeKind::Response);
		assert_eq!(env.nonce.as_deref(), Some("n1"));
		assert_eq!(env.error(), Some("ERR_BADAUTH"));
		assert_eq!(env.data, None);

		let ok = decode_envelope(r#"{"type":"RESPONSE","nonce":"","error":""}"#, &names).unwrap();
		assert_eq!(ok.error(), None);
	}

	#[test]
	fn message_frame_is_decoded() {
		let names = ChannelIdCache::new();
		let raw = serde_json::json!({
			"type": "MESSAGE",
			"data": { "topic": "unknown-topic.1", "message": "{\"a\":1}" },
		})
		.to_string();
		let env = decode_envelope(&raw, &names).unwrap();
		assert_eq!(env.kind(), EnvelopeKind::Message);
		let data = env.data.unwrap();
		assert_eq!(data.topic, "unknown-topic.1");
		assert_eq!(data.message, "{\"a\":1}");
		assert!(data.is_generic());
	}
}
