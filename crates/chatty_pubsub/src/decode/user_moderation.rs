#![forbid(unsafe_code)]

use anyhow::Context;
use serde::Deserialize;

use super::{AutomodStatus, EventPayload, topic_channel_id};
use crate::resolver::ChannelIdCache;

/// Automod verdict on one of the local user's own messages.
#[derive(Debug, Clone, PartialEq)]
pub struct UserModerationData {
	pub status: AutomodStatus,
	pub message_id: String,
	pub channel_id: String,
	pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Outer {
	#[serde(rename = "type")]
	kind: String,
	data: Data,
}

#[derive(Debug, Deserialize)]
struct Data {
	message_id: String,
	status: String,
}

pub(super) fn decode_user_moderation(
	topic: &str,
	message: &str,
	names: &ChannelIdCache,
) -> anyhow::Result<EventPayload> {
	let outer: Outer = serde_json::from_str(message).context("parse user moderation notification")?;
	if outer.kind != "automod_caught_message" {
		anyhow::bail!("unsupported user moderation type: {}", outer.kind);
	}
	let status = AutomodStatus::parse(&outer.data.status)
		.with_context(|| format!("unknown automod status: {}", outer.data.status))?;
	let channel_id = topic_channel_id(topic)?.to_string();
	let channel = names.name(&channel_id);

	Ok(EventPayload::UserModeration(UserModerationData {
		status,
		message_id: outer.data.message_id,
		channel_id,
		channel,
	}))
}
