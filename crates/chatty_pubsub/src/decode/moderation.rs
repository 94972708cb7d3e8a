#![forbid(unsafe_code)]

use std::time::SystemTime;

use anyhow::Context;
use serde::Deserialize;

use super::{AutomodStatus, EventPayload, parse_timestamp, topic_channel_id};
use crate::resolver::ChannelIdCache;

/// What kind of moderator-log entry this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModActionKind {
	/// Plain chat moderation (`/ban`, `/timeout`, `/delete`, ...).
	Moderation,
	ModeratorAdded,
	ModeratorRemoved,
	VipAdded,
	VipRemoved,
	/// Blocked/permitted term list changed.
	ChannelTerms,
	UnbanRequestApproved,
	UnbanRequestDenied,
	/// Message held by automod.
	AutomodCaught,
}

impl ModActionKind {
	fn from_action_name(action: &str) -> Self {
		match action {
			"mod" => Self::ModeratorAdded,
			"unmod" => Self::ModeratorRemoved,
			"vip" => Self::VipAdded,
			"unvip" => Self::VipRemoved,
			_ => Self::Moderation,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomodInfo {
	pub category: String,
	pub level: u32,
	pub status: AutomodStatus,
	pub message_id: String,
	pub text: String,
	pub sender_id: String,
	pub sender_login: String,
	pub reason_code: Option<String>,
}

/// Entry from `chat_moderator_actions.*` or `automod-queue.*`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratorActionData {
	pub kind: ModActionKind,
	/// Action name as the service sends it (`ban`, `unmod`, `add_blocked_term`, ...).
	pub moderation_action: String,
	pub args: Vec<String>,
	pub created_by: String,
	pub created_by_id: String,
	pub target_id: Option<String>,
	pub target_login: Option<String>,
	pub msg_id: Option<String>,
	pub created_at: Option<SystemTime>,
	/// Channel id taken from the topic.
	pub channel_id: String,
	/// Channel login, when the id is in the cache.
	pub channel: Option<String>,
	pub from_automod: bool,
	pub automod: Option<AutomodInfo>,
}

impl ModeratorActionData {
	/// True when `user_id` lost moderator status through this action.
	pub fn is_unmod_of(&self, user_id: &str) -> bool {
		self.kind == ModActionKind::ModeratorRemoved && self.target_id.as_deref() == Some(user_id)
	}
}

#[derive(Debug, Deserialize)]
struct Outer {
	#[serde(rename = "type")]
	kind: String,
	data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ModerationActionBody {
	moderation_action: String,
	#[serde(default)]
	args: Option<Vec<String>>,
	#[serde(default)]
	created_by: Option<String>,
	#[serde(default, alias = "created_by_id")]
	created_by_user_id: Option<String>,
	#[serde(default)]
	created_at: Option<String>,
	#[serde(default)]
	msg_id: Option<String>,
	#[serde(default)]
	target_user_id: Option<String>,
	#[serde(default)]
	target_user_login: Option<String>,
	#[serde(default)]
	from_automod: bool,
}

#[derive(Debug, Deserialize)]
struct RoleChangeBody {
	#[serde(default)]
	moderation_action: Option<String>,
	target_user_id: String,
	target_user_login: String,
	#[serde(default)]
	created_by: Option<String>,
	#[serde(default)]
	created_by_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelTermsBody {
	#[serde(rename = "type")]
	action: String,
	#[serde(default)]
	id: Option<String>,
	text: String,
	#[serde(default)]
	requester_id: Option<String>,
	#[serde(default)]
	requester_login: Option<String>,
	#[serde(default)]
	updated_at: Option<String>,
	#[serde(default)]
	from_automod: bool,
}

#[derive(Debug, Deserialize)]
struct UnbanRequestBody {
	#[serde(default)]
	moderation_action: Option<String>,
	#[serde(default)]
	created_by_id: Option<String>,
	#[serde(default)]
	created_by_login: Option<String>,
	#[serde(default)]
	moderator_message: Option<String>,
	target_user_id: String,
	target_user_login: String,
}

pub(super) fn decode_moderator_action(
	topic: &str,
	message: &str,
	names: &ChannelIdCache,
) -> anyhow::Result<EventPayload> {
	let outer: Outer = serde_json::from_str(message).context("parse moderator action envelope")?;
	let channel_id = topic_channel_id(topic)?.to_string();
	let channel = names.name(&channel_id);

	let data = match outer.kind.as_str() {
		"moderation_action" => {
			let b: ModerationActionBody =
				serde_json::from_value(outer.data).context("parse moderation_action body")?;
			ModeratorActionData {
				kind: ModActionKind::from_action_name(&b.moderation_action),
				moderation_action: b.moderation_action,
				args: b.args.unwrap_or_default(),
				created_by: b.created_by.unwrap_or_default(),
				created_by_id: b.created_by_user_id.unwrap_or_default(),
				target_id: b.target_user_id.filter(|s| !s.is_empty()),
				target_login: b.target_user_login.filter(|s| !s.is_empty()),
				msg_id: b.msg_id.filter(|s| !s.is_empty()),
				created_at: parse_timestamp(b.created_at.as_deref()),
				channel_id,
				channel,
				from_automod: b.from_automod,
				automod: None,
			}
		}
		"moderator_added" | "moderator_removed" | "vip_added" => {
			let b: RoleChangeBody = serde_json::from_value(outer.data)
				.with_context(|| format!("parse {} body", outer.kind))?;
			let (kind, default_action) = match outer.kind.as_str() {
				"moderator_added" => (ModActionKind::ModeratorAdded, "mod"),
				"moderator_removed" => (ModActionKind::ModeratorRemoved, "unmod"),
				_ => (ModActionKind::VipAdded, "vip"),
			};
			ModeratorActionData {
				kind,
				moderation_action: b.moderation_action.unwrap_or_else(|| default_action.to_string()),
				args: vec![b.target_user_login.clone()],
				created_by: b.created_by.unwrap_or_default(),
				created_by_id: b.created_by_user_id.unwrap_or_default(),
				target_id: Some(b.target_user_id),
				target_login: Some(b.target_user_login),
				msg_id: None,
				created_at: None,
				channel_id,
				channel,
				from_automod: false,
				automod: None,
			}
		}
		"channel_terms_action" => {
			let b: ChannelTermsBody =
				serde_json::from_value(outer.data).context("parse channel_terms_action body")?;
			let mut args = vec![b.text];
			args.extend(b.id);
			ModeratorActionData {
				kind: ModActionKind::ChannelTerms,
				moderation_action: b.action,
				args,
				created_by: b.requester_login.unwrap_or_default(),
				created_by_id: b.requester_id.unwrap_or_default(),
				target_id: None,
				target_login: None,
				msg_id: None,
				created_at: parse_timestamp(b.updated_at.as_deref()),
				channel_id,
				channel,
				from_automod: b.from_automod,
				automod: None,
			}
		}
		"approve_unban_request" | "deny_unban_request" => {
			let b: UnbanRequestBody = serde_json::from_value(outer.data)
				.with_context(|| format!("parse {} body", outer.kind))?;
			let kind = if outer.kind == "approve_unban_request" {
				ModActionKind::UnbanRequestApproved
			} else {
				ModActionKind::UnbanRequestDenied
			};
			let mut args = vec![b.target_user_login.clone()];
			args.extend(b.moderator_message.filter(|s| !s.is_empty()));
			ModeratorActionData {
				kind,
				moderation_action: b
					.moderation_action
					.map(|a| a.to_ascii_lowercase())
					.unwrap_or_else(|| outer.kind.clone()),
				args,
				created_by: b.created_by_login.unwrap_or_default(),
				created_by_id: b.created_by_id.unwrap_or_default(),
				target_id: Some(b.target_user_id),
				target_login: Some(b.target_user_login),
				msg_id: None,
				created_at: None,
				channel_id,
				channel,
				from_automod: false,
				automod: None,
			}
		}
		other => anyhow::bail!("unsupported moderator action type: {other}"),
	};

	Ok(EventPayload::ModeratorAction(data))
}

#[derive(Debug, Deserialize)]
struct AutomodQueueBody {
	#[serde(default)]
	content_classification: Option<ContentClassification>,
	message: AutomodMessage,
	#[serde(default)]
	reason_code: Option<String>,
	#[serde(default)]
	resolver_id: Option<String>,
	#[serde(default)]
	resolver_login: Option<String>,
	status: String,
}

#[derive(Debug, Deserialize)]
struct ContentClassification {
	category: String,
	#[serde(default)]
	level: u32,
}

#[derive(Debug, Deserialize)]
struct AutomodMessage {
	id: String,
	content: AutomodContent,
	sender: AutomodSender,
	#[serde(default)]
	sent_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AutomodContent {
	text: String,
}

#[derive(Debug, Deserialize)]
struct AutomodSender {
	user_id: String,
	login: String,
}

pub(super) fn decode_automod_queue(
	topic: &str,
	message: &str,
	names: &ChannelIdCache,
) -> anyhow::Result<EventPayload> {
	let outer: Outer = serde_json::from_str(message).context("parse automod queue envelope")?;
	if outer.kind != "automod_caught_message" {
		anyhow::bail!("unsupported automod queue type: {}", outer.kind);
	}
	let b: AutomodQueueBody = serde_json::from_value(outer.data).context("parse automod_caught_message body")?;
	let status = AutomodStatus::parse(&b.status).with_context(|| format!("unknown automod status: {}", b.status))?;

	let channel_id = topic_channel_id(topic)?.to_string();
	let channel = names.name(&channel_id);
	let (category, level) = b
		.content_classification
		.map(|c| (c.category, c.level))
		.unwrap_or_default();

	let automod = AutomodInfo {
		category,
		level,
		status,
		message_id: b.message.id.clone(),
		text: b.message.content.text.clone(),
		sender_id: b.message.sender.user_id.clone(),
		sender_login: b.message.sender.login.clone(),
		reason_code: b.reason_code.filter(|s| !s.is_empty()),
	};

	Ok(EventPayload::ModeratorAction(ModeratorActionData {
		kind: ModActionKind::AutomodCaught,
		moderation_action: format!("automod_{}", status.as_str()),
		args: vec![b.message.sender.login.clone(), b.message.content.text],
		created_by: b.resolver_login.unwrap_or_default(),
		created_by_id: b.resolver_id.unwrap_or_default(),
		target_id: Some(b.message.sender.user_id),
		target_login: Some(b.message.sender.login),
		msg_id: Some(b.message.id),
		created_at: parse_timestamp(b.message.sent_at.as_deref()),
		channel_id,
		channel,
		from_automod: true,
		automod: Some(automod),
	}))
}
