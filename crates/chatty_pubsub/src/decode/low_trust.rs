#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::SystemTime;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use super::{EventPayload, parse_timestamp, topic_channel_id};
use crate::resolver::ChannelIdCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LowTrustType {
	UnknownType,
	ManuallyAdded,
	BanEvaderDetected,
	BannedInSharedChannel,
}

impl LowTrustType {
	fn parse(s: &str) -> Option<Self> {
		match s {
			"UNKNOWN_TYPE" => Some(Self::UnknownType),
			"MANUALLY_ADDED" => Some(Self::ManuallyAdded),
			"BAN_EVADER_DETECTED" => Some(Self::BanEvaderDetected),
			"BANNED_IN_SHARED_CHANNEL" => Some(Self::BannedInSharedChannel),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanEvasionEvaluation {
	UnknownEvader,
	UnlikelyEvader,
	PossibleEvader,
	LikelyEvader,
}

impl BanEvasionEvaluation {
	fn parse(s: &str) -> Option<Self> {
		match s {
			"UNKNOWN_EVADER" => Some(Self::UnknownEvader),
			"UNLIKELY_EVADER" => Some(Self::UnlikelyEvader),
			"POSSIBLE_EVADER" => Some(Self::PossibleEvader),
			"LIKELY_EVADER" => Some(Self::LikelyEvader),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowTrustTreatment {
	NoTreatment,
	ActiveMonitoring,
	Restricted,
}

impl LowTrustTreatment {
	fn parse(s: &str) -> Option<Self> {
		match s {
			"NO_TREATMENT" => Some(Self::NoTreatment),
			"ACTIVE_MONITORING" => Some(Self::ActiveMonitoring),
			"RESTRICTED" => Some(Self::Restricted),
			_ => None,
		}
	}
}

/// A message from a user the channel flagged as low-trust.
#[derive(Debug, Clone, PartialEq)]
pub struct LowTrustMessageData {
	pub low_trust_id: String,
	pub channel_id: String,
	pub channel: Option<String>,
	pub sender_id: String,
	pub sender_login: String,
	pub sender_display_name: Option<String>,
	pub message_id: String,
	pub text: String,
	pub sent_at: Option<SystemTime>,
	pub types: BTreeSet<LowTrustType>,
	pub evaluation: Option<BanEvasionEvaluation>,
	pub treatment: Option<LowTrustTreatment>,
	/// Channels the sender is also banned in.
	pub shared_ban_channel_ids: Vec<String>,
}

/// A moderator changed how a low-trust user is treated.
#[derive(Debug, Clone, PartialEq)]
pub struct LowTrustUpdateData {
	pub low_trust_id: String,
	pub channel_id: String,
	pub channel: Option<String>,
	pub target_id: String,
	pub target_login: String,
	pub updated_by_id: String,
	pub updated_by_login: String,
	pub updated_at: Option<SystemTime>,
	pub types: BTreeSet<LowTrustType>,
	pub evaluation: Option<BanEvasionEvaluation>,
	pub treatment: Option<LowTrustTreatment>,
}

#[derive(Debug, Deserialize)]
struct Outer {
	#[serde(rename = "type")]
	kind: String,
	data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NewMessageBody {
	low_trust_user: LowTrustUser,
	message_content: MessageContent,
	message_id: String,
	#[serde(default)]
	sent_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LowTrustUser {
	low_trust_id: String,
	sender: UserRef,
	#[serde(default)]
	types: Vec<String>,
	#[serde(default)]
	ban_evasion_evaluation: Option<String>,
	#[serde(default)]
	treatment: Option<String>,
	#[serde(default)]
	shared_ban_channel_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
	text: String,
}

#[derive(Debug, Deserialize)]
struct UserRef {
	user_id: String,
	login: String,
	#[serde(default)]
	display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreatmentUpdateBody {
	low_trust_id: String,
	target_user_id: String,
	target_user: String,
	updated_by: UserRef,
	#[serde(default)]
	updated_at: Option<String>,
	#[serde(default)]
	types: Vec<String>,
	#[serde(default)]
	ban_evasion_evaluation: Option<String>,
	#[serde(default)]
	treatment: Option<String>,
}

fn parse_types(raw: &[String]) -> BTreeSet<LowTrustType> {
	raw.iter()
		.filter_map(|t| {
			let parsed = LowTrustType::parse(t);
			if parsed.is_none() {
				warn!(value = %t, "unknown low-trust type");
			}
			parsed
		})
		.collect()
}

fn parse_enum<T>(raw: Option<&str>, what: &'static str, parse: fn(&str) -> Option<T>) -> Option<T> {
	let raw = raw.filter(|s| !s.is_empty())?;
	let parsed = parse(raw);
	if parsed.is_none() {
		warn!(value = %raw, field = what, "unknown low-trust value");
	}
	parsed
}

pub(super) fn decode_low_trust(topic: &str, message: &str, names: &ChannelIdCache) -> anyhow::Result<EventPayload> {
	let outer: Outer = serde_json::from_str(message).context("parse low-trust envelope")?;
	let channel_id = topic_channel_id(topic)?.to_string();
	let channel = names.name(&channel_id);

	match outer.kind.as_str() {
		"low_trust_user_new_message" => {
			let b: NewMessageBody =
				serde_json::from_value(outer.data).context("parse low_trust_user_new_message body")?;
			let u = b.low_trust_user;
			Ok(EventPayload::LowTrustMessage(LowTrustMessageData {
				low_trust_id: u.low_trust_id,
				channel_id,
				channel,
				sender_id: u.sender.user_id,
				sender_login: u.sender.login,
				sender_display_name: u.sender.display_name,
				message_id: b.message_id,
				text: b.message_content.text,
				sent_at: parse_timestamp(b.sent_at.as_deref()),
				types: parse_types(&u.types),
				evaluation: parse_enum(
					u.ban_evasion_evaluation.as_deref(),
					"ban_evasion_evaluation",
					BanEvasionEvaluation::parse,
				),
				treatment: parse_enum(u.treatment.as_deref(), "treatment", LowTrustTreatment::parse),
				shared_ban_channel_ids: u.shared_ban_channel_ids.unwrap_or_default(),
			}))
		}
		"low_trust_user_treatment_update" => {
			let b: TreatmentUpdateBody =
				serde_json::from_value(outer.data).context("parse low_trust_user_treatment_update body")?;
			Ok(EventPayload::LowTrustUpdate(LowTrustUpdateData {
				low_trust_id: b.low_trust_id,
				channel_id,
				channel,
				target_id: b.target_user_id,
				target_login: b.target_user,
				updated_by_id: b.updated_by.user_id,
				updated_by_login: b.updated_by.login,
				updated_at: parse_timestamp(b.updated_at.as_deref()),
				types: parse_types(&b.types),
				evaluation: parse_enum(
					b.ban_evasion_evaluation.as_deref(),
					"ban_evasion_evaluation",
					BanEvasionEvaluation::parse,
				),
				treatment: parse_enum(b.treatment.as_deref(), "treatment", LowTrustTreatment::parse),
			}))
		}
		other => anyhow::bail!("unsupported low-trust type: {other}"),
	}
}
