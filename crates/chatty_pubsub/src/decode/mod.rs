#![forbid(unsafe_code)]

mod low_trust;
mod moderation;
mod points;
mod user_moderation;

#[cfg(test)]
mod tests;

use std::fmt;
use std::time::SystemTime;

use anyhow::Context;
use tracing::debug;

use crate::resolver::ChannelIdCache;

pub use low_trust::{
	BanEvasionEvaluation, LowTrustMessageData, LowTrustTreatment, LowTrustType, LowTrustUpdateData,
};
pub use moderation::{AutomodInfo, ModActionKind, ModeratorActionData};
pub use points::{RedemptionData, RedemptionStatus};
pub use user_moderation::UserModerationData;

/// One received `MESSAGE` payload: raw topic/message plus the typed decode.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageData {
	pub topic: String,
	pub message: String,
	pub payload: EventPayload,
}

impl MessageData {
	pub fn generic(topic: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			topic: topic.into(),
			message: message.into(),
			payload: EventPayload::Generic,
		}
	}

	pub fn is_generic(&self) -> bool {
		matches!(self.payload, EventPayload::Generic)
	}
}

impl fmt::Display for MessageData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.payload {
			EventPayload::ModeratorAction(a) => {
				let channel = a.channel.as_deref().unwrap_or(&a.channel_id);
				write!(f, "[ModAction] #{channel} {}: /{}", a.created_by, a.moderation_action)?;
				for arg in &a.args {
					write!(f, " {arg}")?;
				}
				Ok(())
			}
			EventPayload::Redemption(r) => {
				write!(f, "[Points] {} redeemed {} ({})", r.display_name(), r.title, r.cost)?;
				if let Some(input) = &r.user_input {
					write!(f, ": {input}")?;
				}
				Ok(())
			}
			EventPayload::UserModeration(u) => {
				let channel = u.channel.as_deref().unwrap_or(&u.channel_id);
				write!(f, "[AutoMod] #{channel} your message {} is {}", u.message_id, u.status)
			}
			EventPayload::LowTrustMessage(m) => {
				write!(f, "[LowTrust] {}: {} (types={:?})", m.sender_login, m.text, m.types)
			}
			EventPayload::LowTrustUpdate(u) => {
				write!(
					f,
					"[LowTrust] {} updated {}: treatment={:?}",
					u.updated_by_login, u.target_login, u.treatment
				)
			}
			EventPayload::Generic => write!(f, "[{}] {}", self.topic, self.message),
		}
	}
}

/// Typed event, chosen by topic family.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
	ModeratorAction(ModeratorActionData),
	Redemption(RedemptionData),
	UserModeration(UserModerationData),
	LowTrustMessage(LowTrustMessageData),
	LowTrustUpdate(LowTrustUpdateData),
	/// Unknown family or undecodable body; only topic/message are meaningful.
	Generic,
}

/// Automod review outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomodStatus {
	Pending,
	Allowed,
	Denied,
	Expired,
}

impl AutomodStatus {
	pub fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_uppercase().as_str() {
			"PENDING" => Some(Self::Pending),
			"ALLOWED" | "APPROVED" => Some(Self::Allowed),
			"DENIED" => Some(Self::Denied),
			"EXPIRED" => Some(Self::Expired),
			_ => None,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Allowed => "allowed",
			Self::Denied => "denied",
			Self::Expired => "expired",
		}
	}
}

impl fmt::Display for AutomodStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

type DecodeFn = fn(&str, &str, &ChannelIdCache) -> anyhow::Result<EventPayload>;

/// Ordered prefix table; the first decoder that succeeds wins.
const DECODERS: &[(&str, DecodeFn)] = &[
	("chat_moderator_actions", moderation::decode_moderator_action),
	("automod-queue.", moderation::decode_automod_queue),
	("channel-points-channel-v1", points::decode_redemption),
	("community-points-channel-v1", points::decode_redemption),
	("user-moderation-notifications", user_moderation::decode_user_moderation),
	("low-trust-users", low_trust::decode_low_trust),
];

/// Decode a topic's raw message body into a typed event.
///
/// Never fails: unknown topics and undecodable bodies become `EventPayload::Generic`.
pub fn decode_data(topic: &str, message: &str, names: &ChannelIdCache) -> MessageData {
	for (prefix, decode) in DECODERS {
		if !topic.starts_with(prefix) {
			continue;
		}

		match decode(topic, message, names) {
			Ok(payload) => {
				return MessageData {
					topic: topic.to_string(),
					message: message.to_string(),
					payload,
				};
			}
			Err(e) => {
				metrics::counter!("chatty_pubsub_decode_errors_total").increment(1);
				debug!(%topic, error = %format!("{e:#}"), "typed decode failed; falling back");
			}
		}
	}

	MessageData::generic(topic, message)
}

/// Trailing id segment of a topic.
pub(crate) fn topic_channel_id(topic: &str) -> anyhow::Result<&str> {
	topic
		.rsplit_once('.')
		.map(|(_, id)| id)
		.filter(|id| !id.is_empty())
		.with_context(|| format!("topic has no channel id: {topic}"))
}

/// Parse an RFC3339 timestamp; empty strings are `None`.
pub(crate) fn parse_timestamp(ts: Option<&str>) -> Option<SystemTime> {
	let ts = ts.map(str::trim).filter(|s| !s.is_empty())?;
	match chrono::DateTime::parse_from_rfc3339(ts) {
		Ok(dt) => Some(SystemTime::from(dt.with_timezone(&chrono::Utc))),
		Err(e) => {
			debug!(%ts, error = %e, "ignoring unparseable timestamp");
			None
		}
	}
}
