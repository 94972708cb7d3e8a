#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing topics from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseTopicError {
	#[error("empty value")]
	Empty,
	#[error("unknown topic family: {0}")]
	UnknownFamily(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Known PubSub topic families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicFamily {
	ModeratorActions,
	AutomodQueue,
	ChannelPoints,
	CommunityPoints,
	UserModeration,
	LowTrustUsers,
}

impl TopicFamily {
	pub const ALL: [TopicFamily; 6] = [
		TopicFamily::ModeratorActions,
		TopicFamily::AutomodQueue,
		TopicFamily::ChannelPoints,
		TopicFamily::CommunityPoints,
		TopicFamily::UserModeration,
		TopicFamily::LowTrustUsers,
	];

	/// Topic name as it appears before the first `.`.
	pub const fn as_str(self) -> &'static str {
		match self {
			TopicFamily::ModeratorActions => "chat_moderator_actions",
			TopicFamily::AutomodQueue => "automod-queue",
			TopicFamily::ChannelPoints => "channel-points-channel-v1",
			TopicFamily::CommunityPoints => "community-points-channel-v1",
			TopicFamily::UserModeration => "user-moderation-notifications",
			TopicFamily::LowTrustUsers => "low-trust-users",
		}
	}

	/// Whether the topic embeds the local user's id in front of the channel id.
	pub const fn requires_user_id(self) -> bool {
		!matches!(self, TopicFamily::ChannelPoints | TopicFamily::CommunityPoints)
	}

	/// Whether the service only accepts the topic from a moderator of the channel.
	pub const fn requires_moderator(self) -> bool {
		matches!(
			self,
			TopicFamily::ModeratorActions | TopicFamily::AutomodQueue | TopicFamily::LowTrustUsers
		)
	}

	/// Build a topic for `channel_id`. `user_id` is ignored for channel-only families.
	pub fn topic(self, user_id: &str, channel_id: &str) -> Topic {
		if self.requires_user_id() {
			Topic(format!("{}.{}.{}", self.as_str(), user_id, channel_id))
		} else {
			Topic(format!("{}.{}", self.as_str(), channel_id))
		}
	}

	/// Family of a raw topic string, if known.
	pub fn of_topic(topic: &str) -> Option<TopicFamily> {
		let head = topic.split('.').next()?;
		Self::ALL.into_iter().find(|f| f.as_str() == head)
	}
}

impl fmt::Display for TopicFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TopicFamily {
	type Err = ParseTopicError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseTopicError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"modlog" | "mod_log" | "chat_moderator_actions" => Ok(TopicFamily::ModeratorActions),
			"automod" | "automod-queue" => Ok(TopicFamily::AutomodQueue),
			"points" | "channel-points-channel-v1" => Ok(TopicFamily::ChannelPoints),
			"community-points-channel-v1" => Ok(TopicFamily::CommunityPoints),
			"user-moderation" | "user-moderation-notifications" => Ok(TopicFamily::UserModeration),
			"lowtrust" | "low-trust" | "low-trust-users" => Ok(TopicFamily::LowTrustUsers),
			other => Err(ParseTopicError::UnknownFamily(other.to_string())),
		}
	}
}

/// PubSub subscription key, e.g. `chat_moderator_actions.123.456`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
	/// Create a non-empty `Topic` without whitespace.
	pub fn new(topic: impl Into<String>) -> Result<Self, ParseTopicError> {
		let topic = topic.into();
		if topic.trim().is_empty() {
			return Err(ParseTopicError::Empty);
		}
		if topic.chars().any(char::is_whitespace) {
			return Err(ParseTopicError::InvalidFormat(format!("topic contains whitespace: {topic:?}")));
		}
		Ok(Self(topic))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	pub fn family(&self) -> Option<TopicFamily> {
		TopicFamily::of_topic(&self.0)
	}

	/// Trailing id segment (the channel for every known family).
	pub fn channel_id(&self) -> Option<&str> {
		let (_, last) = self.0.rsplit_once('.')?;
		(!last.is_empty()).then_some(last)
	}

	/// Middle id segment of `<family>.<user>.<channel>` topics.
	pub fn user_id(&self) -> Option<&str> {
		let mut parts = self.0.split('.');
		let _family = parts.next()?;
		let user = parts.next()?;
		parts.next()?;
		Some(user)
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Topic {
	type Err = ParseTopicError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Topic::new(s.to_string())
	}
}

impl AsRef<str> for Topic {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
