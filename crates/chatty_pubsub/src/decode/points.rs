#![forbid(unsafe_code)]

use std::time::SystemTime;

use anyhow::Context;
use serde::Deserialize;

use super::{EventPayload, parse_timestamp, topic_channel_id};
use crate::resolver::ChannelIdCache;

/// Fulfillment state of a channel-point redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedemptionStatus {
	Unfulfilled,
	Fulfilled,
	Canceled,
	Unknown,
}

impl RedemptionStatus {
	fn parse(s: &str) -> Self {
		match s.to_ascii_uppercase().as_str() {
			"UNFULFILLED" => Self::Unfulfilled,
			"FULFILLED" => Self::Fulfilled,
			"CANCELED" | "CANCELLED" => Self::Canceled,
			_ => Self::Unknown,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionData {
	/// `true` for `redemption-status-update`, `false` for a fresh redemption.
	pub is_status_update: bool,
	pub redemption_id: String,
	pub user_id: String,
	pub user_login: String,
	pub user_display_name: Option<String>,
	pub reward_id: String,
	pub title: String,
	pub cost: u64,
	pub user_input: Option<String>,
	pub status: RedemptionStatus,
	pub redeemed_at: Option<SystemTime>,
	pub channel_id: String,
	pub channel: Option<String>,
}

impl RedemptionData {
	pub fn display_name(&self) -> &str {
		self.user_display_name
			.as_deref()
			.filter(|s| !s.is_empty())
			.unwrap_or(&self.user_login)
	}
}

#[derive(Debug, Deserialize)]
struct Outer {
	#[serde(rename = "type")]
	kind: String,
	data: Data,
}

#[derive(Debug, Deserialize)]
struct Data {
	redemption: Redemption,
}

#[derive(Debug, Deserialize)]
struct Redemption {
	id: String,
	user: User,
	reward: Reward,
	#[serde(default)]
	user_input: Option<String>,
	#[serde(default)]
	status: Option<String>,
	#[serde(default)]
	redeemed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
	id: String,
	login: String,
	#[serde(default)]
	display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reward {
	id: String,
	title: String,
	cost: u64,
}

pub(super) fn decode_redemption(topic: &str, message: &str, names: &ChannelIdCache) -> anyhow::Result<EventPayload> {
	let outer: Outer = serde_json::from_str(message).context("parse channel points redemption")?;
	let is_status_update = match outer.kind.as_str() {
		"reward-redeemed" => false,
		"redemption-status-update" => true,
		other => anyhow::bail!("unsupported channel points type: {other}"),
	};

	let r = outer.data.redemption;
	let channel_id = topic_channel_id(topic)?.to_string();
	let channel = names.name(&channel_id);

	Ok(EventPayload::Redemption(RedemptionData {
		is_status_update,
		redemption_id: r.id,
		user_id: r.user.id,
		user_login: r.user.login,
		user_display_name: r.user.display_name,
		reward_id: r.reward.id,
		title: r.reward.title,
		cost: r.reward.cost,
		user_input: r.user_input.filter(|s| !s.trim().is_empty()),
		status: r
			.status
			.as_deref()
			.map(RedemptionStatus::parse)
			.unwrap_or(RedemptionStatus::Unknown),
		redeemed_at: parse_timestamp(r.redeemed_at.as_deref()),
		channel_id,
		channel,
	}))
}
