#![forbid(unsafe_code)]

use serde_json::json;

use super::*;

fn names() -> ChannelIdCache {
	let cache = ChannelIdCache::new();
	cache.insert("somechannel", "123");
	cache
}

fn redemption_body(user: Option<serde_json::Value>) -> String {
	let mut redemption = json!({
		"id": "r-1",
		"channel_id": "123",
		"redeemed_at": "2024-05-01T12:00:00Z",
		"reward": { "id": "reward-1", "title": "Hydrate", "cost": 500, "prompt": "drink" },
		"user_input": "cheers",
		"status": "UNFULFILLED",
	});
	if let Some(user) = user {
		redemption["user"] = user;
	}
	json!({
		"type": "reward-redeemed",
		"data": { "timestamp": "2024-05-01T12:00:00Z", "redemption": redemption },
	})
	.to_string()
}

#[test]
fn redemption_decodes_title_cost_and_user() {
	let body = redemption_body(Some(json!({ "id": "9", "login": "viewer", "display_name": "Viewer" })));
	let data = decode_data("channel-points-channel-v1.123", &body, &names());

	let EventPayload::Redemption(r) = &data.payload else {
		panic!("expected redemption, got {:?}", data.payload);
	};
	assert_eq!(r.title, "Hydrate");
	assert_eq!(r.cost, 500);
	assert_eq!(r.user_login, "viewer");
	assert_eq!(r.display_name(), "Viewer");
	assert_eq!(r.user_input.as_deref(), Some("cheers"));
	assert_eq!(r.status, RedemptionStatus::Unfulfilled);
	assert_eq!(r.channel.as_deref(), Some("somechannel"));
	assert!(r.redeemed_at.is_some());
	assert!(!r.is_status_update);
}

#[test]
fn redemption_without_user_falls_back_to_generic() {
	let body = redemption_body(None);
	let data = decode_data("channel-points-channel-v1.123", &body, &names());

	assert!(data.is_generic());
	assert_eq!(data.topic, "channel-points-channel-v1.123");
	assert_eq!(data.message, body);
}

#[test]
fn community_points_status_update_is_a_redemption() {
	let body = json!({
		"type": "redemption-status-update",
		"data": { "redemption": {
			"id": "r-2",
			"user": { "id": "9", "login": "viewer" },
			"reward": { "id": "reward-1", "title": "Hydrate", "cost": 10 },
			"status": "FULFILLED",
		}},
	})
	.to_string();
	let data = decode_data("community-points-channel-v1.123", &body, &names());

	let EventPayload::Redemption(r) = data.payload else {
		panic!("expected redemption");
	};
	assert!(r.is_status_update);
	assert_eq!(r.status, RedemptionStatus::Fulfilled);
	assert_eq!(r.display_name(), "viewer");
}

#[test]
fn unknown_topic_is_generic_with_raw_fields_unchanged() {
	let raw = r#"{"type":"whatever","data":{"x":1}}"#;
	let data = decode_data("video-playback-by-id.42", raw, &names());

	assert_eq!(data, MessageData::generic("video-playback-by-id.42", raw));
}

#[test]
fn moderation_action_fills_channel_from_cache() {
	let body = json!({
		"type": "moderation_action",
		"data": {
			"type": "chat_login_moderation",
			"moderation_action": "timeout",
			"args": ["baduser", "600", "spam"],
			"created_by": "modlogin",
			"created_by_user_id": "7",
			"created_at": "2024-05-01T12:00:00.123Z",
			"msg_id": "",
			"target_user_id": "55",
			"target_user_login": "",
			"from_automod": false,
		},
	})
	.to_string();
	let data = decode_data("chat_moderator_actions.7.123", &body, &names());

	let EventPayload::ModeratorAction(a) = &data.payload else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::Moderation);
	assert_eq!(a.moderation_action, "timeout");
	assert_eq!(a.args, vec!["baduser", "600", "spam"]);
	assert_eq!(a.created_by, "modlogin");
	assert_eq!(a.target_id.as_deref(), Some("55"));
	assert_eq!(a.target_login, None);
	assert_eq!(a.msg_id, None);
	assert_eq!(a.channel_id, "123");
	assert_eq!(a.channel.as_deref(), Some("somechannel"));
	assert!(a.created_at.is_some());
	assert_eq!(data.to_string(), "[ModAction] #somechannel modlogin: /timeout baduser 600 spam");
}

#[test]
fn moderator_removed_is_detected_as_unmod() {
	let body = json!({
		"type": "moderator_removed",
		"data": {
			"channel_id": "123",
			"target_user_id": "7",
			"moderation_action": "unmod",
			"target_user_login": "me",
			"created_by_user_id": "123",
			"created_by": "somechannel",
		},
	})
	.to_string();
	let data = decode_data("chat_moderator_actions.7.123", &body, &names());

	let EventPayload::ModeratorAction(a) = data.payload else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::ModeratorRemoved);
	assert!(a.is_unmod_of("7"));
	assert!(!a.is_unmod_of("8"));
	assert_eq!(a.args, vec!["me"]);
}

#[test]
fn unvip_action_name_maps_to_vip_removed() {
	let body = json!({
		"type": "moderation_action",
		"data": { "moderation_action": "unvip", "args": ["someone"], "created_by": "m" },
	})
	.to_string();
	let data = decode_data("chat_moderator_actions.7.123", &body, &names());

	let EventPayload::ModeratorAction(a) = data.payload else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::VipRemoved);
}

#[test]
fn channel_terms_and_unban_requests_decode() {
	let terms = json!({
		"type": "channel_terms_action",
		"data": {
			"type": "add_blocked_term",
			"id": "term-1",
			"text": "badword",
			"requester_id": "7",
			"requester_login": "modlogin",
			"channel_id": "123",
			"updated_at": "2024-05-01T12:00:00Z",
			"from_automod": false,
		},
	})
	.to_string();
	let EventPayload::ModeratorAction(a) = decode_data("chat_moderator_actions.7.123", &terms, &names()).payload
	else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::ChannelTerms);
	assert_eq!(a.moderation_action, "add_blocked_term");
	assert_eq!(a.args, vec!["badword", "term-1"]);

	let unban = json!({
		"type": "deny_unban_request",
		"data": {
			"moderation_action": "DENY_UNBAN_REQUEST",
			"created_by_id": "7",
			"created_by_login": "modlogin",
			"moderator_message": "no",
			"target_user_id": "55",
			"target_user_login": "baduser",
		},
	})
	.to_string();
	let EventPayload::ModeratorAction(a) = decode_data("chat_moderator_actions.7.123", &unban, &names()).payload
	else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::UnbanRequestDenied);
	assert_eq!(a.moderation_action, "deny_unban_request");
	assert_eq!(a.args, vec!["baduser", "no"]);
}

#[test]
fn moderation_action_missing_name_is_generic() {
	let body = json!({ "type": "moderation_action", "data": { "args": [] } }).to_string();
	let data = decode_data("chat_moderator_actions.7.123", &body, &names());
	assert!(data.is_generic());
}

#[test]
fn automod_queue_carries_classification() {
	let body = json!({
		"type": "automod_caught_message",
		"data": {
			"content_classification": { "category": "aggressive", "level": 3 },
			"message": {
				"id": "m-1",
				"content": { "text": "you are bad", "fragments": [] },
				"sender": { "user_id": "55", "login": "baduser", "display_name": "BadUser" },
				"sent_at": "2024-05-01T12:00:00Z",
			},
			"reason_code": "",
			"resolver_id": "",
			"resolver_login": "",
			"status": "PENDING",
		},
	})
	.to_string();
	let data = decode_data("automod-queue.7.123", &body, &names());

	let EventPayload::ModeratorAction(a) = data.payload else {
		panic!("expected moderator action");
	};
	assert_eq!(a.kind, ModActionKind::AutomodCaught);
	assert!(a.from_automod);
	let automod = a.automod.expect("automod info");
	assert_eq!(automod.category, "aggressive");
	assert_eq!(automod.level, 3);
	assert_eq!(automod.status, AutomodStatus::Pending);
	assert_eq!(automod.reason_code, None);
	assert_eq!(a.msg_id.as_deref(), Some("m-1"));
}

#[test]
fn user_moderation_reports_status_and_message_id() {
	let body = json!({
		"type": "automod_caught_message",
		"data": { "message_id": "m-9", "status": "DENIED" },
	})
	.to_string();
	let data = decode_data("user-moderation-notifications.7.123", &body, &names());

	let EventPayload::UserModeration(u) = data.payload else {
		panic!("expected user moderation");
	};
	assert_eq!(u.status, AutomodStatus::Denied);
	assert_eq!(u.message_id, "m-9");
	assert_eq!(u.channel.as_deref(), Some("somechannel"));
}

#[test]
fn low_trust_message_omits_unknown_enum_values() {
	let body = json!({
		"type": "low_trust_user_new_message",
		"data": {
			"low_trust_user": {
				"id": "55.123",
				"low_trust_id": "lt-1",
				"channel_id": "123",
				"sender": { "user_id": "55", "login": "evader", "display_name": "Evader" },
				"evaluated_at": "2024-05-01T12:00:00Z",
				"ban_evasion_evaluation": "SOMETHING_NEW",
				"treatment": "RESTRICTED",
				"shared_ban_channel_ids": ["900", "901"],
				"types": ["BANNED_IN_SHARED_CHANNEL", "BRAND_NEW_TYPE", "MANUALLY_ADDED"],
			},
			"message_content": { "text": "hello", "fragments": [] },
			"message_id": "m-2",
			"sent_at": "2024-05-01T12:00:01Z",
		},
	})
	.to_string();
	let data = decode_data("low-trust-users.7.123", &body, &names());

	let EventPayload::LowTrustMessage(m) = data.payload else {
		panic!("expected low-trust message");
	};
	assert_eq!(
		m.types.iter().copied().collect::<Vec<_>>(),
		vec![LowTrustType::ManuallyAdded, LowTrustType::BannedInSharedChannel]
	);
	assert_eq!(m.evaluation, None);
	assert_eq!(m.treatment, Some(LowTrustTreatment::Restricted));
	assert_eq!(m.shared_ban_channel_ids, vec!["900", "901"]);
	assert_eq!(m.sender_login, "evader");
	assert_eq!(m.text, "hello");
}

#[test]
fn low_trust_treatment_update_decodes() {
	let body = json!({
		"type": "low_trust_user_treatment_update",
		"data": {
			"low_trust_id": "lt-1",
			"channel_id": "123",
			"updated_by": { "user_id": "7", "login": "modlogin", "display_name": "Mod" },
			"updated_at": "2024-05-01T12:00:00Z",
			"target_user_id": "55",
			"target_user": "evader",
			"treatment": "ACTIVE_MONITORING",
			"types": ["MANUALLY_ADDED"],
			"ban_evasion_evaluation": "LIKELY_EVADER",
		},
	})
	.to_string();
	let data = decode_data("low-trust-users.7.123", &body, &names());

	let EventPayload::LowTrustUpdate(u) = data.payload else {
		panic!("expected low-trust update");
	};
	assert_eq!(u.target_login, "evader");
	assert_eq!(u.updated_by_login, "modlogin");
	assert_eq!(u.treatment, Some(LowTrustTreatment::ActiveMonitoring));
	assert_eq!(u.evaluation, Some(BanEvasionEvaluation::LikelyEvader));
}

#[test]
fn malformed_message_body_is_generic() {
	let data = decode_data("low-trust-users.7.123", "not json", &names());
	assert!(data.is_generic());
	assert_eq!(data.message, "not json");
}
