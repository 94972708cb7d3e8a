#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::SecretString;

const HELIX_BASE_URL: &str = "https://api.twitch.tv";

/// Lowercase channel login without a leading `#`.
pub fn normalize_channel(channel: &str) -> String {
	channel.trim().trim_start_matches('#').to_ascii_lowercase()
}

/// Channel login ↔ numeric id cache shared by the orchestrator and decoders.
#[derive(Debug, Clone, Default)]
pub struct ChannelIdCache {
	inner: Arc<RwLock<CacheInner>>,
}

#[derive(Debug, Default)]
struct CacheInner {
	id_by_name: HashMap<String, String>,
	name_by_id: HashMap<String, String>,
}

impl ChannelIdCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, channel: &str, id: &str) {
		let channel = normalize_channel(channel);
		let mut inner = self.inner.write();
		if let Some(previous) = inner.id_by_name.insert(channel.clone(), id.to_string())
			&& previous != id
		{
			inner.name_by_id.remove(&previous);
		}
		inner.name_by_id.insert(id.to_string(), channel);
	}

	pub fn id(&self, channel: &str) -> Option<String> {
		self.inner.read().id_by_name.get(&normalize_channel(channel)).cloned()
	}

	pub fn name(&self, id: &str) -> Option<String> {
		self.inner.read().name_by_id.get(id).cloned()
	}

	pub fn len(&self) -> usize {
		self.inner.read().id_by_name.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Resolves channel logins to numeric account ids.
#[async_trait::async_trait]
pub trait ChannelIdResolver: Send + Sync + 'static {
	/// `Ok(None)` when the login does not exist.
	async fn resolve(&self, channel: &str) -> anyhow::Result<Option<String>>;
}

/// Resolver backed by `GET /helix/users?login=`.
pub struct HelixChannelIdResolver {
	http: reqwest::Client,
	base_url: Url,
	client_id: String,
	bearer_token: RwLock<SecretString>,
}

impl HelixChannelIdResolver {
	pub fn new(client_id: impl Into<String>, bearer_token: SecretString) -> anyhow::Result<Self> {
		Self::with_base_url(HELIX_BASE_URL, client_id, bearer_token)
	}

	pub fn with_base_url(
		base_url: &str,
		client_id: impl Into<String>,
		bearer_token: SecretString,
	) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("chatty/0.x (pubsub)")
			.build()
			.context("build reqwest client")?;
		let base_url = Url::parse(base_url).context("parse helix base url")?;

		Ok(Self {
			http,
			base_url,
			client_id: client_id.into(),
			bearer_token: RwLock::new(bearer_token),
		})
	}

	pub fn set_token(&self, token: SecretString) {
		*self.bearer_token.write() = token;
	}

	fn users_url(&self, login: &str) -> anyhow::Result<Url> {
		self.base_url
			.join(&format!("/helix/users?login={}", urlencoding::encode(login)))
			.context("join helix url")
	}
}

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
	data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
	id: String,
	login: String,
}

#[async_trait::async_trait]
impl ChannelIdResolver for HelixChannelIdResolver {
	async fn resolve(&self, channel: &str) -> anyhow::Result<Option<String>> {
		let login = normalize_channel(channel);
		let url = self.users_url(&login)?;
		let bearer = format!("Bearer {}", self.bearer_token.read().expose());

		let resp = self
			.http
			.get(url)
			.header("Client-Id", &self.client_id)
			.header("Authorization", bearer)
			.send()
			.await
			.context("helix GET /helix/users send")?;

		let status = resp.status();
		if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			anyhow::bail!("helix auth failed (status={status})");
		}

		let body = resp.text().await.context("helix GET /helix/users read body")?;
		if !status.is_success() {
			anyhow::bail!("helix GET /helix/users failed: status={status} body={body}");
		}

		let parsed: HelixUsersResponse = serde_json::from_str(&body).context("helix users parse json")?;
		let found = parsed
			.data
			.into_iter()
			.find(|u| u.login.eq_ignore_ascii_case(&login))
			.map(|u| u.id);
		debug!(%login, found = found.is_some(), "resolved channel id");
		Ok(found)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cache_lookups_are_normalized_both_ways() {
		let cache = ChannelIdCache::new();
		cache.insert("#SomeChannel", "123");

		assert_eq!(cache.id("somechannel").as_deref(), Some("123"));
		assert_eq!(cache.id("#SOMECHANNEL").as_deref(), Some("123"));
		assert_eq!(cache.name("123").as_deref(), Some("somechannel"));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn cache_reinsert_drops_stale_reverse_entry() {
		let cache = ChannelIdCache::new();
		cache.insert("renamed", "1");
		cache.insert("renamed", "2");

		assert_eq!(cache.name("1"), None);
		assert_eq!(cache.name("2").as_deref(), Some("renamed"));
	}

	#[test]
	fn users_url_encodes_login() {
		let resolver = HelixChannelIdResolver::new("cid", SecretString::new("tok")).unwrap();
		let url = resolver.users_url("a&b").unwrap();
		assert_eq!(url.as_str(), "https://api.twitch.tv/helix/users?login=a%26b");
	}
}
