#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::decode::{EventPayload, ModeratorActionData};
use crate::resolver::{ChannelIdCache, ChannelIdResolver, normalize_channel};
use crate::{MessageData, PubSubConfig, PubSubListener, SecretString, ShardPool, Topic, TopicFamily};

/// Subscribes channel-scoped topics by channel login, resolving ids first.
///
/// Drops mod-only topics for a channel as soon as the local user is unmodded there.
pub struct ModLog {
	inner: Arc<ModLogInner>,
}

struct ModLogInner {
	pool: ShardPool,
	resolver: Arc<dyn ChannelIdResolver>,
	names: ChannelIdCache,
	listener: Arc<dyn PubSubListener>,
	state: Mutex<ModLogState>,
}

/// Pool calls happen with this state locked, so tracking and subscriptions change together.
struct ModLogState {
	local_username: Option<String>,
	local_id: Option<String>,
	/// An id lookup for `local_username` is in flight.
	local_lookup: bool,
	token: SecretString,
	channels: HashMap<String, TrackedChannel>,
}

struct TrackedChannel {
	/// `None` while the id lookup is in flight.
	id: Option<String>,
	families: BTreeSet<TopicFamily>,
}

impl ModLogState {
	/// Topic for `family` in `channel_id`, if every id it needs is known.
	fn build_topic(&self, family: TopicFamily, channel_id: Option<&str>) -> Option<Topic> {
		let channel_id = channel_id?;
		if family.requires_user_id() {
			Some(family.topic(self.local_id.as_deref()?, channel_id))
		} else {
			Some(family.topic("", channel_id))
		}
	}

	fn channel_topics(&self, channel: &str) -> Vec<Topic> {
		let Some(ch) = self.channels.get(channel) else {
			return Vec::new();
		};
		ch.families
			.iter()
			.filter_map(|f| self.build_topic(*f, ch.id.as_deref()))
			.collect()
	}

	fn all_topics(&self) -> Vec<Topic> {
		self.channels.keys().flat_map(|c| self.channel_topics(c)).collect()
	}
}

/// Sits between the pool and the caller's listener to watch for unmod events.
struct ModLogListener {
	downstream: Arc<dyn PubSubListener>,
	modlog: OnceLock<Weak<ModLogInner>>,
}

impl PubSubListener for ModLogListener {
	fn on_event(&self, event: MessageData) {
		if let EventPayload::ModeratorAction(action) = &event.payload
			&& let Some(inner) = self.modlog.get().and_then(Weak::upgrade)
		{
			inner.handle_mod_action(action);
		}
		self.downstream.on_event(event);
	}

	fn on_info(&self, info: String) {
		self.downstream.on_info(info);
	}
}

impl ModLog {
	pub fn new(
		config: PubSubConfig,
		resolver: Arc<dyn ChannelIdResolver>,
		listener: Arc<dyn PubSubListener>,
	) -> anyhow::Result<Self> {
		let names = ChannelIdCache::new();
		let interceptor = Arc::new(ModLogListener {
			downstream: listener.clone(),
			modlog: OnceLock::new(),
		});
		let pool = ShardPool::new(config, interceptor.clone(), names.clone())?;

		let inner = Arc::new(ModLogInner {
			pool,
			resolver,
			names,
			listener,
			state: Mutex::new(ModLogState {
				local_username: None,
				local_id: None,
				local_lookup: false,
				token: SecretString::new(""),
				channels: HashMap::new(),
			}),
		});
		let _ = interceptor.modlog.set(Arc::downgrade(&inner));

		Ok(Self { inner })
	}

	pub fn pool(&self) -> &ShardPool {
		&self.inner.pool
	}

	pub fn names(&self) -> &ChannelIdCache {
		&self.inner.names
	}

	pub fn local_id(&self) -> Option<String> {
		self.inner.state.lock().local_id.clone()
	}

	/// Set the account whose id goes into user-scoped topics.
	///
	/// Pending subscriptions are sent once the id resolves.
	pub fn set_local_username(&self, username: &str) {
		let username = normalize_channel(username);
		if username.is_empty() {
			return;
		}

		{
			let mut st = self.inner.state.lock();
			if st.local_username.as_deref() == Some(username.as_str()) && (st.local_id.is_some() || st.local_lookup) {
				return;
			}

			// Topics built with the previous account's id.
			for topic in st.all_topics().iter().filter(|t| t.user_id().is_some()) {
				self.inner.pool.remove_topic(topic, &st.token);
			}
			st.local_username = Some(username.clone());
			st.local_id = None;
			st.local_lookup = false;

			if let Some(id) = self.inner.names.id(&username) {
				self.inner.local_id_resolved(&mut st, &username, id);
				return;
			}
			st.local_lookup = true;
		}

		let inner = self.inner.clone();
		tokio::spawn(async move {
			let result = inner.resolver.resolve(&username).await;
			let mut st = inner.state.lock();
			if st.local_username.as_deref() != Some(username.as_str()) {
				return;
			}
			st.local_lookup = false;

			match result {
				Ok(Some(id)) => {
					inner.names.insert(&username, &id);
					inner.local_id_resolved(&mut st, &username, id);
				}
				Ok(None) => {
					drop(st);
					warn!(%username, "local user not found");
					inner.listener.on_info(format!("PubSub: user {username} not found"));
				}
				Err(e) => {
					drop(st);
					warn!(%username, error = %format!("{e:#}"), "failed to resolve local user id");
					inner
						.listener
						.on_info(format!("PubSub: failed to resolve user {username}: {e}"));
				}
			}
		});
	}

	/// Subscribe `family` for `channel`. No-op if already tracked.
	pub fn listen(&self, family: TopicFamily, channel: &str, token: &SecretString) {
		let channel = normalize_channel(channel);
		if channel.is_empty() {
			return;
		}

		let mut st = self.inner.state.lock();
		st.token = token.clone();
		let needs_resolve = match st.channels.entry(channel.clone()) {
			Entry::Occupied(mut e) => {
				if !e.get_mut().families.insert(family) {
					return;
				}
				// A pending id is already being looked up; that task syncs every family.
				false
			}
			Entry::Vacant(e) => {
				let id = self.inner.names.id(&channel);
				let needs_resolve = id.is_none();
				e.insert(TrackedChannel {
					id,
					families: BTreeSet::from([family]),
				});
				needs_resolve
			}
		};

		debug!(%channel, %family, needs_resolve, "pubsub listen");
		if needs_resolve {
			drop(st);
			self.spawn_channel_resolve(channel);
		} else {
			self.inner.sync_channel(&st, &channel);
		}
	}

	/// Stop `family` for `channel`; tracking ends once no family is left.
	pub fn unlisten(&self, family: TopicFamily, channel: &str) {
		self.inner.unlisten(family, &normalize_channel(channel));
	}

	pub fn listen_mod_log(&self, channel: &str, token: &SecretString) {
		self.listen(TopicFamily::ModeratorActions, channel, token);
	}

	pub fn unlisten_mod_log(&self, channel: &str) {
		self.unlisten(TopicFamily::ModeratorActions, channel);
	}

	pub fn is_listening(&self, family: TopicFamily, channel: &str) -> bool {
		self.inner
			.state
			.lock()
			.channels
			.get(&normalize_channel(channel))
			.is_some_and(|c| c.families.contains(&family))
	}

	pub fn update_token(&self, token: &SecretString) {
		let mut st = self.inner.state.lock();
		st.token = token.clone();
		self.inner.pool.update_token(token);
	}

	pub fn check_connection(&self) {
		self.inner.pool.send_ping();
	}

	pub fn disconnect(&self) {
		self.inner.pool.disconnect();
	}

	pub fn reconnect(&self) {
		self.inner.pool.reconnect();
	}

	pub fn is_connected(&self) -> bool {
		self.inner.pool.is_connected()
	}

	/// Human-readable state dump: local user, tracked channels, then shards.
	pub fn status(&self) -> Vec<String> {
		let mut lines = Vec::new();
		{
			let st = self.inner.state.lock();
			lines.push(format!(
				"local user: {} ({})",
				st.local_username.as_deref().unwrap_or("-"),
				st.local_id.as_deref().unwrap_or("unresolved")
			));
			let mut channels: Vec<_> = st.channels.iter().collect();
			channels.sort_by(|a, b| a.0.cmp(b.0));
			for (name, ch) in channels {
				let families: Vec<&str> = ch.families.iter().map(|f| f.as_str()).collect();
				lines.push(format!(
					"#{name}: id={} topics=[{}]",
					ch.id.as_deref().unwrap_or("pending"),
					families.join(", ")
				));
			}
		}
		lines.push(format!(
			"topics: {}, connected: {}",
			self.inner.pool.num_topics(),
			self.inner.pool.is_connected()
		));
		lines.extend(self.inner.pool.status());
		lines
	}

	fn spawn_channel_resolve(&self, channel: String) {
		let inner = self.inner.clone();
		tokio::spawn(async move {
			let result = inner.resolver.resolve(&channel).await;
			let id = match result {
				Ok(Some(id)) => id,
				Ok(None) => {
					inner.untrack(&channel);
					inner.listener.on_info(format!("PubSub: channel {channel} not found"));
					return;
				}
				Err(e) => {
					warn!(%channel, error = %format!("{e:#}"), "failed to resolve channel id");
					inner.untrack(&channel);
					inner
						.listener
						.on_info(format!("PubSub: failed to resolve channel {channel}: {e}"));
					return;
				}
			};

			inner.names.insert(&channel, &id);
			let mut st = inner.state.lock();
			let tracked = match st.channels.get_mut(&channel) {
				Some(ch) => {
					ch.id = Some(id.clone());
					true
				}
				None => false,
			};
			debug!(%channel, %id, tracked, "channel id resolved");
			if tracked {
				inner.sync_channel(&st, &channel);
			}
		});
	}
}

impl ModLogInner {
	fn local_id_resolved(&self, st: &mut ModLogState, username: &str, id: String) {
		st.local_id = Some(id.clone());
		let topics = st.all_topics();
		info!(%username, %id, pending = topics.len(), "local user id resolved");
		for topic in topics {
			self.pool.add_topic(&topic, &st.token);
		}
	}

	/// Subscribe whatever can be built for `channel` right now.
	fn sync_channel(&self, st: &ModLogState, channel: &str) {
		for topic in st.channel_topics(channel) {
			self.pool.add_topic(&topic, &st.token);
		}
	}

	fn untrack(&self, channel: &str) {
		self.state.lock().channels.remove(channel);
	}

	fn unlisten(&self, family: TopicFamily, channel: &str) {
		let mut st = self.state.lock();
		let Some(ch) = st.channels.get_mut(channel) else {
			return;
		};
		if !ch.families.remove(&family) {
			return;
		}
		let channel_id = ch.id.clone();
		if ch.families.is_empty() {
			st.channels.remove(channel);
		}

		debug!(%channel, %family, "pubsub unlisten");
		if let Some(topic) = st.build_topic(family, channel_id.as_deref()) {
			self.pool.remove_topic(&topic, &st.token);
		}
	}

	fn handle_mod_action(&self, action: &ModeratorActionData) {
		let Some(local_id) = self.state.lock().local_id.clone() else {
			return;
		};
		if !action.is_unmod_of(&local_id) {
			return;
		}

		let channel = action
			.channel
			.clone()
			.or_else(|| self.names.name(&action.channel_id))
			.unwrap_or_else(|| action.channel_id.clone());
		let mod_only: Vec<TopicFamily> = {
			let st = self.state.lock();
			st.channels
				.get(&channel)
				.map(|c| c.families.iter().copied().filter(|f| f.requires_moderator()).collect())
				.unwrap_or_default()
		};
		if mod_only.is_empty() {
			return;
		}

		info!(%channel, families = mod_only.len(), "unmodded; dropping moderator topics");
		for family in mod_only {
			self.unlisten(family, &channel);
		}
		self.listener
			.on_info(format!("PubSub: unmodded in #{channel}, stopped moderator topics"));
	}
}
