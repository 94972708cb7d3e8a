#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::resolver::ChannelIdCache;
use crate::shard::{Shard, ShardContext};
use crate::{PubSubConfig, PubSubListener, SecretString, Topic};

/// Multiplexes topics over up to `max_shards` connections.
///
/// Operations never wait on the network; they must run inside a Tokio runtime
/// because new shards spawn their connection task.
pub struct ShardPool {
	ctx: Arc<ShardContext>,
	inner: Mutex<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
	shards: BTreeMap<u64, Shard>,
	/// Topic -> owning shard id. Always agrees with the shards' own topic sets.
	topic_index: HashMap<Topic, u64>,
	next_id: u64,
}

impl PoolInner {
	fn record_shard_gauge(&self) {
		metrics::gauge!("chatty_pubsub_shards").set(self.shards.len() as f64);
	}
}

impl ShardPool {
	pub fn new(config: PubSubConfig, listener: Arc<dyn PubSubListener>, names: ChannelIdCache) -> anyhow::Result<Self> {
		let ctx = ShardContext::new(config, listener, names)?;
		Ok(Self {
			ctx: Arc::new(ctx),
			inner: Mutex::new(PoolInner {
				next_id: 1,
				..PoolInner::default()
			}),
		})
	}

	pub fn names(&self) -> &ChannelIdCache {
		&self.ctx.names
	}

	/// Subscribe `topic` on the first shard with room, creating a shard if needed.
	///
	/// Returns `false` when every shard is full and the shard cap is reached.
	pub fn add_topic(&self, topic: &Topic, token: &SecretString) -> bool {
		let exhausted = {
			let mut inner = self.inner.lock();
			if inner.topic_index.contains_key(topic) {
				return true;
			}

			let existing = inner.shards.values().find(|s| s.has_room() && s.add_topic(topic, token));
			if let Some(shard) = existing {
				// Reopens a shard closed by `disconnect`; no-op while its task runs.
				shard.open();
				let id = shard.id();
				debug!(shard_id = id, %topic, "topic added to existing shard");
				inner.topic_index.insert(topic.clone(), id);
				return true;
			}

			if inner.shards.len() < self.ctx.config.max_shards {
				let id = inner.next_id;
				inner.next_id += 1;

				let shard = Shard::new(id, self.ctx.clone(), token.clone());
				if shard.add_topic(topic, token) {
					shard.open();
					inner.shards.insert(id, shard);
					inner.topic_index.insert(topic.clone(), id);
					inner.record_shard_gauge();
					info!(shard_id = id, shards = inner.shards.len(), %topic, "created pubsub shard");
					return true;
				}
			}

			inner.topic_index.len()
		};

		warn!(%topic, subscribed = exhausted, "pubsub capacity exhausted");
		self.ctx
			.listener
			.on_info(format!("PubSub: no capacity left for {topic} ({exhausted} topics subscribed)"));
		false
	}

	/// Unsubscribe `topic`; a shard left without topics is closed and dropped.
	pub fn remove_topic(&self, topic: &Topic, token: &SecretString) -> bool {
		let mut inner = self.inner.lock();
		let Some(id) = inner.topic_index.remove(topic) else {
			return false;
		};

		let emptied = match inner.shards.get(&id) {
			Some(shard) => {
				shard.remove_topic(topic, token);
				shard.is_empty()
			}
			None => false,
		};

		if emptied && let Some(shard) = inner.shards.remove(&id) {
			shard.disconnect();
			inner.record_shard_gauge();
			info!(shard_id = id, shards = inner.shards.len(), "removed empty pubsub shard");
		}
		debug!(shard_id = id, %topic, "topic removed");
		true
	}

	/// Store a new token on every shard and reconnect so it is presented again.
	pub fn update_token(&self, token: &SecretString) {
		let inner = self.inner.lock();
		for shard in inner.shards.values() {
			shard.set_token(token);
			shard.force_reconnect();
		}
		info!(shards = inner.shards.len(), "pubsub token updated");
	}

	pub fn has_topic(&self, topic: &Topic) -> bool {
		self.inner.lock().topic_index.contains_key(topic)
	}

	pub fn num_topics(&self) -> usize {
		self.inner.lock().topic_index.len()
	}

	/// `(shard id, topic count)` for every shard, ordered by id.
	pub fn shard_topic_counts(&self) -> Vec<(u64, usize)> {
		self.inner
			.lock()
			.shards
			.values()
			.map(|s| (s.id(), s.num_topics()))
			.collect()
	}

	pub fn num_shards(&self) -> usize {
		self.inner.lock().shards.len()
	}

	/// True when every shard has an open connection (vacuously true with no shards).
	pub fn is_connected(&self) -> bool {
		self.inner.lock().shards.values().all(Shard::is_connected)
	}

	/// Close all shards. Topics stay assigned for a later `reconnect`.
	pub fn disconnect(&self) {
		for shard in self.inner.lock().shards.values() {
			shard.disconnect();
		}
	}

	pub fn reconnect(&self) {
		for shard in self.inner.lock().shards.values() {
			shard.force_reconnect();
		}
	}

	pub fn send_ping(&self) {
		for shard in self.inner.lock().shards.values() {
			shard.send_ping();
		}
	}

	/// Diagnostic line per shard.
	pub fn status(&self) -> Vec<String> {
		self.inner.lock().shards.values().map(Shard::summary).collect()
	}
}

impl Drop for ShardPool {
	fn drop(&mut self) {
		let inner = self.inner.get_mut();
		inner.topic_index.clear();
		inner.shards.clear();
		inner.record_shard_gauge();
	}
}
