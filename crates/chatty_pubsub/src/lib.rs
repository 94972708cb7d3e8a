#![forbid(unsafe_code)]

pub mod decode;
pub mod envelope;
pub mod modlog;
pub mod pool;
pub mod resolver;
mod shard;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

pub use chatty_domain::{ParseTopicError, Topic, TopicFamily};
pub use decode::{AutomodStatus, EventPayload, MessageData, ModActionKind, ModeratorActionData, decode_data};
pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, decode_envelope};
pub use modlog::ModLog;
pub use pool::ShardPool;
pub use resolver::{ChannelIdCache, ChannelIdResolver, HelixChannelIdResolver};
pub use shard::{BoxFuture, WsConnection, WsConnector, WsSink, WsSource};

/// Default PubSub edge endpoint.
pub const DEFAULT_SERVER_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Receives everything the PubSub layer produces.
///
/// Callbacks run on shard tasks and may run while `ModLog` state is locked;
/// implementations must not block or call back into the pool or `ModLog`.
pub trait PubSubListener: Send + Sync + 'static {
	/// A decoded `MESSAGE` frame.
	fn on_event(&self, event: MessageData);

	/// Human-readable status line (connects, errors, subscription changes).
	fn on_info(&self, info: String);
}

/// Listener output when forwarded over a channel.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
	Event(Box<MessageData>),
	Info(String),
}

/// Listener that forwards into a bounded channel, dropping when full.
#[derive(Debug, Clone)]
pub struct ChannelListener {
	tx: mpsc::Sender<ListenerEvent>,
}

impl ChannelListener {
	pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ListenerEvent>) {
		let (tx, rx) = mpsc::channel(capacity);
		(Self { tx }, rx)
	}
}

impl PubSubListener for ChannelListener {
	fn on_event(&self, event: MessageData) {
		if self.tx.try_send(ListenerEvent::Event(Box::new(event))).is_err() {
			metrics::counter!("chatty_pubsub_listener_dropped_total").increment(1);
		}
	}

	fn on_info(&self, info: String) {
		if self.tx.try_send(ListenerEvent::Info(info)).is_err() {
			metrics::counter!("chatty_pubsub_listener_dropped_total").increment(1);
		}
	}
}

/// PubSub connection pool configuration.
#[derive(Clone)]
pub struct PubSubConfig {
	pub server_url: String,
	pub max_shards: usize,
	pub max_topics_per_shard: usize,
	/// Base keepalive interval; a random jitter of up to `ping_jitter` is added.
	pub ping_interval: Duration,
	pub ping_jitter: Duration,
	/// Delay between a PING and the liveness check.
	pub pong_timeout: Duration,
	/// A connection is considered alive if anything arrived within this window.
	pub liveness_window: Duration,
	/// Sliding window used to count involuntary disconnects.
	pub disconnect_window: Duration,
	pub ws_connector: Option<WsConnector>,
}

impl PubSubConfig {
	pub fn new() -> Self {
		Self {
			server_url: DEFAULT_SERVER_URL.to_string(),
			max_shards: 6,
			max_topics_per_shard: 49,
			ping_interval: Duration::from_secs(280),
			ping_jitter: Duration::from_secs(5),
			pong_timeout: Duration::from_secs(10),
			liveness_window: Duration::from_secs(15),
			disconnect_window: Duration::from_secs(60 * 60),
			ws_connector: None,
		}
	}
}

impl Default for PubSubConfig {
	fn default() -> Self {
		Self::new()
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Generate an opaque connection id for log correlation.
pub(crate) fn new_session_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
