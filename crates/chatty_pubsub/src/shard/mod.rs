#![forbid(unsafe_code)]

mod backoff;
mod transport;


use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use tungstenite::Message;
use url::Url;

use crate::envelope::{EnvelopeKind, decode_envelope, encode_listen, encode_ping, encode_unlisten};
use crate::resolver::ChannelIdCache;
use crate::{PubSubConfig, PubSubListener, SecretString, Topic};

pub(crate) use backoff::{DisconnectWindow, reconnect_delay};
pub use transport::{BoxFuture, WsConnection, WsConnector, WsSink, WsSource};

/// Everything a shard task needs besides its own state.
pub(crate) struct ShardContext {
	pub(crate) config: PubSubConfig,
	pub(crate) listener: Arc<dyn PubSubListener>,
	pub(crate) names: ChannelIdCache,
	pub(crate) url: Url,
	pub(crate) connector: WsConnector,
}

impl ShardContext {
	pub(crate) fn new(config: PubSubConfig, listener: Arc<dyn PubSubListener>, names: ChannelIdCache) -> anyhow::Result<Self> {
		let url = Url::parse(&config.server_url).with_context(|| format!("parse pubsub url {}", config.server_url))?;
		let connector = config.ws_connector.clone().unwrap_or_else(transport::default_connector);
		Ok(Self {
			config,
			listener,
			names,
			url,
			connector,
		})
	}

	fn ping_delay(&self) -> Duration {
		let jitter_ms = u64::try_from(self.config.ping_jitter.as_millis()).unwrap_or(u64::MAX);
		let jitter = if jitter_ms == 0 {
			0
		} else {
			rand::rng().random_range(0..=jitter_ms)
		};
		self.config.ping_interval + Duration::from_millis(jitter)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShardStatus {
	Disconnected,
	Connecting,
	Connected,
}

impl fmt::Display for ShardStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
		})
	}
}

#[derive(Debug)]
enum ShardCommand {
	/// Text frame for the connection with the given generation; dropped if that connection is gone.
	Send { text: String, generation: u64 },
	Ping,
	Reconnect,
	Disconnect,
}

struct ShardState {
	topics: BTreeSet<Topic>,
	token: SecretString,
	status: ShardStatus,
	/// Bumped on every successful open.
	generation: u64,
	explicit_disconnect: bool,
	last_received: Option<Instant>,
	attempts: u32,
	disconnects: DisconnectWindow,
	commands: Option<mpsc::UnboundedSender<ShardCommand>>,
	/// Identifies the current task; stale tasks stop touching state.
	epoch: u64,
}

impl ShardState {
	fn enqueue(&self, cmd: ShardCommand) {
		if let Some(tx) = &self.commands {
			let _ = tx.send(cmd);
		}
	}
}

/// One persistent PubSub connection carrying a bounded set of topics.
pub(crate) struct Shard {
	id: u64,
	ctx: Arc<ShardContext>,
	state: Arc<Mutex<ShardState>>,
}

impl Shard {
	pub(crate) fn new(id: u64, ctx: Arc<ShardContext>, token: SecretString) -> Self {
		let disconnect_window = ctx.config.disconnect_window;
		Self {
			id,
			ctx,
			state: Arc::new(Mutex::new(ShardState {
				topics: BTreeSet::new(),
				token,
				status: ShardStatus::Disconnected,
				generation: 0,
				explicit_disconnect: false,
				last_received: None,
				attempts: 0,
				disconnects: DisconnectWindow::new(disconnect_window),
				commands: None,
				epoch: 0,
			})),
		}
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	/// Start connecting unless a connection task is already running.
	pub(crate) fn open(&self) {
		let (epoch, rx) = {
			let mut st = self.state.lock();
			if st.commands.is_some() {
				return;
			}
			let (tx, rx) = mpsc::unbounded_channel();
			st.commands = Some(tx);
			st.explicit_disconnect = false;
			st.status = ShardStatus::Connecting;
			st.epoch += 1;
			(st.epoch, rx)
		};

		debug!(shard_id = self.id, epoch, "opening shard");
		let task = ShardTask {
			id: self.id,
			epoch,
			ctx: self.ctx.clone(),
			state: self.state.clone(),
		};
		tokio::spawn(task.run(rx));
	}

	/// Returns `false` only when the shard is full.
	pub(crate) fn add_topic(&self, topic: &Topic, token: &SecretString) -> bool {
		let mut st = self.state.lock();
		if st.topics.contains(topic) {
			return true;
		}
		if st.topics.len() >= self.ctx.config.max_topics_per_shard {
			return false;
		}

		st.topics.insert(topic.clone());
		st.token = token.clone();
		if st.status == ShardStatus::Connected {
			match encode_listen([topic.as_str()], token.expose()) {
				Ok(text) => st.enqueue(ShardCommand::Send {
					text,
					generation: st.generation,
				}),
				Err(e) => warn!(shard_id = self.id, %topic, error = %e, "failed to encode LISTEN"),
			}
		}
		true
	}

	/// Returns `false` if the topic was not on this shard.
	pub(crate) fn remove_topic(&self, topic: &Topic, token: &SecretString) -> bool {
		let mut st = self.state.lock();
		if !st.topics.remove(topic) {
			return false;
		}

		if st.status == ShardStatus::Connected {
			match encode_unlisten([topic.as_str()], token.expose()) {
				Ok(text) => st.enqueue(ShardCommand::Send {
					text,
					generation: st.generation,
				}),
				Err(e) => warn!(shard_id = self.id, %topic, error = %e, "failed to encode UNLISTEN"),
			}
		}
		true
	}

	pub(crate) fn set_token(&self, token: &SecretString) {
		self.state.lock().token = token.clone();
	}

	/// Close without reconnecting.
	pub(crate) fn disconnect(&self) {
		let tx = {
			let mut st = self.state.lock();
			st.explicit_disconnect = true;
			st.status = ShardStatus::Disconnected;
			st.commands.take()
		};
		if let Some(tx) = tx {
			debug!(shard_id = self.id, "disconnecting shard");
			let _ = tx.send(ShardCommand::Disconnect);
		}
	}

	/// Close and let the reconnect path take over.
	pub(crate) fn force_reconnect(&self) {
		let running = {
			let st = self.state.lock();
			st.enqueue(ShardCommand::Reconnect);
			st.commands.is_some()
		};
		if !running {
			self.open();
		}
	}

	pub(crate) fn send_ping(&self) {
		let st = self.state.lock();
		if st.status == ShardStatus::Connected {
			st.enqueue(ShardCommand::Ping);
		}
	}

	pub(crate) fn num_topics(&self) -> usize {
		self.state.lock().topics.len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.num_topics() == 0
	}

	pub(crate) fn has_room(&self) -> bool {
		self.num_topics() < self.ctx.config.max_topics_per_shard
	}

	pub(crate) fn status(&self) -> ShardStatus {
		self.state.lock().status
	}

	pub(crate) fn is_connected(&self) -> bool {
		self.status() == ShardStatus::Connected
	}

	/// One-line state summary for diagnostics.
	pub(crate) fn summary(&self) -> String {
		let mut st = self.state.lock();
		let now = Instant::now();
		let disconnects = st.disconnects.count(now);
		let last = st
			.last_received
			.map(|t| format!("{}s ago", now.saturating_duration_since(t).as_secs()))
			.unwrap_or_else(|| "never".to_string());
		format!(
			"shard {}: {}, {} topics, last message {last}, attempts {}, disconnects/h {disconnects}",
			self.id,
			st.status,
			st.topics.len(),
			st.attempts
		)
	}
}

impl Drop for Shard {
	fn drop(&mut self) {
		self.disconnect();
	}
}

/// How a live connection ended.
enum ConnectionEnd {
	/// Explicit disconnect or the handle went away; do not reconnect.
	Stopped,
	Lost(&'static str),
}

enum FrameAction {
	Continue,
	Reconnect,
}

struct ShardTask {
	id: u64,
	epoch: u64,
	ctx: Arc<ShardContext>,
	state: Arc<Mutex<ShardState>>,
}

impl ShardTask {
	/// Apply `f` if this task is still the shard's current one.
	fn update<R>(&self, f: impl FnOnce(&mut ShardState) -> R) -> Option<R> {
		let mut st = self.state.lock();
		(st.epoch == self.epoch).then(|| f(&mut st))
	}

	fn should_stop(&self) -> bool {
		let st = self.state.lock();
		st.epoch != self.epoch || st.explicit_disconnect
	}

	fn info(&self, line: String) {
		self.ctx.listener.on_info(line);
	}

	async fn run(self, mut commands: mpsc::UnboundedReceiver<ShardCommand>) {
		let mut delay = Duration::ZERO;

		loop {
			if !delay.is_zero() && !self.wait_backoff(delay, &mut commands).await {
				break;
			}
			if self.should_stop() {
				break;
			}

			self.update(|st| st.status = ShardStatus::Connecting);
			debug!(shard_id = self.id, url = %self.ctx.url, "connecting");

			let mut connect = (self.ctx.connector)(self.ctx.url.clone());
			let result = loop {
				tokio::select! {
					res = &mut connect => break Some(res),
					cmd = commands.recv() => match cmd {
						None | Some(ShardCommand::Disconnect) => break None,
						Some(_) => {}
					},
				}
			};
			let Some(result) = result else {
				break;
			};

			let reason = match result {
				Ok(conn) => match self.run_connection(conn, &mut commands).await {
					ConnectionEnd::Stopped => break,
					ConnectionEnd::Lost(reason) => {
						self.update(|st| st.disconnects.record(Instant::now()));
						reason
					}
				},
				Err(e) => {
					warn!(shard_id = self.id, error = %format!("{e:#}"), "pubsub connect failed");
					"connect failed"
				}
			};

			if self.should_stop() {
				break;
			}
			let Some((attempts, disconnects)) = self.update(|st| {
				st.status = ShardStatus::Disconnected;
				st.attempts = st.attempts.saturating_add(1);
				(st.attempts, st.disconnects.count(Instant::now()))
			}) else {
				break;
			};

			delay = reconnect_delay(attempts, disconnects);
			metrics::counter!("chatty_pubsub_reconnects_total").increment(1);
			info!(
				shard_id = self.id,
				attempt = attempts,
				disconnects,
				delay_secs = delay.as_secs(),
				reason,
				"pubsub shard reconnecting"
			);
			self.info(format!(
				"PubSub {}: {reason}, reconnecting in {}s (attempt {attempts})",
				self.id,
				delay.as_secs()
			));
		}

		self.update(|st| {
			st.status = ShardStatus::Disconnected;
			st.commands = None;
		});
		debug!(shard_id = self.id, epoch = self.epoch, "shard task stopped");
	}

	/// Returns `false` if the shard was told to stop while waiting.
	async fn wait_backoff(&self, delay: Duration, commands: &mut mpsc::UnboundedReceiver<ShardCommand>) -> bool {
		let wake = Instant::now() + delay;
		loop {
			tokio::select! {
				_ = sleep_until(wake) => return true,
				cmd = commands.recv() => match cmd {
					None | Some(ShardCommand::Disconnect) => return false,
					Some(ShardCommand::Reconnect) => return true,
					Some(_) => {}
				},
			}
		}
	}

	async fn run_connection(
		&self,
		conn: WsConnection,
		commands: &mut mpsc::UnboundedReceiver<ShardCommand>,
	) -> ConnectionEnd {
		let WsConnection { mut sink, mut source } = conn;

		let opened = self.update(|st| {
			let now = Instant::now();
			st.status = ShardStatus::Connected;
			st.generation += 1;
			st.attempts = 0;
			st.last_received = Some(now);
			(st.generation, st.topics.iter().cloned().collect::<Vec<_>>(), st.token.clone())
		});
		let Some((generation, topics, token)) = opened else {
			return ConnectionEnd::Stopped;
		};

		let session_id = crate::new_session_id();
		info!(shard_id = self.id, %session_id, topics = topics.len(), "pubsub shard connected");
		self.info(format!("PubSub {}: connected ({} topics)", self.id, topics.len()));

		if !topics.is_empty() {
			match encode_listen(topics.iter().map(Topic::as_str), token.expose()) {
				Ok(text) => {
					if let Err(e) = sink.send(Message::Text(text.into())).await {
						warn!(shard_id = self.id, error = %e, "failed to send LISTEN");
						return ConnectionEnd::Lost("send failed");
					}
				}
				Err(e) => warn!(shard_id = self.id, error = %e, "failed to encode LISTEN"),
			}
		}

		let mut last_received = Instant::now();
		let mut next_ping = Instant::now() + self.ctx.ping_delay();
		let mut liveness_check: Option<Instant> = None;

		let end = loop {
			tokio::select! {
				cmd = commands.recv() => match cmd {
					None | Some(ShardCommand::Disconnect) => {
						let _ = sink.close().await;
						break ConnectionEnd::Stopped;
					}
					Some(ShardCommand::Send { text, generation: g }) => {
						if g != generation {
							debug!(shard_id = self.id, "dropping frame for a previous connection");
							continue;
						}
						if let Err(e) = sink.send(Message::Text(text.into())).await {
							warn!(shard_id = self.id, error = %e, "pubsub send failed");
							break ConnectionEnd::Lost("send failed");
						}
					}
					Some(ShardCommand::Ping) => {
						if let Err(e) = sink.send(Message::Text(encode_ping().into())).await {
							warn!(shard_id = self.id, error = %e, "pubsub ping failed");
							break ConnectionEnd::Lost("send failed");
						}
						liveness_check = Some(Instant::now() + self.ctx.config.pong_timeout);
					}
					Some(ShardCommand::Reconnect) => {
						let _ = sink.close().await;
						break ConnectionEnd::Lost("reconnect requested");
					}
				},

				frame = source.next() => {
					let msg = match frame {
						None => break ConnectionEnd::Lost("connection closed"),
						Some(Err(e)) => {
							warn!(shard_id = self.id, error = %e, "pubsub read error");
							break ConnectionEnd::Lost("read error");
						}
						Some(Ok(msg)) => msg,
					};

					last_received = Instant::now();
					self.update(|st| st.last_received = Some(last_received));

					match msg {
						Message::Text(text) => {
							if let FrameAction::Reconnect = self.handle_text(text.as_str()) {
								let _ = sink.close().await;
								break ConnectionEnd::Lost("server requested reconnect");
							}
						}
						Message::Ping(payload) => {
							if let Err(e) = sink.send(Message::Pong(payload)).await {
								warn!(shard_id = self.id, error = %e, "pubsub pong failed");
								break ConnectionEnd::Lost("send failed");
							}
						}
						Message::Close(frame) => {
							debug!(shard_id = self.id, ?frame, "pubsub close frame");
							break ConnectionEnd::Lost("connection closed");
						}
						_ => {}
					}
				},

				_ = sleep_until(next_ping) => {
					debug!(shard_id = self.id, "sending PING");
					if let Err(e) = sink.send(Message::Text(encode_ping().into())).await {
						warn!(shard_id = self.id, error = %e, "pubsub ping failed");
						break ConnectionEnd::Lost("send failed");
					}
					let now = Instant::now();
					liveness_check = Some(now + self.ctx.config.pong_timeout);
					next_ping = now + self.ctx.ping_delay();
				},

				_ = sleep_until(liveness_check.unwrap_or(next_ping)), if liveness_check.is_some() => {
					liveness_check = None;
					let silent_for = Instant::now().saturating_duration_since(last_received);
					if silent_for > self.ctx.config.liveness_window {
						warn!(shard_id = self.id, silent_secs = silent_for.as_secs(), "no pubsub traffic after PING");
						self.info(format!("PubSub {}: no response to PING, reconnecting", self.id));
						let _ = sink.close().await;
						break ConnectionEnd::Lost("ping timeout");
					}
				},
			}
		};

		if let ConnectionEnd::Lost(reason) = &end {
			info!(shard_id = self.id, %session_id, reason, "pubsub shard disconnected");
		}
		end
	}

	fn handle_text(&self, text: &str) -> FrameAction {
		metrics::counter!("chatty_pubsub_frames_total").increment(1);

		let env = match decode_envelope(text, &self.ctx.names) {
			Ok(env) => env,
			Err(e) => {
				warn!(shard_id = self.id, error = %e, "dropping malformed pubsub frame");
				return FrameAction::Continue;
			}
		};

		match env.kind() {
			EnvelopeKind::Message => match env.data {
				Some(data) => self.ctx.listener.on_event(data),
				None => debug!(shard_id = self.id, "MESSAGE without topic/message"),
			},
			EnvelopeKind::Response => {
				if let Some(err) = env.error() {
					metrics::counter!("chatty_pubsub_listen_errors_total").increment(1);
					warn!(shard_id = self.id, error = %err, nonce = ?env.nonce, "pubsub LISTEN/UNLISTEN rejected");
					self.info(format!("PubSub {}: error: {err}", self.id));
					if err == "ERR_BADAUTH" {
						self.info(format!(
							"PubSub {}: token was rejected; refresh the token to resume",
							self.id
						));
					}
				} else {
					debug!(shard_id = self.id, nonce = ?env.nonce, "pubsub RESPONSE ok");
				}
			}
			EnvelopeKind::Pong => debug!(shard_id = self.id, "PONG"),
			EnvelopeKind::Reconnect => {
				info!(shard_id = self.id, "server requested reconnect");
				self.info(format!("PubSub {}: server requested reconnect", self.id));
				return FrameAction::Reconnect;
			}
			EnvelopeKind::Other => debug!(shard_id = self.id, kind = %env.kind, "ignoring pubsub frame"),
		}
		FrameAction::Continue
	}
}
