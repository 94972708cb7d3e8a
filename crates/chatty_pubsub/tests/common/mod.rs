#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chatty_pubsub::{
	BoxFuture, ChannelIdResolver, MessageData, PubSubConfig, PubSubListener, WsConnection, WsConnector,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tungstenite::{Error as WsError, Message};
use url::Url;

#[derive(Default)]
pub struct RecordingListener {
	pub events: Mutex<Vec<MessageData>>,
	pub infos: Mutex<Vec<String>>,
}

impl RecordingListener {
	pub fn has_info(&self, needle: &str) -> bool {
		self.infos.lock().iter().any(|l| l.contains(needle))
	}
}

impl PubSubListener for RecordingListener {
	fn on_event(&self, event: MessageData) {
		self.events.lock().push(event);
	}

	fn on_info(&self, info: String) {
		self.infos.lock().push(info);
	}
}

pub struct FakeConn {
	pub from_client: mpsc::UnboundedReceiver<Message>,
	pub to_client: mpsc::UnboundedSender<Result<Message, WsError>>,
}

impl FakeConn {
	/// Text frames the client has sent so far.
	pub fn drain_text(&mut self) -> Vec<String> {
		let mut out = Vec::new();
		while let Ok(msg) = self.from_client.try_recv() {
			if let Message::Text(t) = msg {
				out.push(t.to_string());
			}
		}
		out
	}

	pub fn push_text(&self, text: &str) {
		self.to_client.send(Ok(Message::Text(text.into()))).unwrap();
	}
}

pub struct FakeServer {
	pub connects: Arc<AtomicUsize>,
	pub conns: mpsc::UnboundedReceiver<FakeConn>,
}

impl FakeServer {
	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn accepted(&mut self) -> Vec<FakeConn> {
		let mut out = Vec::new();
		while let Ok(conn) = self.conns.try_recv() {
			out.push(conn);
		}
		out
	}
}

/// In-memory transport; every connect succeeds.
pub fn fake_connector() -> (WsConnector, FakeServer) {
	let connects = Arc::new(AtomicUsize::new(0));
	let (conn_tx, conn_rx) = mpsc::unbounded_channel();

	let counter = connects.clone();
	let connector: WsConnector = Arc::new(move |_url: Url| {
		counter.fetch_add(1, Ordering::SeqCst);
		let conn_tx = conn_tx.clone();
		Box::pin(async move {
			let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
			let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Message, WsError>>();
			let sink = futures_util::sink::unfold(out_tx, |tx, msg: Message| async move {
				tx.send(msg).map_err(|_| WsError::ConnectionClosed)?;
				Ok::<_, WsError>(tx)
			});
			let source = futures_util::stream::unfold(in_rx, |mut rx| async move { rx.recv().await.map(|m| (m, rx)) });
			let _ = conn_tx.send(FakeConn {
				from_client: out_rx,
				to_client: in_tx,
			});
			Ok(WsConnection::new(sink, source))
		}) as BoxFuture<'static, anyhow::Result<WsConnection>>
	});

	(
		connector,
		FakeServer {
			connects,
			conns: conn_rx,
		},
	)
}

/// Transport whose connects never complete.
pub fn stalled_connector() -> WsConnector {
	Arc::new(|_url: Url| {
		Box::pin(futures_util::future::pending()) as BoxFuture<'static, anyhow::Result<WsConnection>>
	})
}

pub fn test_config(connector: WsConnector) -> PubSubConfig {
	let mut config = PubSubConfig::new();
	config.ping_jitter = Duration::ZERO;
	config.ws_connector = Some(connector);
	config
}

/// Resolver backed by a fixed login -> id table, answering after `delay`.
pub struct MapResolver {
	pub ids: HashMap<String, String>,
	pub delay: Duration,
	pub calls: AtomicUsize,
	/// Number of leading calls that fail with a lookup error.
	pub failures: AtomicUsize,
}

impl MapResolver {
	pub fn new(pairs: &[(&str, &str)]) -> Self {
		Self {
			ids: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
			delay: Duration::ZERO,
			calls: AtomicUsize::new(0),
			failures: AtomicUsize::new(0),
		}
	}

	pub fn from_pairs(pairs: &[(String, String)]) -> Self {
		let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
		Self::new(&borrowed)
	}

	pub fn with_failures(self, n: usize) -> Self {
		self.failures.store(n, Ordering::SeqCst);
		self
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}
}

#[async_trait::async_trait]
impl ChannelIdResolver for MapResolver {
	async fn resolve(&self, channel: &str) -> anyhow::Result<Option<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		let failing = self
			.failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			anyhow::bail!("helix returned 503 for {channel}");
		}
		Ok(self.ids.get(channel).cloned())
	}
}
