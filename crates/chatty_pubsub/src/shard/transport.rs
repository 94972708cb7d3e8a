#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{Sink, Stream, StreamExt};
use tungstenite::{Error as WsError, Message};
use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type WsSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Opens a transport connection for a shard.
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<WsConnection>> + Send + Sync>;

/// An open WebSocket, split into its write and read halves.
pub struct WsConnection {
	pub sink: WsSink,
	pub source: WsSource,
}

impl WsConnection {
	pub fn new<S, R>(sink: S, source: R) -> Self
	where
		S: Sink<Message, Error = WsError> + Send + 'static,
		R: Stream<Item = Result<Message, WsError>> + Send + 'static,
	{
		Self {
			sink: Box::pin(sink),
			source: Box::pin(source),
		}
	}
}

async fn connect_pubsub_ws(url: Url) -> anyhow::Result<WsConnection> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to pubsub ws")?;
	let (sink, source) = ws.split();
	Ok(WsConnection::new(sink, source))
}

pub(crate) fn default_connector() -> WsConnector {
	Arc::new(|url: Url| Box::pin(connect_pubsub_ws(url)) as BoxFuture<'static, anyhow::Result<WsConnection>>)
}
