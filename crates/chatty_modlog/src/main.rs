#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chatty_pubsub::{ChannelListener, EventPayload, HelixChannelIdResolver, ListenerEvent, MessageData, ModLog};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const STATUS_INTERVAL: Duration = Duration::from_secs(300);

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatty_modlog [--config path] [--channel name]...\n\
\n\
Options:\n\
\t--config    Config file (default: ~/.chatty/modlog.toml)\n\
\t--channel   Channel to follow; repeatable, added to the configured channels\n\
\t--help      Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	config_path: Option<PathBuf>,
	channels: Vec<String>,
}

fn parse_args() -> Args {
	let mut args = Args {
		config_path: None,
		channels: Vec::new(),
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config_path = Some(PathBuf::from(v));
			}
			"--channel" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--channel must be non-empty");
					usage_and_exit();
				}
				args.channels.push(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter =
		std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatty_pubsub=debug,chatty_modlog=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn log_event(event: &MessageData) {
	match &event.payload {
		EventPayload::Generic => debug!(topic = %event.topic, message = %event.message, "pubsub event"),
		_ => info!(topic = %event.topic, "{event}"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(p) => p,
		None => crate::config::default_config_path()?,
	};
	let mut cfg = crate::config::load_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded modlog config (toml + env overrides)");
	for channel in args.channels {
		let channel = channel.trim().trim_start_matches('#').to_ascii_lowercase();
		if !cfg.channels.contains(&channel) {
			cfg.channels.push(channel);
		}
	}

	init_metrics(cfg.metrics_bind.as_deref());

	let token = cfg
		.twitch
		.user_access_token
		.clone()
		.context("no user access token (set twitch.user_access_token or CHATTY_PUBSUB_TOKEN)")?;
	let client_id = cfg
		.twitch
		.client_id
		.clone()
		.context("no client id (set twitch.client_id or CHATTY_TWITCH_CLIENT_ID)")?;
	let username = cfg
		.twitch
		.username
		.clone()
		.context("no username (set twitch.username or CHATTY_PUBSUB_USERNAME)")?;
	if cfg.channels.is_empty() {
		warn!("no channels configured; only the connection will be maintained");
	}

	let resolver = match cfg.twitch.helix_base_url.as_deref() {
		Some(base) => HelixChannelIdResolver::with_base_url(base, client_id, token.clone())?,
		None => HelixChannelIdResolver::new(client_id, token.clone())?,
	};

	let (listener, mut events) = ChannelListener::new(1024);
	let modlog = ModLog::new(cfg.pubsub_config(), Arc::new(resolver), Arc::new(listener))?;

	modlog.set_local_username(&username);
	for channel in &cfg.channels {
		for family in &cfg.families {
			modlog.listen(*family, channel, &token);
		}
	}
	info!(
		channels = cfg.channels.len(),
		families = cfg.families.len(),
		%username,
		"chatty_modlog started"
	);

	let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
	status_tick.tick().await;

	loop {
		tokio::select! {
			ev = events.recv() => {
				match ev {
					Some(ListenerEvent::Event(event)) => log_event(&event),
					Some(ListenerEvent::Info(line)) => info!("{line}"),
					None => break,
				}
			}
			_ = status_tick.tick() => {
				for line in modlog.status() {
					debug!("{line}");
				}
				modlog.check_connection();
			}
			res = tokio::signal::ctrl_c() => {
				if let Err(e) = res {
					warn!(error = %e, "failed to listen for ctrl-c");
				}
				info!("shutting down");
				break;
			}
		}
	}

	modlog.disconnect();
	Ok(())
}
