#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chatty_pubsub::{PubSubConfig, SecretString, TopicFamily};
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.chatty/modlog.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatty").join("modlog.toml"))
}

/// Load the config from TOML, then apply env overrides.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<ModLogConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ModLogConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ModLogConfig {
	pub pubsub: PubSubSettings,
	pub twitch: TwitchSettings,
	/// Channel logins to follow.
	pub channels: Vec<String>,
	/// Topic families subscribed for every channel.
	pub families: Vec<TopicFamily>,
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PubSubSettings {
	pub server_url: Option<String>,
	pub max_shards: Option<usize>,
	pub max_topics_per_shard: Option<usize>,
	pub ping_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct TwitchSettings {
	/// Twitch App Client ID, sent with Helix lookups.
	pub client_id: Option<String>,
	/// User access token: PubSub `auth_token` and Helix bearer.
	pub user_access_token: Option<SecretString>,
	/// Login of the account the token belongs to.
	pub username: Option<String>,
	/// Helix base URL override.
	pub helix_base_url: Option<String>,
}

impl ModLogConfig {
	fn from_file(file: FileConfig) -> Self {
		let families = if file.families.is_empty() {
			vec![TopicFamily::ModeratorActions]
		} else {
			file.families
		};

		Self {
			pubsub: PubSubSettings {
				server_url: file.pubsub.server_url.filter(|s| !s.trim().is_empty()),
				max_shards: file.pubsub.max_shards.filter(|v| *v > 0),
				max_topics_per_shard: file.pubsub.max_topics_per_shard.filter(|v| *v > 0),
				ping_interval: file.pubsub.ping_interval_secs.filter(|v| *v > 0).map(Duration::from_secs),
			},
			twitch: TwitchSettings {
				client_id: file.twitch.client_id.filter(|s| !s.trim().is_empty()),
				user_access_token: file
					.twitch
					.user_access_token
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				username: file.twitch.username.filter(|s| !s.trim().is_empty()),
				helix_base_url: file.twitch.helix_base_url.filter(|s| !s.trim().is_empty()),
			},
			channels: normalize_channels(file.channels),
			families,
			metrics_bind: file.metrics_bind.filter(|s| !s.trim().is_empty()),
		}
	}

	/// Library config with file/env overrides applied over the defaults.
	pub fn pubsub_config(&self) -> PubSubConfig {
		let mut cfg = PubSubConfig::new();
		if let Some(url) = &self.pubsub.server_url {
			cfg.server_url = url.clone();
		}
		if let Some(n) = self.pubsub.max_shards {
			cfg.max_shards = n;
		}
		if let Some(n) = self.pubsub.max_topics_per_shard {
			cfg.max_topics_per_shard = n;
		}
		if let Some(d) = self.pubsub.ping_interval {
			cfg.ping_interval = d;
		}
		cfg
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	pubsub: FilePubSubSettings,

	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	channels: Vec<String>,

	#[serde(default)]
	families: Vec<TopicFamily>,

	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePubSubSettings {
	server_url: Option<String>,
	max_shards: Option<usize>,
	max_topics_per_shard: Option<usize>,
	ping_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	client_id: Option<String>,
	user_access_token: Option<String>,
	username: Option<String>,
	helix_base_url: Option<String>,
}

fn normalize_channels(channels: impl IntoIterator<Item = String>) -> Vec<String> {
	let mut out: Vec<String> = Vec::new();
	for c in channels {
		let c = c.trim().trim_start_matches('#').to_ascii_lowercase();
		if !c.is_empty() && !out.contains(&c) {
			out.push(c);
		}
	}
	out
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ModLogConfig) {
	if let Ok(v) = std::env::var("CHATTY_PUBSUB_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.pubsub.server_url = Some(v);
			info!("pubsub config: server_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CHATTY_PUBSUB_TOKEN") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.twitch.user_access_token = Some(SecretString::new(v));
			info!("twitch config: user_access_token overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CHATTY_PUBSUB_USERNAME") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.twitch.username = Some(v);
			info!("twitch config: username overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CHATTY_TWITCH_CLIENT_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.twitch.client_id = Some(v);
			info!("twitch config: client_id overridden by env");
		}
	}

	if let Ok(v) = std::env::var("CHATTY_PUBSUB_CHANNELS") {
		let channels = normalize_channels(v.split(',').map(str::to_string));
		if !channels.is_empty() {
			info!(count = channels.len(), "pubsub config: channels overridden by env");
			cfg.channels = channels;
		}
	}

	if let Ok(v) = std::env::var("CHATTY_PUBSUB_FAMILIES") {
		let mut families = Vec::new();
		for raw in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
			match raw.parse::<TopicFamily>() {
				Ok(f) if !families.contains(&f) => families.push(f),
				Ok(_) => {}
				Err(e) => warn!(value = %raw, error = %e, "pubsub config: ignoring unknown topic family"),
			}
		}
		if !families.is_empty() {
			info!(count = families.len(), "pubsub config: families overridden by env");
			cfg.families = families;
		}
	}

	if let Ok(v) = std::env::var("CHATTY_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.metrics_bind = Some(v);
			info!("modlog config: metrics_bind overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(toml_src: &str) -> ModLogConfig {
		let file: FileConfig = toml::from_str(toml_src).expect("valid toml");
		ModLogConfig::from_file(file)
	}

	#[test]
	fn empty_file_uses_library_defaults() {
		let cfg = parse("");
		assert_eq!(cfg.families, vec![TopicFamily::ModeratorActions]);
		assert!(cfg.channels.is_empty());

		let pubsub = cfg.pubsub_config();
		assert_eq!(pubsub.server_url, chatty_pubsub::DEFAULT_SERVER_URL);
		assert_eq!(pubsub.max_shards, 6);
		assert_eq!(pubsub.max_topics_per_shard, 49);
	}

	#[test]
	fn file_values_are_cleaned_up() {
		let cfg = parse(
			r##"
channels = ["#SomeChannel", "somechannel", " ", "other"]
families = ["moderator_actions", "low_trust_users"]
metrics_bind = ""

[pubsub]
server_url = "ws://127.0.0.1:9000"
max_shards = 0
ping_interval_secs = 60

[twitch]
client_id = "cid"
user_access_token = "  "
username = "me"
"##,
		);

		assert_eq!(cfg.channels, vec!["somechannel", "other"]);
		assert_eq!(
			cfg.families,
			vec![TopicFamily::ModeratorActions, TopicFamily::LowTrustUsers]
		);
		assert_eq!(cfg.metrics_bind, None);
		assert_eq!(cfg.twitch.user_access_token, None);
		assert_eq!(cfg.twitch.client_id.as_deref(), Some("cid"));

		let pubsub = cfg.pubsub_config();
		assert_eq!(pubsub.server_url, "ws://127.0.0.1:9000");
		assert_eq!(pubsub.max_shards, 6);
		assert_eq!(pubsub.ping_interval, Duration::from_secs(60));
	}
}
