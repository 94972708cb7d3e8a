#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Reconnect delay: `attempts² + disconnects²` seconds.
///
/// Unbounded; both counters grow only while the connection keeps failing.
pub(crate) fn reconnect_delay(attempts: u32, disconnects: u32) -> Duration {
	let a = u64::from(attempts);
	let d = u64::from(disconnects);
	Duration::from_secs(a.saturating_mul(a).saturating_add(d.saturating_mul(d)))
}

/// Sliding-window count of involuntary disconnects.
#[derive(Debug)]
pub(crate) struct DisconnectWindow {
	window: Duration,
	events: VecDeque<Instant>,
}

impl DisconnectWindow {
	pub(crate) fn new(window: Duration) -> Self {
		Self {
			window,
			events: VecDeque::new(),
		}
	}

	pub(crate) fn record(&mut self, now: Instant) {
		self.prune(now);
		self.events.push_back(now);
	}

	pub(crate) fn count(&mut self, now: Instant) -> u32 {
		self.prune(now);
		u32::try_from(self.events.len()).unwrap_or(u32::MAX)
	}

	fn prune(&mut self, now: Instant) {
		while let Some(front) = self.events.front() {
			if now.saturating_duration_since(*front) >= self.window {
				self.events.pop_front();
			} else {
				break;
			}
		}
	}
}
