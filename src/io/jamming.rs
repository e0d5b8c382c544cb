use std::sync::Mutex;

use log::{info, warn};
use serde::{Serialize, Deserialize};

use crate::config::JammingConfig;
use crate::io::SampleFormat;
use crate::utils::lock;

/// Front-end power picture kept by the producer
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct JammingState {
	pub jamming: bool,
	/// First sample of the block that started the current or latest episode
	pub onset_sample: Option<u64>,
	/// First sample of the block that ended the latest episode, `None` while one is running
	pub end_sample: Option<u64>,
	/// Mean I^2 + Q^2 of the newest block [LSB^2]
	pub power: f64,
	pub episodes: u64,
}

/// Transition reported by `JammingMonitor::observe`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JammingEvent {
	Started{ sample:u64, power:f64 },
	Ended{ sample:u64, power:f64 },
}

/// Block power threshold detector with hysteresis.
///
/// An episode starts on the first block whose mean power exceeds `power_threshold` and ends on the first
/// block whose power drops below `power_threshold * release_ratio`.
pub struct JammingMonitor {
	format: SampleFormat,
	cfg: JammingConfig,
	state: Mutex<JammingState>,
}

impl JammingMonitor {

	pub fn new(format:SampleFormat, cfg:&JammingConfig) -> Self {
		Self{ format, cfg: cfg.clone(), state: Mutex::new(JammingState::default()) }
	}

	pub fn state(&self) -> JammingState { *lock(&self.state) }

	/// Folds in the raw bytes of one block starting at absolute sample `first_sample`
	pub fn observe(&self, block:&[u8], first_sample:u64) -> Option<JammingEvent> {
		if !self.cfg.enabled { return None; }

		let power = self.format.mean_power(block);
		let mut st = lock(&self.state);
		st.power = power;

		if !st.jamming && power > self.cfg.power_threshold {
			st.jamming = true;
			st.onset_sample = Some(first_sample);
			st.end_sample = None;
			st.episodes += 1;
			warn!("Jamming detected at sample {}: power {:.1} above {:.1}", first_sample, power, self.cfg.power_threshold);
			Some(JammingEvent::Started{ sample: first_sample, power })
		} else if st.jamming && power < self.cfg.power_threshold * self.cfg.release_ratio {
			st.jamming = false;
			st.end_sample = Some(first_sample);
			info!("Jamming ended at sample {}: power {:.1}", first_sample, power);
			Some(JammingEvent::Ended{ sample: first_sample, power })
		} else {
			None
		}
	}

}
