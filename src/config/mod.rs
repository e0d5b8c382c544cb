
use std::fs;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::gnss::Signal;
use crate::io::SampleFormat;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
	pub prn: usize,
	pub signal: Signal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
	/// Half-width of the Doppler search [Hz]
	pub span_hz: f64,
	pub step_hz: f64,
	/// Minimum ratio of the highest to the second highest peak
	pub threshold: f64,
	/// Non-coherent integrations, one code period each
	pub integrations: usize,
	/// Wait between failed searches [ms]
	pub backoff_ms: u64,
}

impl Default for AcquisitionConfig {
	fn default() -> Self {
		Self{ span_hz: 7000.0, step_hz: 200.0, threshold: 3.0, integrations: 10, backoff_ms: 2000 }
	}
}

/// Noise bandwidths of one loop parameter set [Hz]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LoopBandwidths {
	pub dll_hz: f64,
	pub pll_hz: f64,
	pub fll_hz: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
	/// Used every code period until bit sync
	pub wide: LoopBandwidths,
	/// Used once per loop interval after bit sync
	pub narrow: LoopBandwidths,
	/// Early/late pairs computed by the correlator
	pub corr_pairs: usize,
	/// Sample spacing between neighbouring taps
	pub corr_spacing: usize,
	/// Pair used by the code discriminator, 1 is the pair closest to prompt
	pub el_pair: usize,
	pub snr_smooth_ms: usize,
	/// Added to the moments estimate to calibrate it against a reference receiver [dB]
	pub snr_offset_db: f64,
}

impl Default for TrackingConfig {
	fn default() -> Self {
		Self{
			wide:   LoopBandwidths{ dll_hz: 5.0, pll_hz: 30.0, fll_hz: 200.0 },
			narrow: LoopBandwidths{ dll_hz: 2.0, pll_hz: 20.0, fll_hz: 50.0 },
			corr_pairs: 4, corr_spacing: 1, el_pair: 1,
			snr_smooth_ms: 100, snr_offset_db: 0.0,
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResetConfig {
	/// Signal time after acquisition before the reset checks apply [sec]
	pub timer_s: f64,
	/// [dB-Hz]
	pub snr_threshold: f64,
	/// [deg]
	pub elevation_mask_deg: f64,
	pub min_week: u16,
}

impl Default for ResetConfig {
	fn default() -> Self { Self{ timer_s: 60.0, snr_threshold: 25.0, elevation_mask_deg: 12.0, min_week: 2360 } }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PvtConfig {
	/// [dB-Hz]
	pub snr_threshold: f64,
	/// [deg]
	pub elevation_mask_deg: f64,
	pub min_week: u16,
	/// Observation epoch spacing [ms]
	pub out_ms: u64,
	/// Starting point for the estimator, ECEF [m]
	pub initial_position: Option<(f64, f64, f64)>,
}

impl Default for PvtConfig {
	fn default() -> Self {
		Self{ snr_threshold: 30.0, elevation_mask_deg: 15.0, min_week: 2360, out_ms: 200, initial_position: None }
	}
}

/// Front-end power monitor run on every block the producer pushes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct JammingConfig {
	pub enabled: bool,
	/// Mean I^2 + Q^2 per sample above which a block counts as jammed [LSB^2]
	pub power_threshold: f64,
	/// An episode ends once the power drops below `power_threshold * release_ratio`
	pub release_ratio: f64,
}

impl Default for JammingConfig {
	fn default() -> Self { Self{ enabled: true, power_threshold: 120.0, release_ratio: 0.8 } }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RingConfig {
	pub block_samples: usize,
	pub n_blocks: usize,
}

impl Default for RingConfig {
	fn default() -> Self { Self{ block_samples: 16384, n_blocks: 500 } }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReceiverConfig {
	pub sample_rate_hz: f64,
	pub intermediate_freq_hz: f64,
	pub sample_format: SampleFormat,
	pub channels: Vec<ChannelConfig>,
	pub acquisition: AcquisitionConfig,
	pub tracking: TrackingConfig,
	pub reset: ResetConfig,
	pub pvt: PvtConfig,
	pub ring: RingConfig,
	pub jamming: JammingConfig,
	/// Multiple of real time used to pace file playback, 0 reads as fast as possible
	pub playback_speed: f64,
	pub status_period_ms: u64,
}

impl Default for ReceiverConfig {
	fn default() -> Self {
		Self{
			sample_rate_hz: 4.092e6,
			intermediate_freq_hz: 0.0,
			sample_format: SampleFormat::Real,
			channels: (1..=32).map(|prn| ChannelConfig{ prn, signal: Signal::GpsL1Ca }).collect(),
			acquisition: AcquisitionConfig::default(),
			tracking: TrackingConfig::default(),
			reset: ResetConfig::default(),
			pvt: PvtConfig::default(),
			ring: RingConfig::default(),
			jamming: JammingConfig::default(),
			playback_speed: 0.0,
			status_period_ms: 1000,
		}
	}
}

fn invalid<T>(msg:String) -> Result<T, GnssError> { Err(GnssError::ConfigInvalid(msg)) }

impl ReceiverConfig {

	pub fn from_json_str(s:&str) -> Result<Self, GnssError> {
		let cfg:Self = serde_json::from_str(s).map_err(|e| GnssError::ConfigInvalid(e.to_string()))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn from_json_file<P: AsRef<Path>>(path:P) -> Result<Self, GnssError> {
		let s = fs::read_to_string(path.as_ref())
			.map_err(|e| GnssError::ConfigInvalid(format!("{}: {}", path.as_ref().display(), e)))?;
		Self::from_json_str(&s)
	}

	/// Samples in one 1 ms code period
	pub fn samples_per_code(&self) -> usize { (self.sample_rate_hz * 1.0e-3) as usize }

	pub fn validate(&self) -> Result<(), GnssError> {
		let fs = self.sample_rate_hz;
		if !(fs.is_finite() && fs >= 2.046e6 && fs <= 100.0e6) {
			return invalid(format!("sample rate {} [Hz] outside 2.046-100 [MHz]", fs));
		}
		if !(self.intermediate_freq_hz.is_finite() && self.intermediate_freq_hz.abs() < fs / 2.0) {
			return invalid(format!("IF {} [Hz] must lie within +/- fs/2", self.intermediate_freq_hz));
		}

		if self.channels.is_empty() {
			return invalid("channel list is empty".to_string());
		}
		for ch in self.channels.iter() {
			if !ch.signal.is_valid_prn(ch.prn) {
				return invalid(format!("PRN {} is not valid for {}", ch.prn, ch.signal));
			}
		}

		let acq = &self.acquisition;
		if !(acq.step_hz > 0.0 && acq.span_hz >= 0.0) {
			return invalid("acquisition step must be positive and span non-negative".to_string());
		}
		if (acq.span_hz / acq.step_hz).fract() != 0.0 {
			return invalid(format!("acquisition span {} is not a multiple of step {}", acq.span_hz, acq.step_hz));
		}
		if acq.integrations == 0 || acq.threshold <= 1.0 {
			return invalid("acquisition needs at least one integration and a threshold above 1".to_string());
		}

		let trk = &self.tracking;
		if trk.corr_spacing == 0 || trk.el_pair == 0 || trk.el_pair > trk.corr_pairs {
			return invalid(format!("E/L pair {} not among {} correlator pairs", trk.el_pair, trk.corr_pairs));
		}
		if trk.snr_smooth_ms == 0 {
			return invalid("SNR smoothing window must be positive".to_string());
		}

		let jam = &self.jamming;
		if !(jam.power_threshold > 0.0 && jam.release_ratio > 0.0 && jam.release_ratio <= 1.0) {
			return invalid(format!("jamming threshold {} and release ratio {} must be positive, the ratio at most 1",
				jam.power_threshold, jam.release_ratio));
		}

		if self.pvt.out_ms == 0 || self.status_period_ms == 0 {
			return invalid("output and status periods must be positive".to_string());
		}
		if !(self.playback_speed >= 0.0) {
			return invalid("playback speed must be non-negative".to_string());
		}

		// Acquisition looks back (integrations + 1) code periods and needs a block of slack for the producer
		let look_back = (acq.integrations + 1) * self.samples_per_code();
		let capacity = self.ring.block_samples * self.ring.n_blocks;
		if self.ring.block_samples == 0 || capacity < look_back + 2*self.ring.block_samples {
			return invalid(format!("ring of {} samples cannot hold the {} sample acquisition window", capacity, look_back));
		}

		Ok(())
	}

}
