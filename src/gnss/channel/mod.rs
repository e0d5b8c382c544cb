
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::config::{ChannelConfig, ReceiverConfig, ResetConfig};
use crate::gnss::Signal;
use crate::gnss::acquisition::{Acquisition, AcquisitionResult};
use crate::gnss::observation::{ChannelObservables, EpochTag, ObservationRow, ObservationTable};
use crate::gnss::telemetry_decode::{NavDecoder, NavEvent};
use crate::gnss::tracking::{LoopSet, Tracking};
use crate::io::SampleRing;
use crate::utils::lock;

/// Longest single wait on the ring before the stop flag is checked again
const WAIT_SLICE:Duration = Duration::from_millis(50);

/// Code periods between reset checks
const RESET_CHECK_PERIODS:u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
	Acquiring,
	Tracking,
}

/// What one code period of tracking produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
	pub event: Option<NavEvent>,
	pub loop_update: Option<LoopSet>,
	/// Set on loop updates once the time of week is known
	pub tag: Option<EpochTag>,
}

/// Acquisition, tracking and navigation decoding for one satellite
pub struct Channel {
	pub idx: usize,
	pub prn: usize,
	pub signal: Signal,
	pub state: ChannelState,
	acq: Acquisition,
	trk: Tracking,
	nav: NavDecoder,
	reset_cfg: ResetConfig,
	backoff: Duration,
	/// Absolute sample index where the next block starts
	buffloc: u64,
	/// Code periods tracked since the last acquisition
	cnt: u64,
}

impl Channel {

	pub fn new(idx:usize, ch:&ChannelConfig, cfg:&ReceiverConfig) -> Result<Self, GnssError> {
		let init_err = |e:GnssError| match e {
			GnssError::ChannelInit(_) => e,
			other => GnssError::ChannelInit(format!("{} PRN {}: {}", ch.signal, ch.prn, other)),
		};
		let fs = cfg.sample_rate_hz;
		let f_if = cfg.intermediate_freq_hz;
		let acq = Acquisition::new(ch.prn, ch.signal, fs, f_if, cfg.sample_format, &cfg.acquisition).map_err(init_err)?;
		let trk = Tracking::new(ch.prn, ch.signal, fs, f_if, cfg.sample_format, &cfg.tracking).map_err(init_err)?;

		Ok(Self{ idx, prn: ch.prn, signal: ch.signal, state: ChannelState::Acquiring, acq, trk,
			nav: NavDecoder::new(ch.prn, ch.signal, cfg.reset.min_week),
			reset_cfg: cfg.reset.clone(),
			backoff: Duration::from_millis(cfg.acquisition.backoff_ms),
			buffloc: 0, cnt: 0 })
	}

	pub fn nav(&self) -> &NavDecoder { &self.nav }

	pub fn tracking(&self) -> &Tracking { &self.trk }

	pub fn periods_tracked(&self) -> u64 { self.cnt }

	/// Begins tracking on the code epoch found by acquisition
	pub fn start(&mut self, acq:&AcquisitionResult) {
		self.trk.start(acq);
		self.nav.reset();
		self.buffloc = acq.sample_idx;
		self.cnt = 0;
		self.state = ChannelState::Tracking;
	}

	/// Drops the lock and goes back to searching
	pub fn reinitialize(&mut self) {
		self.nav.reset();
		self.cnt = 0;
		self.state = ChannelState::Acquiring;
	}

	/// Samples the next tracking block needs, starting at the returned absolute index
	pub fn next_block(&self) -> (u64, usize) { (self.buffloc, self.trk.samples_needed()) }

	/// Correlates one code period of raw samples, feeds the decoder and runs whichever loop set is due
	pub fn process_block(&mut self, samples:&[u8], n:usize) -> StepOutcome {
		self.trk.correlate(samples, n, self.nav.polarity());
		self.trk.update_snr();

		let event = self.nav.step(self.trk.i[0], self.trk.old_i[0], self.cnt, self.buffloc);

		let loop_update = if !self.nav.bit_synced() {
			Some(LoopSet::Wide)
		} else if self.nav.swloop() {
			Some(LoopSet::Narrow)
		} else {
			None
		};
		if let Some(set) = loop_update { self.trk.update_loops(set); }

		// The code epoch ending this block carries the time of the next period
		let tag = match loop_update {
			Some(_) if self.nav.decoded() => Some(EpochTag{
				tow_ms: ((self.nav.tow_at(self.cnt + 1) * 1000.0).round() as u64) % 604_800_000,
				codei: self.buffloc + (n as u64),
				rem_samples: self.trk.rem_code_samples(),
				doppler: self.trk.doppler(),
			}),
			_ => None,
		};

		self.buffloc += n as u64;
		self.cnt += 1;
		StepOutcome{ event, loop_update, tag }
	}

	/// Copies the channel's state into its observables and picks up GPS time for SBAS
	pub fn publish(&mut self, table:&mut ObservationTable, tag:Option<EpochTag>) {
		if self.signal == Signal::SbasL1 {
			self.nav.set_time_hint(table.gps_time());
		}
		if let Some(obs) = table.channels.get_mut(self.idx) {
			obs.acquired = self.state == ChannelState::Tracking;
			obs.bit_synced = self.nav.bit_synced();
			obs.decoded = self.nav.decoded();
			obs.tow = self.nav.tow();
			obs.week = self.nav.week();
			obs.snr = self.trk.snr.value();
			obs.doppler = self.trk.doppler();
			obs.eph = self.nav.ephemeris();
			if self.nav.take_ephemeris_update() {
				if let Some(eph) = obs.eph.as_ref() {
					info!("{} PRN {:3} ephemeris IODE {} toe {:.0}", self.signal, self.prn, eph.iode, eph.toe);
				}
				obs.eph_updated = true;
			}
			if let Some(t) = tag { obs.push(t); }
		}
	}

	/// Why the channel should give up its satellite, if it should
	pub fn reset_reason(&self, obs:&ChannelObservables, row:&ObservationRow) -> Option<GnssError> {
		let elapsed = (self.cnt as f64) * self.signal.code_period();
		if elapsed < self.reset_cfg.timer_s { return None; }

		if obs.snr < self.reset_cfg.snr_threshold {
			return Some(GnssError::LowSnr(obs.snr));
		}
		if !obs.decoded || obs.week < self.reset_cfg.min_week {
			return Some(GnssError::EphemerisStale);
		}
		match row.elevation {
			Some(el) if el < self.reset_cfg.elevation_mask_deg => Some(GnssError::LowElevation(el)),
			_ => None,
		}
	}

	fn reset(&mut self, table:&Mutex<ObservationTable>, why:&GnssError) {
		let mut t = lock(table);
		warn!("{} PRN {:3} reset after {:.1} [sec]: {}", self.signal, self.prn, (self.cnt as f64)*self.signal.code_period(), why);
		if let GnssError::StaleRead{ .. } = why { t.stale_reads += 1; }
		t.reset_channel(self.idx);
		self.reinitialize();
	}

	// Sleeps up to `d` in slices, returns false if the receiver is stopping
	fn pause(&self, d:Duration, ring:&SampleRing, stop:&AtomicBool) -> bool {
		let deadline = Instant::now() + d;
		loop {
			if stop.load(Ordering::Relaxed) || ring.is_closed() { return false; }
			let now = Instant::now();
			if now >= deadline { return true; }
			std::thread::sleep(WAIT_SLICE.min(deadline - now));
		}
	}

	fn acquire_step(&mut self, ring:&SampleRing, table:&Mutex<ObservationTable>, stop:&AtomicBool) -> bool {
		match self.acq.search(ring) {
			Ok(res) => {
				self.start(&res);
				self.publish(&mut lock(table), None);
				true
			},
			Err(GnssError::NotYetAvailable{ end, .. }) => {
				ring.wait_until_available(end, WAIT_SLICE) || !ring.is_closed()
			},
			Err(e @ GnssError::AcquisitionFailed{ .. }) => {
				debug!("{}, retrying in {} [ms]", e, self.backoff.as_millis());
				self.pause(self.backoff, ring, stop)
			},
			// The producer lapped the window between finding it and copying it, search the newest one
			Err(e @ GnssError::StaleRead{ .. }) => {
				warn!("{} PRN {:3} acquisition window overwritten: {}", self.signal, self.prn, e);
				lock(table).stale_reads += 1;
				true
			},
			Err(e) => {
				warn!("{} PRN {:3} search failed: {}", self.signal, self.prn, e);
				self.pause(self.backoff, ring, stop)
			},
		}
	}

	fn track_step(&mut self, ring:&SampleRing, table:&Mutex<ObservationTable>) -> bool {
		let (offset, n) = self.next_block();
		let samples = match ring.read(offset, n) {
			Ok(s) => s,
			Err(GnssError::NotYetAvailable{ end, .. }) => {
				return ring.wait_until_available(end, WAIT_SLICE) || !ring.is_closed();
			},
			Err(e) => {
				self.reset(table, &e);
				return true;
			},
		};

		let out = self.process_block(&samples, n);
		match out.event {
			Some(NavEvent::Decoded{ .. }) if self.nav.decoded() && self.cnt == self.nav.first_frame_cnt() + 1 => {
				info!("{} PRN {:3} first decode, TOW {:.0} week {}", self.signal, self.prn, self.nav.tow(), self.nav.week());
			},
			Some(NavEvent::SyncDropped) => warn!("{} PRN {:3} decoded a zero TOW, frame sync dropped", self.signal, self.prn),
			_ => {},
		}

		let check_reset = self.cnt % RESET_CHECK_PERIODS == 0;
		if out.loop_update.is_some() || check_reset {
			let mut t = lock(table);
			self.publish(&mut t, out.tag);
			if check_reset {
				let why = match (t.channels.get(self.idx), t.rows.get(self.idx)) {
					(Some(obs), Some(row)) => self.reset_reason(obs, row),
					_ => None,
				};
				if let Some(why) = why {
					drop(t);
					self.reset(table, &why);
				}
			}
		}
		true
	}

	/// Runs until `stop` is raised or the ring is closed and drained
	pub fn run(&mut self, ring:&SampleRing, table:&Mutex<ObservationTable>, stop:&AtomicBool) {
		info!("{} PRN {:3} channel started", self.signal, self.prn);
		loop {
			if stop.load(Ordering::Relaxed) { break; }
			let keep_going = match self.state {
				ChannelState::Acquiring => self.acquire_step(ring, table, stop),
				ChannelState::Tracking  => self.track_step(ring, table),
			};
			if !keep_going { break; }
		}
		debug!("{} PRN {:3} channel finished after {} periods", self.signal, self.prn, self.cnt);
	}

}
