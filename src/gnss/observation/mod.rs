
use std::collections::VecDeque;

use log::debug;
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::config::{ChannelConfig, PvtConfig};
use crate::gnss::{Signal, NOMINAL_TRAVEL_TIME_MS};
use crate::gnss::pvt::{PvtObservation, Solution};
use crate::gnss::pvt::ephemeris::Ephemeris;
use crate::utils::kinematics::C;

/// Epoch tags kept per channel, 800 ms of L1 C/A loop updates
pub const HISTORY_LEN:usize = 80;

/// Longest travel time a satellite above the horizon can show [sec]
const MAX_TRAVEL_S:f64 = 0.092;

/// Arrival of one tagged code epoch
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct EpochTag {
	/// Transmit time of the epoch [ms of week]
	pub tow_ms: u64,
	/// Sample index of the block boundary closest to the epoch
	pub codei: u64,
	/// Code phase at `codei` [samples], the epoch arrived this many samples earlier
	pub rem_samples: f64,
	pub doppler: f64,
}

impl EpochTag {

	/// Fractional sample index at which the epoch arrived
	pub fn sample(&self) -> f64 { (self.codei as f64) - self.rem_samples }

}

/// What one channel task publishes about its satellite
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelObservables {
	pub prn: usize,
	pub signal: Signal,
	pub acquired: bool,
	pub bit_synced: bool,
	pub decoded: bool,
	pub tow: f64,
	pub week: u16,
	pub snr: f64,       // [dB-Hz]
	pub doppler: f64,   // [Hz]
	pub eph: Option<Ephemeris>,
	/// A new ephemeris issue arrived and no epoch has been assembled with it yet
	pub eph_updated: bool,
	pub resets: u64,
	pub history: VecDeque<EpochTag>,
}

impl ChannelObservables {

	pub fn new(prn:usize, signal:Signal) -> Self {
		Self{ prn, signal, acquired: false, bit_synced: false, decoded: false, tow: 0.0, week: 0, snr: 0.0, doppler: 0.0,
			eph: None, eph_updated: false, resets: 0, history: VecDeque::with_capacity(HISTORY_LEN) }
	}

	pub fn push(&mut self, tag:EpochTag) {
		if self.history.len() == HISTORY_LEN { self.history.pop_front(); }
		self.history.push_back(tag);
	}

	/// Zeroes everything but the identity and the reset count
	pub fn clear(&mut self) {
		let resets = self.resets;
		*self = Self::new(self.prn, self.signal);
		self.resets = resets;
	}

	pub fn tag_at(&self, tow_ms:u64) -> Option<&EpochTag> {
		self.history.iter().rev().find(|t| t.tow_ms == tow_ms)
	}

	/// Transmit time of the signal arriving at sample `s` relative to `ref_ms` [sec], interpolated between
	/// neighbouring tags
	pub fn transmit_offset_at(&self, s:f64, ref_ms:u64) -> Option<f64> {
		let rel = |t:&EpochTag| ((t.tow_ms as i64) - (ref_ms as i64)) as f64 * 1.0e-3;
		self.history.iter().zip(self.history.iter().skip(1))
			.find(|(a, b)| a.sample() <= s && s <= b.sample())
			.map(|(a, b)| {
				let (sa, sb) = (a.sample(), b.sample());
				if sb > sa { rel(a) + (s - sa)/(sb - sa)*(rel(b) - rel(a)) } else { rel(a) }
			})
	}

	/// Only decoded L1 C/A channels carry an orbit to range from
	fn ranging(&self) -> bool {
		self.signal == Signal::GpsL1Ca && self.decoded && !self.history.is_empty()
	}

}

/// One satellite's line of the measurement epoch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ObservationRow {
	pub prn: usize,
	pub signal: Signal,
	pub valid: bool,
	/// Receive time of the epoch [sec of week]
	pub tow: f64,
	pub week: u16,
	pub pseudorange: f64,   // [m]
	pub snr: f64,
	pub doppler: f64,
	pub sat_pos: (f64, f64, f64),
	pub azimuth: Option<f64>,     // [deg]
	pub elevation: Option<f64>,   // [deg]
	pub residual: f64,
	/// Issue of the ephemeris the row is ranged with
	pub iode: Option<u8>,
	/// First epoch ranged with that issue
	pub eph_updated: bool,
}

impl ObservationRow {

	fn new(prn:usize, signal:Signal) -> Self {
		Self{ prn, signal, valid: false, tow: 0.0, week: 0, pseudorange: 0.0, snr: 0.0, doppler: 0.0,
			sat_pos: (0.0, 0.0, 0.0), azimuth: None, elevation: None, residual: 0.0, iode: None, eph_updated: false }
	}

}

/// Channel observables and assembled rows, one of each per configured channel
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ObservationTable {
	pub channels: Vec<ChannelObservables>,
	pub rows: Vec<ObservationRow>,
	/// Channels reset because the producer overwrote samples they had not read yet
	pub stale_reads: u64,
	last_epoch_ms: Option<u64>,
}

impl ObservationTable {

	pub fn new(channels:&[ChannelConfig]) -> Self {
		Self{
			channels: channels.iter().map(|c| ChannelObservables::new(c.prn, c.signal)).collect(),
			rows: channels.iter().map(|c| ObservationRow::new(c.prn, c.signal)).collect(),
			stale_reads: 0,
			last_epoch_ms: None,
		}
	}

	/// Zeroes a channel's observables and drops its row from the next solutions
	pub fn reset_channel(&mut self, idx:usize) {
		if let Some(ch) = self.channels.get_mut(idx) {
			ch.clear();
			ch.resets += 1;
		}
		if let Some(row) = self.rows.get_mut(idx) {
			*row = ObservationRow::new(row.prn, row.signal);
		}
	}

	/// GPS time of the newest epoch tagged by a ranging channel with a resolved week
	pub fn gps_time(&self) -> Option<(f64, u16)> {
		self.channels.iter()
			.filter(|c| c.ranging() && c.week != 0)
			.filter_map(|c| c.history.back().map(|t| (t.tow_ms, c.week)))
			.max_by_key(|(ms, _)| *ms)
			.map(|(ms, week)| ((ms as f64) / 1000.0, week))
	}

	/// Latest multiple of `out_ms` present in the history of every ranging channel
	pub fn reference_tow_ms(&self, out_ms:u64) -> Option<u64> {
		let ranging:Vec<&ChannelObservables> = self.channels.iter().filter(|c| c.ranging()).collect();
		let newest = ranging.iter().filter_map(|c| c.history.back()).map(|t| t.tow_ms).min()?;
		let oldest = ranging.iter().filter_map(|c| c.history.front()).map(|t| t.tow_ms).max()?;

		let mut candidate = newest - newest % out_ms;
		while candidate >= oldest {
			if ranging.iter().all(|c| c.tag_at(candidate).is_some()) { return Some(candidate); }
			if candidate < out_ms { break; }
			candidate -= out_ms;
		}
		None
	}

	/// Forms pseudoranges for a new reference epoch and returns its receive time [sec of week].  The first
	/// satellite to deliver the reference epoch is assigned the nominal travel time, and every other satellite
	/// is ranged at that same receive sample.
	pub fn assemble(&mut self, out_ms:u64) -> Option<f64> {
		let ref_ms = self.reference_tow_ms(out_ms)?;
		if self.last_epoch_ms.map_or(false, |last| ref_ms <= last) { return None; }

		let s_rx = self.channels.iter()
			.filter(|c| c.ranging())
			.filter_map(|c| c.tag_at(ref_ms))
			.map(|t| t.sample())
			.fold(std::f64::INFINITY, f64::min);
		let rx_tow = (ref_ms as f64)*1.0e-3 + NOMINAL_TRAVEL_TIME_MS*1.0e-3;

		for (ch, row) in self.channels.iter_mut().zip(self.rows.iter_mut()) {
			row.valid = false;
			if !ch.ranging() { continue; }
			if let (Some(dt_tx), Some(tag)) = (ch.transmit_offset_at(s_rx, ref_ms), ch.tag_at(ref_ms)) {
				row.valid = true;
				row.tow = rx_tow;
				row.week = ch.week;
				row.pseudorange = C*(NOMINAL_TRAVEL_TIME_MS*1.0e-3 - dt_tx);
				row.snr = ch.snr;
				row.doppler = tag.doppler;
				row.iode = ch.eph.map(|e| e.iode);
				row.eph_updated = std::mem::replace(&mut ch.eph_updated, false);
			}
		}

		self.last_epoch_ms = Some(ref_ms);
		Some(rx_tow)
	}

	fn check_row(row:&ObservationRow, ch:&ChannelObservables, cfg:&PvtConfig) -> Result<(), GnssError> {
		if row.snr < cfg.snr_threshold { return Err(GnssError::LowSnr(row.snr)); }
		if row.week < cfg.min_week { return Err(GnssError::EphemerisStale); }
		if row.tow < 1.0 { return Err(GnssError::InvalidTelemetryData("time of week not set")); }
		if !(row.pseudorange >= 0.0 && row.pseudorange <= MAX_TRAVEL_S*C) {
			return Err(GnssError::InvalidTelemetryData("pseudorange out of range"));
		}
		if !ch.eph.map_or(false, |e| e.is_complete()) { return Err(GnssError::EphemerisStale); }
		match row.elevation {
			Some(el) if el < cfg.elevation_mask_deg => Err(GnssError::LowElevation(el)),
			_ => Ok(()),
		}
	}

	/// Invalidates rows unfit for a solution, returns how many remain
	pub fn precheck(&mut self, cfg:&PvtConfig) -> usize {
		for (ch, row) in self.channels.iter().zip(self.rows.iter_mut()) {
			if !row.valid { continue; }
			if let Err(e) = Self::check_row(row, ch, cfg) {
				debug!("{} PRN {:3} left out of the solution: {}", row.signal, row.prn, e);
				row.valid = false;
			}
		}
		self.valid_count()
	}

	pub fn valid_count(&self) -> usize { self.rows.iter().filter(|r| r.valid).count() }

	pub fn pvt_inputs(&self) -> Vec<PvtObservation> {
		self.channels.iter().zip(self.rows.iter())
			.filter(|(_, row)| row.valid)
			.filter_map(|(ch, row)| ch.eph.map(|eph| PvtObservation{ prn: row.prn, pseudorange: row.pseudorange, eph, elevation: row.elevation }))
			.collect()
	}

	/// Writes satellite positions, look angles and residuals back into the rows
	pub fn apply_solution(&mut self, soln:&Solution) {
		for sat in soln.satellites.iter() {
			if let Some(row) = self.rows.iter_mut().find(|r| r.prn == sat.prn && r.signal == Signal::GpsL1Ca) {
				row.sat_pos = sat.pos_ecef;
				row.azimuth = Some(sat.azimuth);
				row.elevation = Some(sat.elevation);
				row.residual = sat.residual;
			}
		}
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::pvt::ephemeris::tests::sample_ephemeris;

	const FS:f64 = 4.0e6;

	fn table(prns:&[usize]) -> ObservationTable {
		let cfgs:Vec<ChannelConfig> = prns.iter().map(|prn| ChannelConfig{ prn: *prn, signal: Signal::GpsL1Ca }).collect();
		ObservationTable::new(&cfgs)
	}

	// Tags every 10 ms for a satellite whose signal takes `travel` seconds, receiver started at `t0`
	fn fill(ch:&mut ChannelObservables, travel:f64, t0:f64, from_ms:u64, to_ms:u64) {
		let mut ms = from_ms;
		while ms <= to_ms {
			let arrival = ((ms as f64)*1.0e-3 + travel - t0) * FS;
			let codei = arrival.ceil() as u64;
			ch.push(EpochTag{ tow_ms: ms, codei, rem_samples: (codei as f64) - arrival, doppler: 100.0 });
			ms += 10;
		}
		ch.decoded = true;
		ch.week = 2370;
		ch.snr = 45.0;
		ch.eph = Some(sample_ephemeris(0.0, 0.0));
	}

	#[test]
	fn history_is_bounded() {
		let mut ch = ChannelObservables::new(3, Signal::GpsL1Ca);
		for k in 0..200 { ch.push(EpochTag{ tow_ms: 10*k, codei: k, rem_samples: 0.0, doppler: 0.0 }); }
		assert_eq!(ch.history.len(), HISTORY_LEN);
		assert_eq!(ch.history.front().unwrap().tow_ms, 10*120);
	}

	#[test]
	fn reference_epoch_is_common_to_ranging_channels() {
		let mut t = table(&[1, 2, 3]);
		fill(&mut t.channels[0], 0.070, 345000.0, 345_600_000, 345_600_430);
		fill(&mut t.channels[1], 0.080, 345000.0, 345_600_100, 345_600_370);
		// Not decoded, so it does not hold the others back
		t.channels[2].push(EpochTag{ tow_ms: 345_000_000, codei: 0, rem_samples: 0.0, doppler: 0.0 });

		assert_eq!(t.reference_tow_ms(200), Some(345_600_200));
		assert_eq!(t.reference_tow_ms(1000), None);
	}

	#[test]
	fn pseudoranges_follow_arrival_order() {
		let mut t = table(&[1, 2]);
		let (ta, tb) = (0.0712345, 0.0823456);
		fill(&mut t.channels[0], ta, 345000.0, 345_600_000, 345_600_500);
		fill(&mut t.channels[1], tb, 345000.0, 345_600_000, 345_600_500);
		t.channels[1].eph_updated = true;

		let rx_tow = t.assemble(200).unwrap();
		assert!((rx_tow - (345600.4 + 0.068802)).abs() < 1.0e-9);
		assert!((t.rows[0].pseudorange - 0.068802*C).abs() < 1.0e-3);
		assert!((t.rows[1].pseudorange - (0.068802 + tb - ta)*C).abs() < 1.0e-3);
		assert!(t.rows.iter().all(|r| r.valid && r.week == 2370 && r.doppler == 100.0 && r.iode == Some(45)));
		assert_eq!((t.rows[0].eph_updated, t.rows[1].eph_updated), (false, true));
		assert!(!t.channels[1].eph_updated);

		// The same epoch is never assembled twice
		assert_eq!(t.assemble(200), None);
		fill(&mut t.channels[0], ta, 345000.0, 345_600_510, 345_600_700);
		fill(&mut t.channels[1], tb, 345000.0, 345_600_510, 345_600_700);
		assert!((t.assemble(200).unwrap() - (345600.6 + 0.068802)).abs() < 1.0e-9);
		assert!(!t.rows[1].eph_updated);
	}

	#[test]
	fn precheck_drops_unusable_rows() {
		let mut t = table(&[1, 2, 3, 4, 5, 6]);
		for k in 0..6 { fill(&mut t.channels[k], 0.07 + 0.001*(k as f64), 345000.0, 345_600_000, 345_600_300); }
		t.channels[1].snr = 20.0;
		t.channels[2].week = 1000;
		t.channels[3].eph = None;
		t.assemble(200).unwrap();
		t.rows[4].elevation = Some(5.0);
		t.rows[5].elevation = Some(40.0);

		assert_eq!(t.precheck(&PvtConfig::default()), 2);
		let valid:Vec<usize> = t.rows.iter().filter(|r| r.valid).map(|r| r.prn).collect();
		assert_eq!(valid, vec![1, 6]);
		assert_eq!(t.pvt_inputs().len(), 2);
		assert_eq!(t.pvt_inputs()[1].elevation, Some(40.0));
	}

	#[test]
	fn reset_clears_channel_and_row() {
		let mut t = table(&[7]);
		fill(&mut t.channels[0], 0.07, 345000.0, 345_600_000, 345_600_300);
		t.assemble(200).unwrap();
		assert!(t.rows[0].valid);

		t.reset_channel(0);
		assert_eq!(t.channels[0].resets, 1);
		assert!(!t.channels[0].decoded && t.channels[0].history.is_empty());
		assert!(!t.rows[0].valid);
		assert_eq!(t.rows[0].prn, 7);
	}

	#[test]
	fn gps_time_comes_from_the_newest_ranging_tag() {
		let mut t = table(&[4, 9]);
		assert_eq!(t.gps_time(), None);
		fill(&mut t.channels[0], 0.07, 345000.0, 345_600_000, 345_600_300);
		fill(&mut t.channels[1], 0.08, 345000.0, 345_600_000, 345_600_250);
		assert_eq!(t.gps_time(), Some((345600.3, 2370)));
	}

}
