
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::gnss::Signal;
use crate::gnss::pvt::ephemeris::Ephemeris;

pub mod gps;
pub mod sbas;

use self::gps::GpsNavData;
use self::sbas::SbasNavData;

// Bit sync needs this many sign changes at one position within the bit
const NAVSYNC_THRESHOLD:u32 = 50;
// Prompt correlations skipped before bit sync starts, while the loops settle
const SYNC_START_PERIODS:u64 = 2000;

const GPS_PREAMBLE:[i8; 8] = [1, -1, -1, -1, 1, -1, 1, 1];

/// Frame layout of one signal's navigation message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavParams {
	/// Code periods per data bit or FEC symbol
	pub rate: usize,
	/// Frame length in bits (symbols for SBAS)
	pub flen: usize,
	/// Extra bits kept ahead of the frame, parity context for L1 C/A and Viterbi tail for SBAS
	pub addflen: usize,
	pub prelen: usize,
	/// Code periods between decodes once the frame is found
	pub update: u64,
	pub loop_periods: usize,
}

impl NavParams {

	pub fn for_signal(signal:Signal) -> Self {
		match signal {
			Signal::GpsL1Ca => Self{ rate: 20, flen: 300, addflen: 2, prelen: 8, update: 6000, loop_periods: signal.loop_periods() },
			Signal::SbasL1  => Self{ rate: 2, flen: 1500, addflen: 12, prelen: 16, update: 1000, loop_periods: signal.loop_periods() },
		}
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavStage {
	/// Loops still settling after acquisition
	Unsynced,
	BitSyncing,
	FrameSearching,
	Decoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavData {
	Gps(GpsNavData),
	Sbas(SbasNavData),
}

/// Notable transitions reported by one decoder step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavEvent {
	BitSync{ synci:usize },
	Decoded{ id:u8 },
	DecodeFailed,
	/// A decode left the time of week at zero, the frame search starts over
	SyncDropped,
}

pub struct NavDecoder {
	pub prn: usize,
	pub signal: Signal,
	params: NavParams,
	week_ref: u16,

	biti: usize,
	synci: usize,
	bitsync: Vec<u32>,
	flag_sync: bool,

	bit_ip: f64,
	bit_cnt: u64,
	swloop: bool,
	swsync: bool,

	// Newest bit last, +1/-1, zero until filled
	fbits: Vec<i8>,
	fbitsdec: Vec<i8>,
	bits_in: usize,
	polarity: i8,
	flag_pol: bool,

	flag_syncf: bool,
	flag_tow: bool,
	flag_dec: bool,
	first_sf: u64,
	first_sf_cnt: u64,
	first_sf_tow: f64,

	time_hint: Option<(f64, u16)>,
	data: NavData,
}

impl NavDecoder {

	/// `week_ref` resolves the 10-bit broadcast week numbers
	pub fn new(prn:usize, signal:Signal, week_ref:u16) -> Self {
		let params = NavParams::for_signal(signal);
		let data = match signal {
			Signal::GpsL1Ca => NavData::Gps(GpsNavData::default()),
			Signal::SbasL1  => NavData::Sbas(SbasNavData::default()),
		};
		Self{ prn, signal, params, week_ref,
			biti: 0, synci: 0, bitsync: vec![0; params.rate], flag_sync: false,
			bit_ip: 0.0, bit_cnt: 0, swloop: false, swsync: false,
			fbits: vec![0; params.flen + params.addflen], fbitsdec: vec![0; params.flen + params.addflen],
			bits_in: 0, polarity: 1, flag_pol: false,
			flag_syncf: false, flag_tow: false, flag_dec: false,
			first_sf: 0, first_sf_cnt: 0, first_sf_tow: 0.0,
			time_hint: None, data }
	}

	pub fn reset(&mut self) { *self = Self::new(self.prn, self.signal, self.week_ref); }

	pub fn params(&self) -> &NavParams { &self.params }

	pub fn stage(&self) -> NavStage {
		if self.flag_tow { NavStage::Decoding }
		else if self.flag_sync { NavStage::FrameSearching }
		else if self.bitsync.iter().any(|n| *n > 0) { NavStage::BitSyncing }
		else { NavStage::Unsynced }
	}

	pub fn bit_synced(&self) -> bool { self.flag_sync }

	/// True on the code periods that close a loop interval
	pub fn swloop(&self) -> bool { self.swloop }

	/// True on the code period that completed a bit
	pub fn swsync(&self) -> bool { self.swsync }

	/// A frame was found and its time of week decoded
	pub fn decoded(&self) -> bool { self.flag_dec }

	pub fn polarity(&self) -> i8 { self.polarity }

	pub fn data(&self) -> &NavData { &self.data }

	/// Sample index of the block where the frame was found
	pub fn first_frame_sample(&self) -> u64 { self.first_sf }

	pub fn first_frame_cnt(&self) -> u64 { self.first_sf_cnt }

	/// GPS time an SBAS channel falls back on when no MT12 has arrived
	pub fn set_time_hint(&mut self, hint:Option<(f64, u16)>) { self.time_hint = hint; }

	/// Time of week of the latest decoded frame, zero while unknown
	pub fn tow(&self) -> f64 {
		match &self.data {
			NavData::Gps(nav)  => nav.tow,
			NavData::Sbas(nav) => nav.usable_tow(),
		}
	}

	pub fn week(&self) -> u16 {
		match &self.data {
			NavData::Gps(nav)  => nav.week,
			NavData::Sbas(nav) => nav.week,
		}
	}

	pub fn ephemeris(&self) -> Option<Ephemeris> {
		match &self.data {
			NavData::Gps(nav) if nav.has_ephemeris() => Some(nav.eph),
			_ => None,
		}
	}

	/// True once for each new ephemeris issue, see `GpsNavData::take_update`
	pub fn take_ephemeris_update(&mut self) -> bool {
		match &mut self.data {
			NavData::Gps(nav)  => nav.take_update(),
			NavData::Sbas(_) => false,
		}
	}

	/// Transmit time of the code epoch starting block `cnt`.  The frame is found on the last period of its
	/// last bit, and the decoded TOW belongs to the epoch right after it.
	pub fn tow_at(&self, cnt:u64) -> f64 {
		let ctime = self.signal.code_period();
		self.first_sf_tow + ((cnt as f64) - (self.first_sf_cnt as f64) - 1.0) * ctime
	}

	fn check_sync(&mut self, ip:f64, ip_old:f64) -> bool {
		if self.params.rate == 1 {
			self.synci = 0;
			return true;
		}
		if ip_old * ip < 0.0 {
			self.bitsync[self.biti] += 1;
			let (maxi, max) = self.bitsync.iter().enumerate()
				.fold((0, 0), |(bi, bv), (i, v)| if *v > bv { (i, *v) } else { (bi, bv) });
			if max > NAVSYNC_THRESHOLD {
				self.synci = if maxi == 0 { self.params.rate - 1 } else { maxi - 1 };
				return true;
			}
		}
		false
	}

	fn check_bit(&mut self, ip:f64) {
		let rate = self.params.rate as i64;
		let diffi = (self.biti as i64) - (self.synci as i64);

		self.swsync = false;
		if diffi == 1 || diffi == -rate + 1 {
			self.bit_ip = ip;
			self.bit_cnt = 1;
		} else {
			self.bit_ip += ip;
		}

		self.swloop = self.bit_cnt % (self.params.loop_periods as u64) == 0;

		if diffi == 0 {
			let pol:i8 = if self.flag_pol { -1 } else { 1 };
			let bit:i8 = if self.bit_ip < 0.0 { -pol } else { pol };
			self.fbits.rotate_left(1);
			if let Some(last) = self.fbits.last_mut() { *last = bit; }
			self.bits_in += 1;
			self.swsync = true;
		}
		self.bit_cnt += 1;
	}

	fn predecode(&mut self) {
		match self.signal {
			Signal::GpsL1Ca => self.fbitsdec.copy_from_slice(&self.fbits),
			Signal::SbasL1 => {
				let symbols:Vec<bool> = self.fbits.iter().map(|s| *s > 0).collect();
				if let Some(bits) = sbas::error_correction::decode(&symbols) {
					for (k, b) in bits.iter().take(self.params.flen / 2).enumerate() {
						self.fbitsdec[k] = if *b { 1 } else { -1 };
					}
				}
			},
		}
	}

	// Frame bits with the polarity applied, as booleans
	fn frame_bits(&self, n:usize) -> Vec<bool> {
		self.fbitsdec.iter().take(n).map(|b| b * self.polarity > 0).collect()
	}

	fn parity_ok(&self) -> bool {
		match self.signal {
			Signal::GpsL1Ca => gps::data_recover(&self.frame_bits(self.params.flen + self.params.addflen)).is_ok(),
			Signal::SbasL1  => sbas::error_detection::is_message_crc_ok(&self.frame_bits(sbas::error_detection::MESSAGE_BITS)),
		}
	}

	fn find_preamble(&mut self) -> bool {
		let corr:i32 = match self.signal {
			Signal::GpsL1Ca => GPS_PREAMBLE.iter().enumerate()
				.map(|(i, p)| (self.fbitsdec[self.params.addflen + i] * p) as i32).sum(),
			Signal::SbasL1 => {
				let pre = |byte:u8, i:usize| -> i32 { if (byte >> (7 - i)) & 1 == 1 { 1 } else { -1 } };
				(0..8).map(|i| (self.fbitsdec[i] as i32) * pre(sbas::PREAMBLES[0], i)
					+ (self.fbitsdec[i + 250] as i32) * pre(sbas::PREAMBLES[1], i)).sum()
			},
		};

		if corr.abs() >= self.params.prelen as i32 {
			self.polarity = if corr > 0 { 1 } else { -1 };
			if self.parity_ok() {
				return true;
			} else if self.signal == Signal::SbasL1 && self.polarity == 1 {
				self.flag_pol = true;
			}
		}
		false
	}

	fn decode(&mut self) -> Result<u8, GnssError> {
		let week_ref = self.week_ref;
		match self.signal {
			Signal::GpsL1Ca => {
				let bits = gps::data_recover(&self.frame_bits(self.params.flen + self.params.addflen))?;
				match &mut self.data {
					NavData::Gps(nav) => nav.decode_subframe(&bits, week_ref),
					NavData::Sbas(_)  => Err(GnssError::DecodeFailed("GPS frame on an SBAS decoder")),
				}
			},
			Signal::SbasL1 => {
				let bits = self.frame_bits(sbas::error_detection::MESSAGE_BITS);
				let hint = self.time_hint;
				match &mut self.data {
					NavData::Sbas(nav) => {
						let id = nav.decode_message(&bits, week_ref)?;
						if let Some((tow, week)) = hint { nav.adopt_gps_time(tow, week); }
						Ok(id)
					},
					NavData::Gps(_) => Err(GnssError::DecodeFailed("SBAS message on a GPS decoder")),
				}
			},
		}
	}

	/// Feeds one prompt correlation.  `cnt` counts code periods since tracking started and `buffloc` is the
	/// sample index where this period's block began.
	pub fn step(&mut self, ip:f64, ip_old:f64, cnt:u64, buffloc:u64) -> Option<NavEvent> {
		let mut event:Option<NavEvent> = None;
		self.biti = (cnt % (self.params.rate as u64)) as usize;

		if !self.flag_sync && cnt > SYNC_START_PERIODS {
			self.flag_sync = self.check_sync(ip, ip_old);
			if self.flag_sync {
				log::info!("{} PRN {:3} bit sync at position {}", self.signal, self.prn, self.synci);
				event = Some(NavEvent::BitSync{ synci: self.synci });
			}
		}

		if !self.flag_sync {
			self.swloop = false;
			self.swsync = false;
			return event;
		}

		self.check_bit(ip);

		let full = self.bits_in >= self.params.flen + self.params.addflen;
		if self.swsync && !self.flag_tow && full {
			self.predecode();
			self.flag_syncf = self.find_preamble();
			if self.flag_syncf {
				self.first_sf = buffloc;
				self.first_sf_cnt = cnt;
				self.flag_tow = true;
				log::info!("{} PRN {:3} frame sync, polarity {}", self.signal, self.prn, self.polarity);
			}
		}

		if self.flag_tow && self.swsync && (cnt - self.first_sf_cnt) % self.params.update == 0 {
			self.predecode();
			match self.decode() {
				Ok(id) => {
					log::debug!("{} PRN {:3} decoded frame {}, TOW {:.1}", self.signal, self.prn, id, self.tow());
					event = Some(NavEvent::Decoded{ id });
				},
				Err(e) => {
					log::debug!("{} PRN {:3} {}", self.signal, self.prn, e);
					event = Some(NavEvent::DecodeFailed);
				},
			}

			if self.tow() == 0.0 {
				self.flag_syncf = false;
				self.flag_tow = false;
				event = Some(NavEvent::SyncDropped);
			} else if cnt == self.first_sf_cnt {
				self.flag_dec = true;
				self.first_sf_tow = self.tow();
			}
		}

		event
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::pvt::ephemeris::tests::sample_ephemeris;

	// First period of every data bit falls on cnt = 7 mod 20
	const GPS_BIT_PHASE:u64 = 7;

	fn gps_prompt(bits:&[bool], cnt:u64, sign:f64) -> f64 {
		let idx = if cnt < GPS_BIT_PHASE { 0 } else { ((cnt - GPS_BIT_PHASE) / 20 + 1) as usize };
		let b = bits.get(idx).copied().unwrap_or(false);
		sign * if b { 800.0 } else { -800.0 }
	}

	fn run_gps(sign:f64) -> (NavDecoder, Vec<(u64, NavEvent)>) {
		let eph = sample_ephemeris(0.4, 2.0);
		let bits = gps::encoder::subframe_stream(&eph, 1, 345600.0, 10);
		let mut dec = NavDecoder::new(5, Signal::GpsL1Ca, 2360);
		let mut events = vec![];
		let mut old = 0.0;
		for cnt in 0..(20*2200) {
			let ip = gps_prompt(&bits, cnt, sign);
			if let Some(ev) = dec.step(ip, old, cnt, 1000 + 4092*cnt) { events.push((cnt, ev)); }
			old = ip;
		}
		(dec, events)
	}

	#[test]
	fn gps_bit_sync_frame_sync_and_time_tags() {
		let (dec, events) = run_gps(1.0);

		assert!(dec.bit_synced());
		assert_eq!(events[0].1, NavEvent::BitSync{ synci: ((GPS_BIT_PHASE + 19) % 20) as usize });

		// Bit sync lands inside subframe 2, so the first complete frame is subframe 3 (bits 600..900)
		let frame_cnt = GPS_BIT_PHASE + 20*899 - 1;
		assert_eq!(dec.polarity(), 1);
		assert!(events.contains(&(frame_cnt, NavEvent::Decoded{ id: 3 })));
		assert!(dec.decoded());
		assert_eq!(dec.first_frame_cnt(), frame_cnt);
		assert_eq!(dec.first_frame_sample(), 1000 + 4092*frame_cnt);
		assert_eq!(dec.stage(), NavStage::Decoding);

		// Subframe 4 starts at 345600 + 18
		assert!((dec.tow_at(frame_cnt + 1) - 345618.0).abs() < 1.0e-9);
		assert!((dec.tow_at(frame_cnt + 1 + 6000) - 345624.0).abs() < 1.0e-9);

		for (k, id) in [4u8, 5, 1, 2].iter().enumerate() {
			let c = frame_cnt + 6000*((k + 1) as u64);
			assert!(events.contains(&(c, NavEvent::Decoded{ id: *id })), "subframe {} at {}", id, c);
		}

		let eph = dec.ephemeris().unwrap();
		assert_eq!(eph.week, 2370);
		assert!((eph.m0 - 0.4).abs() < 1.0e-8);
		assert_eq!(dec.week(), 2370);
	}

	#[test]
	fn gps_inverted_prompt_finds_negative_polarity() {
		let (mut dec, events) = run_gps(-1.0);
		assert_eq!(dec.polarity(), -1);
		assert!(dec.ephemeris().is_some());
		assert!(events.iter().any(|(_, ev)| *ev == NavEvent::Decoded{ id: 3 }));
		assert!(!events.iter().any(|(_, ev)| *ev == NavEvent::DecodeFailed));

		assert!(dec.take_ephemeris_update());
		assert!(!dec.take_ephemeris_update());
	}

	#[test]
	fn loop_switch_follows_bit_phase() {
		let (mut dec, _) = run_gps(1.0);
		let bits = vec![true; 10];
		let mut flags = vec![];
		let base = 44000 + GPS_BIT_PHASE;
		for c in base..(base + 40) {
			dec.step(gps_prompt(&bits, 0, 1.0), 800.0, c, 0);
			flags.push(dec.swloop());
		}
		// Ten periods into each bit and again at its end
		let on:Vec<usize> = flags.iter().enumerate().filter(|(_, f)| **f).map(|(i, _)| i).collect();
		assert_eq!(on, vec![9, 19, 29, 39]);
	}

	#[test]
	fn no_sync_before_loops_settle() {
		let mut dec = NavDecoder::new(1, Signal::GpsL1Ca, 2360);
		let mut old = 1.0;
		for cnt in 0..2000 {
			let ip = if cnt % 2 == 0 { 1.0 } else { -1.0 };
			assert_eq!(dec.step(ip, old, cnt, 0), None);
			old = ip;
		}
		assert_eq!(dec.stage(), NavStage::Unsynced);
		assert!(!dec.swloop());
	}

	#[test]
	fn sbas_messages_decode_through_fec() {
		use super::sbas::tests::build_message;

		let mut msg_bits:Vec<bool> = vec![];
		for k in 0..12u32 {
			let pre = sbas::PREAMBLES[(k % 3) as usize];
			let mt = if k % 3 == 0 { 12 } else { 0 };
			msg_bits.extend(build_message(pre, mt, 200000 + k, 2371));
		}
		let symbols = sbas::error_correction::encode(&msg_bits, 0);

		// Symbols start on even periods
		let mut dec = NavDecoder::new(131, Signal::SbasL1, 2360);
		let mut old = 0.0;
		let mut events = vec![];
		for cnt in 0..(2*symbols.len() as u64) {
			let ip = if symbols[(cnt / 2) as usize] { 500.0 } else { -500.0 };
			if let Some(ev) = dec.step(ip, old, cnt, cnt*2046) { events.push((cnt, ev)); }
			old = ip;
		}

		assert_eq!(events[0].1, NavEvent::BitSync{ synci: 1 });
		// Window of 1512 symbols starting on the fourth message, a 0x53 MT12
		let frame_cnt = 2*(1500 + 1512) - 1;
		assert_eq!(dec.first_frame_cnt(), frame_cnt);
		assert!(events.contains(&(frame_cnt, NavEvent::Decoded{ id: 12 })));
		assert!(dec.decoded());
		assert_eq!(dec.week(), 2371);
		assert!(dec.tow() > 200000.0);
		assert!(dec.ephemeris().is_none());
		assert!(events.contains(&(frame_cnt + 1000, NavEvent::Decoded{ id: 0 })));
	}

	#[test]
	fn reset_clears_everything() {
		let (mut dec, _) = run_gps(1.0);
		dec.reset();
		assert_eq!(dec.stage(), NavStage::Unsynced);
		assert!(!dec.decoded());
		assert_eq!(dec.tow(), 0.0);
	}

}
