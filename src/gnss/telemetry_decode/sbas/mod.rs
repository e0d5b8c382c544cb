
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::gnss::telemetry_decode::gps::resolve_week;
use crate::utils::bools_to_int;

pub mod error_correction;
pub mod error_detection;

/// Preambles of three consecutive messages, sent in the first 8 bits
pub const PREAMBLES:[u8; 3] = [0x53, 0x9A, 0xC6];

/// Message type carrying the network time parameters
const MT_NETWORK_TIME:u8 = 12;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SbasNavData {
	pub msg_type: u8,
	/// Time of week of the latest message [sec], advanced by one per message between MT12s
	pub tow: f64,
	/// Zero until MT12 or a GPS channel provides it
	pub week: u16,
	pub n_messages: u64,
	/// Latest 250-bit message packed into 32 bytes
	pub message: Vec<u8>,
}

impl SbasNavData {

	/// The TOW is only usable once a week number is known
	pub fn usable_tow(&self) -> f64 { if self.week != 0 { self.tow } else { 0.0 } }

	/// Decodes one CRC-checked 250-bit message, returns its type
	pub fn decode_message(&mut self, bits:&[bool], week_ref:u16) -> Result<u8, GnssError> {
		if !error_detection::is_message_crc_ok(bits) {
			return Err(GnssError::DecodeFailed("SBAS CRC mismatch"));
		}

		let msg_type = bools_to_int::to_u8(&bits[8..14])?;
		if msg_type == MT_NETWORK_TIME {
			self.tow = (bools_to_int::to_u32(&bits[107..127])? as f64) + 1.0;
			self.week = resolve_week(bools_to_int::to_u16(&bits[127..137])?, week_ref);
		} else {
			self.tow += 1.0;
		}

		self.message = bools_to_int::to_byte_vec(bits, 32, false)?;
		self.msg_type = msg_type;
		self.n_messages += 1;
		Ok(msg_type)
	}

	/// Takes TOW and week from a decoded GPS channel
	pub fn adopt_gps_time(&mut self, tow:f64, week:u16) {
		self.tow = tow;
		self.week = week;
	}

}

#[cfg(test)]
pub(crate) mod tests {

	use super::*;

	fn set_u(bits:&mut [bool], pos:usize, len:usize, v:u64) {
		for k in 0..len { bits[pos + k] = (v >> (len - 1 - k)) & 1 == 1; }
	}

	/// 250-bit message with valid CRC; MT12 messages carry `tow` and the 10-bit `week`
	pub fn build_message(preamble:u8, msg_type:u8, tow:u32, week:u16) -> Vec<bool> {
		let mut bits = vec![false; 250];
		set_u(&mut bits, 0, 8, preamble as u64);
		set_u(&mut bits, 8, 6, msg_type as u64);
		if msg_type == MT_NETWORK_TIME {
			set_u(&mut bits, 107, 20, tow as u64);
			set_u(&mut bits, 127, 10, (week % 1024) as u64);
		} else {
			for k in 14..226 { bits[k] = (k * 5 + msg_type as usize) % 11 < 4; }
		}
		let crc = error_detection::message_crc(&bits).unwrap();
		set_u(&mut bits, 226, 24, crc as u64);
		bits
	}

	#[test]
	fn mt12_sets_time_and_others_advance_it() {
		let mut nav = SbasNavData::default();

		assert_eq!(nav.decode_message(&build_message(0x53, 0, 0, 0), 2360).unwrap(), 0);
		assert_eq!(nav.tow, 1.0);
		assert_eq!(nav.usable_tow(), 0.0);

		assert_eq!(nav.decode_message(&build_message(0x9A, 12, 432000, 2371), 2360).unwrap(), 12);
		assert_eq!(nav.tow, 432001.0);
		assert_eq!(nav.week, 2371);

		nav.decode_message(&build_message(0xC6, 2, 0, 0), 2360).unwrap();
		assert_eq!(nav.usable_tow(), 432002.0);
		assert_eq!(nav.n_messages, 3);
		assert_eq!(nav.message.len(), 32);
		assert_eq!(nav.message[0], 0xC6);
	}

	#[test]
	fn crc_failure_leaves_state_alone() {
		let mut nav = SbasNavData::default();
		let mut bits = build_message(0x53, 12, 1000, 2371);
		bits[50] = !bits[50];
		assert_eq!(nav.decode_message(&bits, 2360), Err(GnssError::DecodeFailed("SBAS CRC mismatch")));
		assert_eq!(nav, SbasNavData::default());
	}

	#[test]
	fn gps_time_is_adopted() {
		let mut nav = SbasNavData::default();
		nav.adopt_gps_time(345600.0, 2370);
		assert_eq!(nav.usable_tow(), 345600.0);
	}

}
