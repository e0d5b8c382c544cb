#![allow(non_snake_case)]

use std::f64::consts;

use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::gnss::pvt::ephemeris::Ephemeris;
use crate::utils::bools_to_int;

#[cfg(test)]
pub(crate) mod encoder;

/*	GPS L1 C/A LNAV decoding:
	- Parity check and D30* data recovery per word
	- Subframe 1-3 field extraction into an Ephemeris
	- TOW and week bookkeeping
*/

pub const SUBFRAME_SIZE_W_PARITY_BITS:usize = 300;
pub const WORD_BITS:usize = 30;

/// Each word's six parity bits against the last two bits of the previous word, IS-GPS-200 Table 20-XIV
pub fn parity_check(word:&[bool], last_D29:bool, last_D30:bool) -> bool {
	if word.len() != WORD_BITS { return false; }
	let parity = compute_parity(&word[..24], last_D29, last_D30);
	word.iter().skip(24).zip(parity.iter()).all(|(a, b)| a == b)
}

/// Parity bits D25..D30 for 24 transmitted data bits
pub(crate) fn compute_parity(data:&[bool], last_D29:bool, last_D30:bool) -> [bool; 6] {
	let d:Vec<bool> = data.iter().take(24).map(|b| b ^ last_D30).collect();

	[
		last_D29 ^ d[0] ^ d[1] ^ d[2] ^ d[4] ^ d[5] ^ d[9]  ^ d[10] ^ d[11] ^ d[12] ^ d[13] ^ d[16] ^ d[17] ^ d[19] ^ d[22],
		last_D30 ^ d[1] ^ d[2] ^ d[3] ^ d[5] ^ d[6] ^ d[10] ^ d[11] ^ d[12] ^ d[13] ^ d[14] ^ d[17] ^ d[18] ^ d[20] ^ d[23],
		last_D29 ^ d[0] ^ d[2] ^ d[3] ^ d[4] ^ d[6] ^ d[7]  ^ d[11] ^ d[12] ^ d[13] ^ d[14] ^ d[15] ^ d[18] ^ d[19] ^ d[21],
		last_D30 ^ d[1] ^ d[3] ^ d[4] ^ d[5] ^ d[7] ^ d[8]  ^ d[12] ^ d[13] ^ d[14] ^ d[15] ^ d[16] ^ d[19] ^ d[20] ^ d[22],
		last_D30 ^ d[0] ^ d[2] ^ d[4] ^ d[5] ^ d[6] ^ d[8]  ^ d[9]  ^ d[13] ^ d[14] ^ d[15] ^ d[16] ^ d[17] ^ d[20] ^ d[21] ^ d[23],
		last_D29 ^ d[2] ^ d[4] ^ d[5] ^ d[7] ^ d[8] ^ d[9]  ^ d[10] ^ d[12] ^ d[14] ^ d[18] ^ d[21] ^ d[22] ^ d[23],
	]
}

/// Takes the last two bits of the previous subframe followed by 300 transmitted bits.  Every word must pass
/// parity; the returned 300 bits have their data bits restored and keep the transmitted parity bits in place.
pub fn data_recover(frame:&[bool]) -> Result<Vec<bool>, GnssError> {
	if frame.len() != SUBFRAME_SIZE_W_PARITY_BITS + 2 {
		return Err(GnssError::DecodeFailed("L1 C/A frame must hold 302 bits"));
	}

	let mut ans:Vec<bool> = Vec::with_capacity(SUBFRAME_SIZE_W_PARITY_BITS);
	for w in 0..10 {
		let last_D29 = frame[w*WORD_BITS];
		let last_D30 = frame[w*WORD_BITS + 1];
		let word = &frame[(w*WORD_BITS + 2)..((w+1)*WORD_BITS + 2)];
		if !parity_check(word, last_D29, last_D30) {
			return Err(GnssError::DecodeFailed("L1 C/A parity mismatch"));
		}
		ans.extend(word.iter().take(24).map(|b| b ^ last_D30));
		ans.extend_from_slice(&word[24..]);
	}

	Ok(ans)
}

// Field readers over the recovered subframe, offsets count from the first bit of word 1
fn u(bits:&[bool], pos:usize, len:usize) -> Result<u32, GnssError> { bools_to_int::to_u32(&bits[pos..pos+len]) }
fn s(bits:&[bool], pos:usize, len:usize) -> Result<f64, GnssError> { Ok(bools_to_int::to_i32(&bits[pos..pos+len])? as f64) }
fn u2(bits:&[bool], p1:usize, l1:usize, p2:usize, l2:usize) -> Result<u32, GnssError> {
	bools_to_int::to_u32_split(&bits[p1..p1+l1], &bits[p2..p2+l2])
}
fn s2(bits:&[bool], p1:usize, l1:usize, p2:usize, l2:usize) -> Result<f64, GnssError> {
	Ok(bools_to_int::to_i32_split(&bits[p1..p1+l1], &bits[p2..p2+l2])? as f64)
}

fn p2(n:i32) -> f64 { (2.0_f64).powi(n) }

/// Resolves a 10-bit broadcast week against a reference week, within +/- 512 weeks
pub fn resolve_week(raw:u16, reference:u16) -> u16 {
	let raw = raw as i64;
	let reference = reference.max(1560) as i64;
	(raw + (reference - raw + 512).div_euclid(1024) * 1024) as u16
}

/// Navigation state accumulated from decoded subframes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct GpsNavData {
	pub eph: Ephemeris,
	/// Time of week at the start of the subframe after the last decoded one [sec]
	pub tow: f64,
	pub week: u16,
	/// Bit n set once subframe n has been decoded
	pub subframes: u8,
	/// IODE of the last ephemeris handed out by `take_update`
	pub reported_iode: Option<u8>,
}

impl GpsNavData {

	pub fn has_ephemeris(&self) -> bool { (self.subframes & 0b1110) == 0b1110 && self.eph.is_complete() }

	/// True once per complete ephemeris whose IODE differs from the last one reported
	pub fn take_update(&mut self) -> bool {
		if !self.has_ephemeris() || self.reported_iode == Some(self.eph.iode) { return false; }
		self.reported_iode = Some(self.eph.iode);
		true
	}

	/// Decodes one parity-checked subframe, returns its ID
	pub fn decode_subframe(&mut self, bits:&[bool], week_ref:u16) -> Result<u8, GnssError> {
		if bits.len() != SUBFRAME_SIZE_W_PARITY_BITS {
			return Err(GnssError::DecodeFailed("subframe must hold 300 bits"));
		}
		let tow = (u(bits, 30, 17)? as f64) * 6.0;
		let id = u(bits, 49, 3)? as u8;

		match id {
			1 => self.decode_subframe1(bits, week_ref)?,
			2 => self.decode_subframe2(bits)?,
			3 => self.decode_subframe3(bits)?,
			4 | 5 => {},
			_ => return Err(GnssError::InvalidTelemetryData("subframe number other than 1 through 5")),
		}

		self.tow = tow;
		self.subframes |= 1 << id;
		Ok(id)
	}

	fn decode_subframe1(&mut self, bits:&[bool], week_ref:u16) -> Result<(), GnssError> {
		let eph = &mut self.eph;
		let week = resolve_week(u(bits, 60, 10)? as u16, week_ref);
		eph.code = u(bits, 70, 2)? as u8;
		eph.sva  = u(bits, 72, 4)? as u8;
		eph.svh  = u(bits, 76, 6)? as u8;
		eph.iodc = u2(bits, 82, 2, 210, 8)? as u16;
		eph.tgd  = s(bits, 196, 8)?  * p2(-31);
		eph.toc  = (u(bits, 218, 16)? as f64) * 16.0;
		eph.af2  = s(bits, 240, 8)?  * p2(-55);
		eph.af1  = s(bits, 248, 16)? * p2(-43);
		eph.af0  = s(bits, 270, 22)? * p2(-31);
		eph.week = week;
		self.week = week;
		Ok(())
	}

	fn decode_subframe2(&mut self, bits:&[bool]) -> Result<(), GnssError> {
		let eph = &mut self.eph;
		eph.iode   = u(bits, 60, 8)? as u8;
		eph.crs    = s(bits, 68, 16)? * p2(-5);
		eph.dn     = s(bits, 90, 16)? * p2(-43) * consts::PI;
		eph.m0     = s2(bits, 106, 8, 120, 24)? * p2(-31) * consts::PI;
		eph.cuc    = s(bits, 150, 16)? * p2(-29);
		eph.e      = (u2(bits, 166, 8, 180, 24)? as f64) * p2(-33);
		eph.cus    = s(bits, 210, 16)? * p2(-29);
		eph.sqrt_a = (u2(bits, 226, 8, 240, 24)? as f64) * p2(-19);
		eph.toe    = (u(bits, 270, 16)? as f64) * 16.0;
		eph.fit    = u(bits, 286, 1)? == 1;
		Ok(())
	}

	fn decode_subframe3(&mut self, bits:&[bool]) -> Result<(), GnssError> {
		let eph = &mut self.eph;
		eph.cic       = s(bits, 60, 16)? * p2(-29);
		eph.omega0    = s2(bits, 76, 8, 90, 24)? * p2(-31) * consts::PI;
		eph.cis       = s(bits, 120, 16)? * p2(-29);
		eph.i0        = s2(bits, 136, 8, 150, 24)? * p2(-31) * consts::PI;
		eph.crc       = s(bits, 180, 16)? * p2(-5);
		eph.omega     = s2(bits, 196, 8, 210, 24)? * p2(-31) * consts::PI;
		eph.omega_dot = s(bits, 240, 24)? * p2(-43) * consts::PI;
		eph.iode      = u(bits, 270, 8)? as u8;
		eph.idot      = s(bits, 278, 14)? * p2(-43) * consts::PI;
		Ok(())
	}

}
