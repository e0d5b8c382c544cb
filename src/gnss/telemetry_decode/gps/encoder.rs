
// Builds transmitted LNAV subframes for the decoder, tracking and receiver tests

use std::f64::consts;

use crate::gnss::pvt::ephemeris::Ephemeris;
use super::compute_parity;

pub const PREAMBLE:[bool; 8] = [true, false, false, false, true, false, true, true];

fn set_u(bits:&mut [bool], pos:usize, len:usize, v:u64) {
	for k in 0..len { bits[pos + k] = (v >> (len - 1 - k)) & 1 == 1; }
}

fn set_u2(bits:&mut [bool], p1:usize, l1:usize, p2:usize, l2:usize, v:u64) {
	set_u(bits, p1, l1, v >> l2);
	set_u(bits, p2, l2, v);
}

// Two's complement survives the truncation in set_u
fn q(x:f64, pow:i32) -> u64 { ((x / (2.0_f64).powi(pow)).round() as i64) as u64 }

/// Source bits of one subframe with zeroed parity positions
pub fn source_bits(eph:&Ephemeris, id:u8, tow_next:f64) -> Vec<bool> {
	let pi = consts::PI;
	let mut b = vec![false; 300];
	b[..8].copy_from_slice(&PREAMBLE);
	set_u(&mut b, 30, 17, (tow_next / 6.0) as u64);
	set_u(&mut b, 49, 3, id as u64);

	match id {
		1 => {
			set_u(&mut b, 60, 10, (eph.week % 1024) as u64);
			set_u(&mut b, 70, 2, eph.code as u64);
			set_u(&mut b, 72, 4, eph.sva as u64);
			set_u(&mut b, 76, 6, eph.svh as u64);
			set_u2(&mut b, 82, 2, 210, 8, eph.iodc as u64);
			set_u(&mut b, 196, 8, q(eph.tgd, -31));
			set_u(&mut b, 218, 16, (eph.toc / 16.0) as u64);
			set_u(&mut b, 240, 8, q(eph.af2, -55));
			set_u(&mut b, 248, 16, q(eph.af1, -43));
			set_u(&mut b, 270, 22, q(eph.af0, -31));
		},
		2 => {
			set_u(&mut b, 60, 8, eph.iode as u64);
			set_u(&mut b, 68, 16, q(eph.crs, -5));
			set_u(&mut b, 90, 16, q(eph.dn / pi, -43));
			set_u2(&mut b, 106, 8, 120, 24, q(eph.m0 / pi, -31));
			set_u(&mut b, 150, 16, q(eph.cuc, -29));
			set_u2(&mut b, 166, 8, 180, 24, q(eph.e, -33));
			set_u(&mut b, 210, 16, q(eph.cus, -29));
			set_u2(&mut b, 226, 8, 240, 24, q(eph.sqrt_a, -19));
			set_u(&mut b, 270, 16, (eph.toe / 16.0) as u64);
			b[286] = eph.fit;
		},
		3 => {
			set_u(&mut b, 60, 16, q(eph.cic, -29));
			set_u2(&mut b, 76, 8, 90, 24, q(eph.omega0 / pi, -31));
			set_u(&mut b, 120, 16, q(eph.cis, -29));
			set_u2(&mut b, 136, 8, 150, 24, q(eph.i0 / pi, -31));
			set_u(&mut b, 180, 16, q(eph.crc, -5));
			set_u2(&mut b, 196, 8, 210, 24, q(eph.omega / pi, -31));
			set_u(&mut b, 240, 24, q(eph.omega_dot / pi, -43));
			set_u(&mut b, 270, 8, eph.iode as u64);
			set_u(&mut b, 278, 14, q(eph.idot / pi, -43));
		},
		_ => {},
	}

	b
}

fn encode_word(source:&[bool], last_d29:bool, last_d30:bool) -> Vec<bool> {
	let data:Vec<bool> = source.iter().map(|x| x ^ last_d30).collect();
	let parity = compute_parity(&data, last_d29, last_d30);
	[data, parity.to_vec()].concat()
}

/// Transmitted subframe following a subframe that ended in `last_d29`, `last_d30`.  Words 2 and 10 use
/// their two spare bits so the word ends in D29 = D30 = 0.
pub fn subframe_bits_after(eph:&Ephemeris, id:u8, tow_next:f64, last_d29:bool, last_d30:bool) -> Vec<bool> {
	let src = source_bits(eph, id, tow_next);
	let mut tx = vec![false; 300];
	let (mut l29, mut l30) = (last_d29, last_d30);

	for w in 0..10 {
		let mut data = src[(w*30)..(w*30 + 24)].to_vec();
		let mut word = encode_word(&data, l29, l30);
		if w == 1 || w == 9 {
			for t in 0..4u8 {
				data[22] = t & 2 != 0;
				data[23] = t & 1 != 0;
				word = encode_word(&data, l29, l30);
				if !word[28] && !word[29] { break; }
			}
		}
		tx[(w*30)..(w*30 + 30)].copy_from_slice(&word);
		l29 = word[28];
		l30 = word[29];
	}

	tx
}

pub fn subframe_bits(eph:&Ephemeris, id:u8, tow_next:f64) -> Vec<bool> {
	subframe_bits_after(eph, id, tow_next, false, false)
}

/// `n` consecutive subframes, the first with ID `first_id` starting at time of week `t0`
pub fn subframe_stream(eph:&Ephemeris, first_id:u8, t0:f64, n:usize) -> Vec<bool> {
	let mut bits:Vec<bool> = Vec::with_capacity(300*n);
	for k in 0..n {
		let id = (((first_id as usize) - 1 + k) % 5 + 1) as u8;
		bits.extend(subframe_bits(eph, id, t0 + 6.0*((k + 1) as f64)));
	}
	bits
}
