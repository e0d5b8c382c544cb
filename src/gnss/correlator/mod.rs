
use std::f64::consts;

use rustfft::num_complex::Complex;

use crate::io::SampleFormat;

// Carrier replica resolution: one cycle is split into CDIV steps and each value is scaled by CDIV
const CDIV:usize = 32;
const CMASK:i64 = 0x1F;
// Also undoes the half-LSB units of `SampleFormat::iq2`
const CSCALE:f64 = 1.0 / 64.0;

/// Output of one integrate-and-dump
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
	/// In-phase sums per tap in `[P, E1, L1, E2, L2, ...]` order
	pub i: Vec<f64>,
	pub q: Vec<f64>,
	/// Carrier phase at the first sample after the block, in [0, 2*pi)
	pub carrier_phase: f64,
	/// Code phase at the first sample after the block, relative to the nearest code epoch [chips]
	pub code_phase: f64,
}

/// Table-driven carrier wipe-off plus early/prompt/late correlation
pub struct Correlator {
	cos_table: [i32; CDIV],
	sin_table: [i32; CDIV],
	offsets: Vec<isize>,
}

impl Correlator {

	/// Taps sit at `+/-spacing, +/-2*spacing, ...` samples from prompt, `n_pairs` pairs in total
	pub fn new(n_pairs:usize, spacing:usize) -> Self {
		let mut cos_table = [0i32; CDIV];
		let mut sin_table = [0i32; CDIV];
		for k in 0..CDIV {
			let phi = 2.0 * consts::PI * (k as f64) / (CDIV as f64);
			cos_table[k] = (phi.cos() * CDIV as f64).round() as i32;
			sin_table[k] = (phi.sin() * CDIV as f64).round() as i32;
		}

		let mut offsets:Vec<isize> = vec![0];
		for k in 1..=n_pairs {
			let d = (k * spacing) as isize;
			offsets.push(-d);
			offsets.push(d);
		}

		Self{ cos_table, sin_table, offsets }
	}

	pub fn n_taps(&self) -> usize { self.offsets.len() }

	/// Sample offset of every tap relative to prompt
	pub fn offsets(&self) -> &[isize] { &self.offsets }

	fn table_index(phi:f64) -> usize { ((phi.floor() as i64) & CMASK) as usize }

	// Mixed sample k before scaling, (I, Q)
	fn mix_one(&self, samples:&[u8], format:SampleFormat, k:usize, idx:usize) -> (i32, i32) {
		let c = self.cos_table[idx];
		let s = self.sin_table[idx];
		let (p0, p1) = format.iq2(samples, k);
		(p0*c + p1*s, p1*c - p0*s)
	}

	/// Multiplies `n` samples by exp(-j*(phase + 2*pi*freq*t)) using the carrier table
	pub fn mix_carrier(&self, samples:&[u8], format:SampleFormat, ti:f64, n:usize, freq:f64, phase:f64) -> Vec<Complex<f64>> {
		let phi0:f64 = phase * (CDIV as f64) / (2.0 * consts::PI);
		let ps:f64 = freq * (CDIV as f64) * ti;
		(0..n).map(|k| {
			let (i, q) = self.mix_one(samples, format, k, Self::table_index(phi0 + ps*(k as f64)));
			Complex{ re: (i as f64)*CSCALE, im: (q as f64)*CSCALE }
		}).collect()
	}

	/// Wipes off the carrier from `n` samples and correlates against `code` at every tap.
	///
	/// `code_phase` is the chip position of the prompt replica at the first sample and `code_rate` the code
	/// frequency in chips/sec.  Sums are returned in sample units.
	pub fn mix_and_dump(&self, samples:&[u8], format:SampleFormat, ti:f64, n:usize, carrier_freq:f64, carrier_phase:f64,
		code:&[i8], code_rate:f64, code_phase:f64) -> Correlation {

		let len = code.len() as f64;
		let ci:f64 = code_rate * ti;
		let phi0:f64 = carrier_phase * (CDIV as f64) / (2.0 * consts::PI);
		let ps:f64 = carrier_freq * (CDIV as f64) * ti;

		let mut sum_i:Vec<i64> = vec![0; self.offsets.len()];
		let mut sum_q:Vec<i64> = vec![0; self.offsets.len()];

		for k in 0..n {
			let (i, q) = self.mix_one(samples, format, k, Self::table_index(phi0 + ps*(k as f64)));
			for (t, off) in self.offsets.iter().enumerate() {
				let chip = (code_phase + ((k as isize + off) as f64)*ci).floor().rem_euclid(len) as usize;
				let c = code[chip.min(code.len() - 1)] as i64;
				sum_i[t] += c * (i as i64);
				sum_q[t] += c * (q as i64);
			}
		}

		let two_pi = 2.0 * consts::PI;
		let carrier_phase_out = (carrier_phase + two_pi*carrier_freq*ti*(n as f64)).rem_euclid(two_pi);

		let mut code_phase_out = (code_phase + ci*(n as f64)).rem_euclid(len);
		if code_phase_out > len / 2.0 { code_phase_out -= len; }

		Correlation{
			i: sum_i.into_iter().map(|x| (x as f64)*CSCALE).collect(),
			q: sum_q.into_iter().map(|x| (x as f64)*CSCALE).collect(),
			carrier_phase: carrier_phase_out,
			code_phase: code_phase_out,
		}
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::{code, Signal};

	// Real-valued samples of code * cos(2*pi*f*t + theta), amplitude 40
	fn synth_real(code:&[i8], fs:f64, f:f64, theta:f64, chip_offset:f64, n:usize) -> Vec<u8> {
		let ci = 1.023e6 / fs;
		(0..n).map(|k| {
			let chip = ((chip_offset + (k as f64)*ci).floor() as i64).rem_euclid(1023) as usize;
			let v = (code[chip] as f64) * 40.0 * (2.0*consts::PI*f*(k as f64)/fs + theta).cos();
			(v.round() as i8) as u8
		}).collect()
	}

	#[test]
	fn tap_layout_alternates_early_and_late() {
		let corr = Correlator::new(3, 2);
		assert_eq!(corr.offsets(), &[0, -2, 2, -4, 4, -6, 6]);
		assert_eq!(corr.n_taps(), 7);
	}

	#[test]
	fn aligned_prompt_dominates_and_phase_is_recovered() {
		let fs = 4.092e6;
		let n = 4092;
		let code = code::generate(3, Signal::GpsL1Ca).unwrap();
		let f = 1.0e3;
		let theta = 0.7;
		let x = synth_real(&code, fs, f, theta, 0.0, n);

		let corr = Correlator::new(1, 1);
		let out = corr.mix_and_dump(&x, SampleFormat::Real, 1.0/fs, n, f, 0.0, &code, 1.023e6, 0.0);

		// Real input mixed to baseband keeps half the amplitude, 40/2 per sample
		let p = (out.i[0].powi(2) + out.q[0].powi(2)).sqrt();
		assert!((p / (n as f64) - 20.0).abs() < 2.0, "prompt {}", p);
		assert!(out.i[1].abs() + out.q[1].abs() < 0.9 * (out.i[0].abs() + out.q[0].abs()));

		// The prompt phase is the input phase
		let phase = out.q[0].atan2(out.i[0]);
		assert!((phase - theta).abs() < 0.15, "phase {}", phase);

		// A whole code period leaves the code phase on the epoch
		assert!(out.code_phase.abs() < 1.0e-6);
	}

	#[test]
	fn code_phase_out_is_signed_near_epoch() {
		let corr = Correlator::new(1, 1);
		let code = code::generate(1, Signal::GpsL1Ca).unwrap();
		let x = vec![0u8; 100];

		let a = corr.mix_and_dump(&x, SampleFormat::Real, 1.0/1.023e6, 100, 0.0, 0.0, &code, 1.023e6, 1000.0);
		assert!((a.code_phase - 77.0).abs() < 1.0e-9);

		let b = corr.mix_and_dump(&x, SampleFormat::Real, 1.0/1.023e6, 100, 0.0, 0.0, &code, 1.023e6, 900.0);
		assert!((b.code_phase + 23.0).abs() < 1.0e-9);
	}

	#[test]
	fn complex_mixing_rotates_to_baseband() {
		let fs = 1.0e6;
		let f = 2.5e3;
		let n = 400;
		let x:Vec<u8> = (0..n).flat_map(|k| {
			let phi = 2.0*consts::PI*f*(k as f64)/fs;
			vec![((30.0*phi.cos()).round() as i8) as u8, ((30.0*phi.sin()).round() as i8) as u8]
		}).collect();

		let corr = Correlator::new(1, 1);
		let y = corr.mix_carrier(&x, SampleFormat::Complex, 1.0/fs, n, f, 0.0);
		let s:Complex<f64> = y.iter().sum();
		assert!(s.re / (n as f64) > 25.0);
		// Truncating the table index lags the replica by half a table step on average
		assert!((s.im / (n as f64)).abs() < 5.0);
	}

	#[test]
	fn offset_binary_matches_signed_complex() {
		let fs = 2.046e6;
		let n = 2046;
		let code = code::generate(14, Signal::GpsL1Ca).unwrap();
		let f = -1.5e3;
		let signed:Vec<i8> = (0..n).flat_map(|k| {
			let chip = ((k as f64) * 1.023e6 / fs).floor() as usize % 1023;
			let phi = 2.0*consts::PI*f*(k as f64)/fs + 0.3;
			let a = 40.0 * (code[chip] as f64);
			vec![(a*phi.cos()).round() as i8, (a*phi.sin()).round() as i8]
		}).collect();

		// An RTL-SDR byte b stands for b - 127.5, so (v + 128) carries v plus half an LSB of DC
		let x_i8:Vec<u8> = signed.iter().map(|v| *v as u8).collect();
		let x_u8:Vec<u8> = signed.iter().map(|v| ((*v as i16) + 128) as u8).collect();
		assert_eq!(SampleFormat::ComplexU8.iq2(&x_u8, 5).0 - 1, SampleFormat::Complex.iq2(&x_i8, 5).0);

		let corr = Correlator::new(1, 1);
		let a = corr.mix_and_dump(&x_i8, SampleFormat::Complex,   1.0/fs, n, f, 0.0, &code, 1.023e6, 0.0);
		let b = corr.mix_and_dump(&x_u8, SampleFormat::ComplexU8, 1.0/fs, n, f, 0.0, &code, 1.023e6, 0.0);
		let p = a.i[0].hypot(a.q[0]);
		assert!(p / (n as f64) > 35.0, "prompt {}", p);
		// The DC term is spread by the code and rotated by the carrier, so it stays far below the signal
		assert!((a.i[0] - b.i[0]).abs() < 0.01*p && (a.q[0] - b.q[0]).abs() < 0.01*p);
		assert_eq!(a.code_phase, b.code_phase);
	}

}
