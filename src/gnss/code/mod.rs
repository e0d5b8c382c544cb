
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use crate::GnssError;
use crate::gnss::Signal;

// G2 delay in chips for GPS PRN 1-32
const GPS_G2_DELAY:[usize; 32] = [
	  5,   6,   7,   8,  17,  18, 139, 140, 141, 251, 252, 254, 255, 256, 257, 258,
	469, 470, 471, 472, 473, 474, 509, 512, 513, 514, 515, 516, 859, 860, 861, 862];

// G2 delay in chips for SBAS PRN 120-158
const SBAS_G2_DELAY:[usize; 39] = [
	145, 175,  52,  21, 237, 235, 886, 657, 634, 762, 355, 1012, 176, 603, 130, 359, 595, 68, 386, 797,
	456, 499, 883, 307, 127, 211, 121, 118, 163, 628, 853,  484, 289, 811, 202, 1021, 463, 568, 904];

fn g2_delay(prn:usize, signal:Signal) -> Result<usize, GnssError> {
	if !signal.is_valid_prn(prn) {
		return Err(GnssError::ChannelInit(format!("PRN {} is not valid for {}", prn, signal)));
	}
	Ok(match signal {
		Signal::GpsL1Ca => GPS_G2_DELAY[prn - 1],
		Signal::SbasL1  => SBAS_G2_DELAY[prn - 120],
	})
}

/// C/A code for `prn` as +/-1 chips.  A chip equal to binary 1 maps to +1.
pub fn generate(prn:usize, signal:Signal) -> Result<Vec<i8>, GnssError> {
	let len = signal.code_len();
	let delay = g2_delay(prn, signal)?;

	// Register stages hold -1 for a binary one so that multiplication is XOR
	let mut r1:[i8; 10] = [-1; 10];
	let mut r2:[i8; 10] = [-1; 10];
	let mut g1:Vec<i8> = vec![0; len];
	let mut g2:Vec<i8> = vec![0; len];

	for i in 0..len {
		g1[i] = r1[9];
		g2[i] = r2[9];
		let c1 = r1[2]*r1[9];
		let c2 = r2[1]*r2[2]*r2[5]*r2[7]*r2[8]*r2[9];
		for j in (1..10).rev() {
			r1[j] = r1[j-1];
			r2[j] = r2[j-1];
		}
		r1[0] = c1;
		r2[0] = c2;
	}

	Ok((0..len).map(|i| -g1[i]*g2[(len - delay + i) % len]).collect())
}

/// Code value at every sample when `samples` samples span exactly one code period
pub fn resample(code:&[i8], samples:usize) -> Vec<i8> {
	let ci:f64 = code.len() as f64 / samples as f64;
	(0..samples).map(|i| code[((i as f64 * ci) as usize).min(code.len() - 1)]).collect()
}

/// Conjugate spectrum of one code period resampled to `samples` and zero-padded to `nfft`
pub fn conj_template(code:&[i8], samples:usize, nfft:usize) -> Vec<Complex<f64>> {
	let mut buffer:Vec<Complex<f64>> = vec![Complex::zero(); nfft];
	for (b, c) in buffer.iter_mut().zip(resample(code, samples).into_iter()) {
		*b = Complex{ re: c as f64, im: 0.0 };
	}

	let mut planner = FftPlanner::new();
	let fft = planner.plan_fft_forward(nfft);
	fft.process(&mut buffer);

	buffer.into_iter().map(|p| p.conj()).collect()
}
