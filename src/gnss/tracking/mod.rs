
use std::f64::consts;

use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::config::{LoopBandwidths, TrackingConfig};
use crate::filters::{self, LoopGains, ScalarFilter, SecondOrderLoop};
use crate::gnss::{code, Signal};
use crate::gnss::acquisition::AcquisitionResult;
use crate::gnss::correlator::Correlator;
use crate::io::SampleFormat;

/// Which parameter set drives the next loop filter update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopSet {
	/// Every code period, FLL assisted, until bit sync
	Wide,
	/// Once per loop interval after bit sync
	Narrow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LoopParams {
	dll: LoopGains,
	pll: LoopGains,
	fll_w: f64,
}

impl LoopParams {
	fn from_bandwidths(b:&LoopBandwidths) -> Self {
		Self{ dll: LoopGains::from_bandwidth(b.dll_hz), pll: LoopGains::from_bandwidth(b.pll_hz), fll_w: filters::fll_weight(b.fll_hz) }
	}
}

/// Moments-based (M2M4) C/N0 estimate over a fixed number of prompt correlations
pub struct SnrEstimator {
	window: usize,
	offset_db: f64,
	m2: f64,
	m4: f64,
	n: usize,
	last_db_hz: f64,
}

impl SnrEstimator {

	pub fn new(window:usize, offset_db:f64) -> Self { Self{ window, offset_db, m2: 0.0, m4: 0.0, n: 0, last_db_hz: 0.0 } }

	/// Adds one coherent prompt of length `t_coh` seconds; returns a fresh estimate once the window fills
	pub fn push(&mut self, i:f64, q:f64, t_coh:f64) -> Option<f64> {
		let p = i*i + q*q;
		self.m2 += p;
		self.m4 += p*p;
		self.n += 1;
		if self.n < self.window { return None; }

		let n = self.n as f64;
		let m2 = self.m2 / n;
		let m4 = self.m4 / n;
		let pd = (2.0*m2*m2 - m4).max(0.0).sqrt();
		let pn = m2 - pd;
		self.last_db_hz = if pd > 0.0 && pn > 0.0 { 10.0*(pd / pn / t_coh).log10() + self.offset_db } else if pd > 0.0 { 99.0 } else { 0.0 };

		self.m2 = 0.0;
		self.m4 = 0.0;
		self.n = 0;
		Some(self.last_db_hz)
	}

	/// Most recent estimate [dB-Hz]
	pub fn value(&self) -> f64 { self.last_db_hz }

	pub fn reset(&mut self) {
		self.m2 = 0.0;
		self.m4 = 0.0;
		self.n = 0;
		self.last_db_hz = 0.0;
	}

}

/// Closed-loop code and carrier tracking for one satellite
pub struct Tracking {
	pub prn: usize,
	pub signal: Signal,
	format: SampleFormat,
	fs: f64,
	f_if: f64,
	code: Vec<i8>,
	correlator: Correlator,
	// Indices of the early and late taps used by the DLL
	ne: usize,
	nl: usize,

	wide: LoopParams,
	narrow: LoopParams,
	carrier_loop: SecondOrderLoop,
	code_loop: SecondOrderLoop,

	pub acq_freq: f64,
	/// Carrier NCO frequency, IF included [Hz]
	pub carr_freq: f64,
	/// Code NCO frequency [chips/sec]
	pub code_freq: f64,
	/// Code phase at the start of the next block, relative to the nearest epoch [chips]
	pub rem_code: f64,
	pub rem_carr: f64,
	pub old_rem_code: f64,
	pub old_rem_carr: f64,

	/// Latest correlations per tap
	pub i: Vec<f64>,
	pub q: Vec<f64>,
	pub old_i: Vec<f64>,
	pub old_q: Vec<f64>,

	sum_i: Vec<f64>,
	sum_q: Vec<f64>,
	old_sum_i: Vec<f64>,
	old_sum_q: Vec<f64>,

	pub carr_err: f64,
	pub freq_err: f64,
	pub code_err: f64,

	pub snr: SnrEstimator,
}

impl Tracking {

	pub fn new(prn:usize, signal:Signal, fs:f64, f_if:f64, format:SampleFormat, cfg:&TrackingConfig) -> Result<Self, GnssError> {
		let code = code::generate(prn, signal)?;
		if cfg.el_pair == 0 || cfg.el_pair > cfg.corr_pairs {
			return Err(GnssError::ChannelInit(format!("E/L pair {} not among {} correlator pairs", cfg.el_pair, cfg.corr_pairs)));
		}
		let correlator = Correlator::new(cfg.corr_pairs, cfg.corr_spacing);
		let n_taps = correlator.n_taps();
		let wide = LoopParams::from_bandwidths(&cfg.wide);
		let ctime = signal.code_period();

		Ok(Self{ prn, signal, format, fs, f_if, code, correlator,
			ne: 2*cfg.el_pair - 1, nl: 2*cfg.el_pair,
			wide, narrow: LoopParams::from_bandwidths(&cfg.narrow),
			carrier_loop: SecondOrderLoop::new(wide.pll, ctime),
			code_loop: SecondOrderLoop::new(wide.dll, ctime),
			acq_freq: f_if, carr_freq: f_if, code_freq: signal.chip_rate(),
			rem_code: 0.0, rem_carr: 0.0, old_rem_code: 0.0, old_rem_carr: 0.0,
			i: vec![0.0; n_taps], q: vec![0.0; n_taps], old_i: vec![0.0; n_taps], old_q: vec![0.0; n_taps],
			sum_i: vec![0.0; n_taps], sum_q: vec![0.0; n_taps], old_sum_i: vec![0.0; n_taps], old_sum_q: vec![0.0; n_taps],
			carr_err: 0.0, freq_err: 0.0, code_err: 0.0,
			snr: SnrEstimator::new(cfg.snr_smooth_ms, cfg.snr_offset_db) })
	}

	/// Seeds the NCOs from an acquisition; the next block starts on the acquired code epoch
	pub fn start(&mut self, acq:&AcquisitionResult) {
		self.acq_freq = acq.carrier_hz;
		self.carr_freq = acq.carrier_hz;
		self.code_freq = self.signal.chip_rate() + (acq.carrier_hz - self.f_if) / (self.signal.carrier_hz() / self.signal.chip_rate());
		self.rem_code = 0.0;
		self.rem_carr = 0.0;
		self.old_rem_code = 0.0;
		self.old_rem_carr = 0.0;
		for v in self.i.iter_mut().chain(self.q.iter_mut()).chain(self.old_i.iter_mut()).chain(self.old_q.iter_mut()) { *v = 0.0; }
		self.clear_sums();
		self.carrier_loop.initialize();
		self.code_loop.initialize();
		self.carrier_loop.retune(self.wide.pll, self.signal.code_period());
		self.code_loop.retune(self.wide.dll, self.signal.code_period());
		self.carr_err = 0.0;
		self.freq_err = 0.0;
		self.code_err = 0.0;
		self.snr.reset();
	}

	/// Samples up to the next code epoch at the current code rate
	pub fn samples_needed(&self) -> usize {
		((self.signal.code_len() as f64 - self.rem_code) / (self.code_freq / self.fs)) as usize
	}

	/// Correlates one block of `n` samples and folds it into the loop sums with the data `polarity` taken
	/// out; returns the raw prompt I
	pub fn correlate(&mut self, samples:&[u8], n:usize, polarity:i8) -> f64 {
		self.old_i.copy_from_slice(&self.i);
		self.old_q.copy_from_slice(&self.q);
		self.old_rem_code = self.rem_code;
		self.old_rem_carr = self.rem_carr;

		let c = self.correlator.mix_and_dump(samples, self.format, 1.0 / self.fs, n, self.carr_freq, self.old_rem_carr,
			&self.code, self.code_freq, self.old_rem_code);
		self.i = c.i;
		self.q = c.q;
		self.rem_code = c.code_phase;
		self.rem_carr = c.carrier_phase;

		let p = if polarity < 0 { -1.0 } else { 1.0 };
		for k in 0..self.i.len() {
			self.old_sum_i[k] += p*self.old_i[k];
			self.old_sum_q[k] += p*self.old_q[k];
			self.sum_i[k] += p*self.i[k];
			self.sum_q[k] += p*self.q[k];
		}

		self.i[0]
	}

	/// Feeds the latest prompt to the C/N0 estimator
	pub fn update_snr(&mut self) -> Option<f64> {
		let t = self.signal.code_period();
		self.snr.push(self.i[0], self.q[0], t)
	}

	fn clear_sums(&mut self) {
		for v in self.sum_i.iter_mut().chain(self.sum_q.iter_mut()).chain(self.old_sum_i.iter_mut()).chain(self.old_sum_q.iter_mut()) {
			*v = 0.0;
		}
	}

	fn pll(&mut self, fll_w:f64, dt:f64) {
		let ip = self.sum_i[0];
		let qp = self.sum_q[0];
		let old_ip = self.old_sum_i[0];
		let old_qp = self.old_sum_q[0];

		// Costas discriminator, insensitive to the data bit sign
		let carr_err = if ip > 0.0 { qp.atan2(ip) / consts::PI } else { (-qp).atan2(-ip) / consts::PI };

		let f1 = if ip == 0.0 { consts::FRAC_PI_2 } else { (qp / ip).atan() };
		let f2 = if old_ip == 0.0 { consts::FRAC_PI_2 } else { (old_qp / old_ip).atan() };
		let mut freq_err = f1 - f2;
		// atan repeats every pi, so the difference wraps into +/- pi/2
		if freq_err >  consts::FRAC_PI_2 { freq_err -= consts::PI; }
		if freq_err < -consts::FRAC_PI_2 { freq_err += consts::PI; }

		let nco = self.carrier_loop.apply_aided(carr_err, fll_w*dt*freq_err);
		self.carr_freq = self.acq_freq + nco;
		self.carr_err = carr_err;
		self.freq_err = freq_err;
	}

	fn dll(&mut self) {
		let e = self.sum_i[self.ne].hypot(self.sum_q[self.ne]);
		let l = self.sum_i[self.nl].hypot(self.sum_q[self.nl]);
		let code_err = if e + l > 0.0 { (e - l) / (e + l) } else { 0.0 };

		let nco = self.code_loop.apply(code_err);
		let crate_ = self.signal.chip_rate();
		self.code_freq = crate_ - nco + (self.carr_freq - self.f_if) / (self.signal.carrier_hz() / crate_);
		self.code_err = code_err;
	}

	/// Runs the PLL/FLL and DLL on the accumulated sums, then clears them
	pub fn update_loops(&mut self, set:LoopSet) {
		let (params, dt) = match set {
			LoopSet::Wide   => (self.wide,   self.signal.code_period()),
			LoopSet::Narrow => (self.narrow, self.signal.code_period() * (self.signal.loop_periods() as f64)),
		};
		self.carrier_loop.retune(params.pll, dt);
		self.code_loop.retune(params.dll, dt);

		self.pll(params.fll_w, dt);
		self.dll();
		self.clear_sums();
	}

	/// Carrier Doppler relative to the IF [Hz]
	pub fn doppler(&self) -> f64 { self.carr_freq - self.f_if }

	/// Code phase at the end of the last block converted to samples
	pub fn rem_code_samples(&self) -> f64 { self.rem_code * self.fs / self.code_freq }

}
