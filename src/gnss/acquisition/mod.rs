
use std::sync::Arc;

use log::{debug, info};
use rustfft::{Fft, FftPlanner};
use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::GnssError;
use crate::config::AcquisitionConfig;
use crate::gnss::{code, Signal};
use crate::gnss::correlator::Correlator;
use crate::io::{SampleFormat, SampleRing};

/// Accepted search outcome
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct AcquisitionResult {
	/// Lag of the correlation peak within one code period [samples]
	pub code_index: usize,
	pub freq_index: usize,
	/// Carrier frequency of the winning bin, IF included [Hz]
	pub carrier_hz: f64,
	pub cn0_db_hz: f64,
	pub peak_ratio: f64,
	/// Absolute sample index of a code epoch
	pub sample_idx: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquisitionState {
	Idle,
	Searching,
	Acquired(AcquisitionResult),
	NotAcquired{ peak_ratio:f64 },
}

/// Peak statistics of the current power surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCheck {
	pub code_index: usize,
	pub freq_index: usize,
	pub cn0_db_hz: f64,
	pub peak_ratio: f64,
}

/// Parallel code phase search over a fixed grid of Doppler bins
pub struct Acquisition {
	pub prn: usize,
	pub signal: Signal,
	pub state: AcquisitionState,
	format: SampleFormat,
	fs: f64,
	nsamp: usize,
	nsampchip: usize,
	nfft: usize,
	freqs: Vec<f64>,
	threshold: f64,
	integrations: usize,
	template: Vec<Complex<f64>>,
	fft: Arc<dyn Fft<f64>>,
	ifft: Arc<dyn Fft<f64>>,
	correlator: Correlator,
	power: Vec<f64>,
}

impl Acquisition {

	pub fn new(prn:usize, signal:Signal, fs:f64, f_if:f64, format:SampleFormat, cfg:&AcquisitionConfig) -> Result<Self, GnssError> {
		let code = code::generate(prn, signal)?;
		let nsamp:usize = (fs * signal.code_period()) as usize;
		let nsampchip:usize = nsamp / signal.code_len();
		let nfft:usize = 2*nsamp;
		if nsampchip == 0 {
			return Err(GnssError::ChannelInit(format!("{} samples per code period is less than one per chip", nsamp)));
		}

		let half_bins = (cfg.span_hz / cfg.step_hz).round() as i64;
		let freqs:Vec<f64> = (-half_bins..=half_bins).map(|i| f_if + (i as f64)*cfg.step_hz).collect();

		let mut planner = FftPlanner::new();
		let fft  = planner.plan_fft_forward(nfft);
		let ifft = planner.plan_fft_inverse(nfft);

		Ok(Self{ prn, signal, state: AcquisitionState::Idle, format, fs, nsamp, nsampchip, nfft,
			power: vec![0.0; freqs.len() * nsamp], freqs,
			threshold: cfg.threshold, integrations: cfg.integrations,
			template: code::conj_template(&code, nsamp, nfft), fft, ifft,
			correlator: Correlator::new(0, 1) })
	}

	pub fn n_freqs(&self) -> usize { self.freqs.len() }

	pub fn bin_freq(&self, freq_index:usize) -> f64 { self.freqs[freq_index] }

	/// Samples a complete search reads from the ring
	pub fn window_len(&self) -> usize { (self.integrations + 1) * self.nsamp }

	/// Adds one non-coherent integration of `2*nsamp` raw samples to the power surface
	fn accumulate(&mut self, samples:&[u8]) {
		let ti = 1.0 / self.fs;
		let scale = 1.0 / (self.nfft as f64);
		for (bin, freq) in self.freqs.iter().enumerate() {
			let mut x = self.correlator.mix_carrier(samples, self.format, ti, self.nfft, *freq, 0.0);
			self.fft.process(&mut x);
			for (a, b) in x.iter_mut().zip(self.template.iter()) { *a = *a * *b; }
			self.ifft.process(&mut x);

			let row = &mut self.power[bin*self.nsamp..(bin+1)*self.nsamp];
			for (p, v) in row.iter_mut().zip(x.iter()) {
				*p += (*v * scale).norm_sqr();
			}
		}
	}

	/// Locates the highest peak and compares it with the rest of its Doppler row.
	///
	/// Samples within two chips of the peak, wrapping around the code period, are left out of the
	/// noise mean and the second peak.  Ties keep the first maximum in bin-major order.
	pub fn check(&self) -> PeakCheck {
		let nsamp = self.nsamp;
		let nfreq = self.freqs.len();

		let (ind, max_p) = self.power.iter().enumerate()
			.fold((0usize, std::f64::NEG_INFINITY), |(bi, bv), (i, v)| if *v > bv { (i, *v) } else { (bi, bv) });
		let code_index = ind % nsamp;
		let freq_index = (nfreq * ind) / (nsamp * nfreq);

		let excl = 2*self.nsampchip;
		let excluded = |k:usize| {
			let d = if k > code_index { k - code_index } else { code_index - k };
			d.min(nsamp - d) <= excl
		};

		let row = &self.power[freq_index*nsamp..(freq_index+1)*nsamp];
		let mut sum = 0.0;
		let mut count = 0usize;
		let mut second = 0.0f64;
		for (k, p) in row.iter().enumerate() {
			if excluded(k) { continue; }
			sum += p;
			count += 1;
			second = second.max(*p);
		}

		let mean = if count > 0 { sum / (count as f64) } else { 0.0 };
		let cn0_db_hz = 10.0 * (max_p / mean / self.signal.code_period()).log10();
		let peak_ratio = if second > 0.0 { max_p / second } else { std::f64::INFINITY };

		PeakCheck{ code_index, freq_index, cn0_db_hz, peak_ratio }
	}

	/// Runs a full search over `samples`, the raw bytes of `window_len()` samples starting at absolute
	/// index `start`.  Stops early as soon as an integration passes the peak test.
	pub fn search_window(&mut self, samples:&[u8], start:u64) -> Result<AcquisitionResult, GnssError> {
		let bps = self.format.bytes_per_sample();
		if samples.len() < self.window_len() * bps {
			return Err(GnssError::NotYetAvailable{ end: start + (self.window_len() as u64), written: start + (samples.len()/bps) as u64 });
		}

		self.state = AcquisitionState::Searching;
		for p in self.power.iter_mut() { *p = 0.0; }

		let mut last = None;
		for i in 0..self.integrations {
			let a = i * self.nsamp * bps;
			let b = a + self.nfft * bps;
			self.accumulate(&samples[a..b]);

			let pc = self.check();
			last = Some(pc);
			if pc.peak_ratio > self.threshold {
				let result = AcquisitionResult{ code_index: pc.code_index, freq_index: pc.freq_index,
					carrier_hz: self.freqs[pc.freq_index], cn0_db_hz: pc.cn0_db_hz, peak_ratio: pc.peak_ratio,
					sample_idx: start + (pc.code_index as u64) };
				info!("{} PRN {:3} acquired: {:.1} [Hz] code index {} C/N0 {:.1} [dB-Hz] peak ratio {:.2} after {} integrations",
					self.signal, self.prn, result.carrier_hz, result.code_index, result.cn0_db_hz, result.peak_ratio, i+1);
				self.state = AcquisitionState::Acquired(result);
				return Ok(result);
			}
		}

		let peak_ratio = last.map(|pc| pc.peak_ratio).unwrap_or(0.0);
		debug!("{} PRN {:3} not acquired, peak ratio {:.2}", self.signal, self.prn, peak_ratio);
		self.state = AcquisitionState::NotAcquired{ peak_ratio };
		Err(GnssError::AcquisitionFailed{ prn: self.prn, peak_ratio })
	}

	/// Searches the newest `window_len()` samples in the ring
	pub fn search(&mut self, ring:&SampleRing) -> Result<AcquisitionResult, GnssError> {
		let len = self.window_len();
		let written = ring.samples_written();
		if written < len as u64 {
			return Err(GnssError::NotYetAvailable{ end: len as u64, written });
		}
		let start = written - (len as u64);
		let samples = ring.read(start, len)?;
		self.search_window(&samples, start)
	}

}
