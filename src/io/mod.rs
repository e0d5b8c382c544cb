use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Serialize, Deserialize};

use crate::GnssError;

pub mod jamming;
pub mod ring;

pub use self::jamming::JammingMonitor;
pub use self::ring::SampleRing;

/// Raw sample layout coming out of the front end
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
	/// One signed byte per sample
	Real,
	/// Two signed bytes per sample, in-phase first
	Complex,
	/// Two offset-binary bytes per sample centred on 127.5, in-phase first, as RTL-SDR dongles deliver them
	#[serde(rename = "complex_u8")]
	ComplexU8,
}

impl SampleFormat {

	pub fn bytes_per_sample(&self) -> usize {
		match self {
			SampleFormat::Real => 1,
			SampleFormat::Complex | SampleFormat::ComplexU8 => 2,
		}
	}

	/// Sample `k` of `bytes` as (I, Q) in half-LSB units, which keeps the 127.5 offset exact in integers
	pub fn iq2(&self, bytes:&[u8], k:usize) -> (i32, i32) {
		match self {
			SampleFormat::Real => (2*(bytes[k] as i8 as i32), 0),
			SampleFormat::Complex => (2*(bytes[2*k] as i8 as i32), 2*(bytes[2*k+1] as i8 as i32)),
			SampleFormat::ComplexU8 => (2*(bytes[2*k] as i32) - 255, 2*(bytes[2*k+1] as i32) - 255),
		}
	}

	/// Mean of I^2 + Q^2 over the whole samples in `bytes` [LSB^2]
	pub fn mean_power(&self, bytes:&[u8]) -> f64 {
		let n = bytes.len() / self.bytes_per_sample();
		if n == 0 { return 0.0; }
		let sum:i64 = (0..n).map(|k| {
			let (i, q) = self.iq2(bytes, k);
			(i as i64)*(i as i64) + (q as i64)*(q as i64)
		}).sum();
		(sum as f64) / (4.0 * n as f64)
	}

}

/// Byte producer feeding the sample ring
pub trait SampleSource: Send {
	fn open(&mut self) -> Result<(), GnssError>;

	/// Fills as much of `buf` as the source can provide; returns 0 at end of stream
	fn read_block(&mut self, buf:&mut [u8]) -> Result<usize, GnssError>;

	fn close(&mut self);
}

/// Any `Read` wrapped as a sample source, e.g. an in-memory capture
pub struct BufferedSource<R: Read + Send> {
	src: R,
}

impl<R: Read + Send> BufferedSource<R> {

	pub fn new(src:R) -> Self { Self { src } }

}

fn fill<R: Read>(src:&mut R, buf:&mut [u8]) -> Result<usize, GnssError> {
	let mut n = 0;
	while n < buf.len() {
		match src.read(&mut buf[n..]) {
			Ok(0) => break,
			Ok(k) => n += k,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e.into()),
		}
	}
	Ok(n)
}

impl<R: Read + Send> SampleSource for BufferedSource<R> {

	fn open(&mut self) -> Result<(), GnssError> { Ok(()) }

	fn read_block(&mut self, buf:&mut [u8]) -> Result<usize, GnssError> { fill(&mut self.src, buf) }

	fn close(&mut self) {}

}

pub struct FileSource {
	path: PathBuf,
	reader: Option<BufReader<File>>,
}

impl FileSource {

	pub fn new<P: Into<PathBuf>>(path:P) -> Self { Self { path: path.into(), reader: None } }

}

impl SampleSource for FileSource {

	fn open(&mut self) -> Result<(), GnssError> {
		let f = File::open(&self.path)
			.map_err(|e| GnssError::SourceUnavailable(format!("{}: {}", self.path.display(), e)))?;
		self.reader = Some(BufReader::new(f));
		Ok(())
	}

	fn read_block(&mut self, buf:&mut [u8]) -> Result<usize, GnssError> {
		match self.reader.as_mut() {
			Some(r) => fill(r, buf),
			None    => Err(GnssError::SourceUnavailable(format!("{} is not open", self.path.display()))),
		}
	}

	fn close(&mut self) { self.reader = None; }

}

/// Moves blocks from `src` into `ring` until the source runs dry or `stop` is raised.
///
/// With `block_period` set, pushes are paced so that block `k` is not pushed before `k * block_period`
/// has elapsed, which emulates a live front end when replaying a file. Every block goes past `monitor`
/// before it is pushed. Returns the number of blocks pushed.
pub fn run_producer(src:&mut dyn SampleSource, ring:&SampleRing, stop:&AtomicBool, block_period:Option<Duration>,
	monitor:Option<&JammingMonitor>) -> Result<u64, GnssError> {
	if let Err(e) = src.open() {
		ring.close();
		return Err(e);
	}

	let mut block:Vec<u8> = vec![0u8; ring.block_bytes()];
	let mut n_blocks:u64 = 0;
	let start = Instant::now();

	let result = loop {
		if stop.load(Ordering::Relaxed) { break Ok(n_blocks); }

		let n = match src.read_block(&mut block) {
			Ok(n) => n,
			Err(e) => break Err(e),
		};
		if n < block.len() {
			if n > 0 { debug!("Dropping {} trailing bytes that do not fill a block", n); }
			info!("End of sample stream after {} blocks", n_blocks);
			break Ok(n_blocks);
		}

		if let Some(period) = block_period {
			let due = start + period * (n_blocks as u32);
			let now = Instant::now();
			if due > now { std::thread::sleep(due - now); }
		}

		if let Some(m) = monitor { m.observe(&block, n_blocks * (ring.block_samples() as u64)); }
		if let Err(e) = ring.push(&block) { break Err(e); }
		n_blocks += 1;
	};

	src.close();
	ring.close();
	result
}

#[cfg(test)]
mod tests {

	use std::io::Cursor;

	use super::*;

	#[test]
	fn producer_pushes_whole_blocks_then_closes() {
		let bytes:Vec<u8> = (0..100u8).collect();
		let mut src = BufferedSource::new(Cursor::new(bytes));
		let ring = SampleRing::new(16, 8, 2);
		let stop = AtomicBool::new(false);

		// 100 bytes at 32 bytes per block is three full blocks plus a dropped tail
		assert_eq!(run_producer(&mut src, &ring, &stop, None, None), Ok(3));
		assert_eq!(ring.samples_written(), 48);
		assert!(ring.is_closed());
		assert_eq!(ring.read(16, 1).unwrap(), vec![32, 33]);
	}

	#[test]
	fn producer_reports_a_jamming_burst() {
		// Offset-binary noise floor of 2.5 LSB per rail, then 16 blocks at 30.5, then quiet again
		let block = |a:u8| -> Vec<u8> { (0..16).flat_map(|_| vec![130 + a, 125 - a]).collect() };
		let mut bytes:Vec<u8> = vec![];
		for k in 0..48 { bytes.extend(block(if (16..32).contains(&k) { 28 } else { 0 })); }

		let cfg = crate::config::JammingConfig{ enabled: true, power_threshold: 120.0, release_ratio: 0.8 };
		let monitor = JammingMonitor::new(SampleFormat::ComplexU8, &cfg);
		let ring = SampleRing::new(16, 64, 2);
		let stop = AtomicBool::new(false);
		assert_eq!(run_producer(&mut BufferedSource::new(Cursor::new(bytes)), &ring, &stop, None, Some(&monitor)), Ok(48));

		let st = monitor.state();
		assert!(!st.jamming);
		assert_eq!(st.episodes, 1);
		assert_eq!((st.onset_sample, st.end_sample), (Some(16*16), Some(32*16)));
		assert_eq!(st.power, 12.5);
	}

	#[test]
	fn missing_file_is_source_unavailable() {
		let mut src = FileSource::new("/nonexistent/capture.bin");
		match src.open() {
			Err(GnssError::SourceUnavailable(_)) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn format_widths() {
		assert_eq!(SampleFormat::Real.bytes_per_sample(), 1);
		assert_eq!(SampleFormat::Complex.bytes_per_sample(), 2);
		assert_eq!(SampleFormat::ComplexU8.bytes_per_sample(), 2);
	}

	#[test]
	fn sample_values_by_format() {
		let bytes = [0x00u8, 0xFF, 0x80, 0x7F];
		assert_eq!(SampleFormat::Real.iq2(&bytes, 1), (-2, 0));
		assert_eq!(SampleFormat::Complex.iq2(&bytes, 1), (-256, 254));
		// Offset binary: 0 is -127.5, 255 is +127.5, 128 and 127 straddle zero
		assert_eq!(SampleFormat::ComplexU8.iq2(&bytes, 0), (-255, 255));
		assert_eq!(SampleFormat::ComplexU8.iq2(&bytes, 1), (1, -1));

		assert_eq!(SampleFormat::ComplexU8.mean_power(&bytes[2..]), 0.5);
		assert_eq!(SampleFormat::Complex.mean_power(&[3, 4, 0xFD, 0xFC]), 25.0);
	}

	#[test]
	fn format_names_round_trip_through_json() {
		for (fmt, name) in [(SampleFormat::Real, "\"real\""), (SampleFormat::Complex, "\"complex\""), (SampleFormat::ComplexU8, "\"complex_u8\"")].iter() {
			assert_eq!(&serde_json::to_string(fmt).unwrap(), name);
			assert_eq!(serde_json::from_str::<SampleFormat>(name).unwrap(), *fmt);
		}
	}

}
