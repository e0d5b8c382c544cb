use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::GnssError;

/// Circular byte buffer shared between the sample producer and every channel task.
///
/// Samples are addressed by an absolute index that counts from the first sample ever pushed.
/// The producer appends whole blocks and the oldest block is overwritten once the ring is full.
/// Readers name the absolute window they want and get either a copy of it or an error saying the
/// window has already been overwritten or has not been written yet.
pub struct SampleRing {
	inner: Mutex<RingInner>,
	available: Condvar,
	bytes_per_sample: usize,
	block_samples: usize,
	n_blocks: usize,
}

struct RingInner {
	buf: Vec<u8>,
	blocks_written: u64,
	closed: bool,
}

impl SampleRing {

	pub fn new(block_samples:usize, n_blocks:usize, bytes_per_sample:usize) -> Self {
		let buf = vec![0u8; block_samples * n_blocks * bytes_per_sample];
		Self { inner: Mutex::new(RingInner{ buf, blocks_written: 0, closed: false }), available: Condvar::new(),
			bytes_per_sample, block_samples, n_blocks }
	}

	pub fn block_bytes(&self) -> usize { self.block_samples * self.bytes_per_sample }
	pub fn block_samples(&self) -> usize { self.block_samples }
	pub fn bytes_per_sample(&self) -> usize { self.bytes_per_sample }
	pub fn capacity_samples(&self) -> u64 { (self.block_samples * self.n_blocks) as u64 }

	fn lock(&self) -> MutexGuard<RingInner> {
		// A panicking producer cannot leave the buffer logically inconsistent, so a poisoned lock is still usable
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn written(&self, inner:&RingInner) -> u64 { inner.blocks_written * (self.block_samples as u64) }

	/// Absolute index one past the newest written sample
	pub fn samples_written(&self) -> u64 {
		let inner = self.lock();
		self.written(&inner)
	}

	pub fn is_closed(&self) -> bool { self.lock().closed }

	pub fn push(&self, block:&[u8]) -> Result<(), GnssError> {
		if block.len() != self.block_bytes() {
			return Err(GnssError::ConfigInvalid(format!("ring block is {} bytes, got {}", self.block_bytes(), block.len())));
		}
		{
			let mut inner = self.lock();
			let start = ((inner.blocks_written % (self.n_blocks as u64)) as usize) * self.block_bytes();
			inner.buf[start..start + block.len()].copy_from_slice(block);
			inner.blocks_written += 1;
		}
		self.available.notify_all();
		Ok(())
	}

	/// Marks the end of the stream and wakes every waiting reader
	pub fn close(&self) {
		self.lock().closed = true;
		self.available.notify_all();
	}

	/// Copies `len` samples starting at absolute sample `offset`
	pub fn read(&self, offset:u64, len:usize) -> Result<Vec<u8>, GnssError> {
		let inner = self.lock();
		let written = self.written(&inner);
		let cap = self.capacity_samples();
		let oldest = written.saturating_sub(cap);

		if offset < oldest {
			return Err(GnssError::StaleRead{ offset, oldest });
		}
		let end = offset + (len as u64);
		if end > written {
			return Err(GnssError::NotYetAvailable{ end, written });
		}

		let bps = self.bytes_per_sample;
		let start_byte = ((offset % cap) as usize) * bps;
		let n_bytes = len * bps;
		let first = n_bytes.min(inner.buf.len() - start_byte);

		let mut ans:Vec<u8> = Vec::with_capacity(n_bytes);
		ans.extend_from_slice(&inner.buf[start_byte..start_byte + first]);
		ans.extend_from_slice(&inner.buf[..n_bytes - first]);
		Ok(ans)
	}

	/// Blocks until samples up to (not including) `end` are written, the ring is closed, or `timeout`
	/// passes. Returns true when the samples are available.
	pub fn wait_until_available(&self, end:u64, timeout:Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut inner = self.lock();
		loop {
			if self.written(&inner) >= end { return true; }
			if inner.closed { return false; }
			let now = Instant::now();
			if now >= deadline { return false; }
			inner = match self.available.wait_timeout(inner, deadline - now) {
				Ok((guard, _)) => guard,
				Err(poisoned) => poisoned.into_inner().0,
			};
		}
	}

}
