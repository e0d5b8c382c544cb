use std::sync::{Mutex, MutexGuard};

pub mod bools_to_int;
pub mod kinematics;

/// Shared tables hold plain data, so a task that panicked mid-update leaves nothing half-built behind
pub fn lock<T>(m:&Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sample clock that counts whole cycles from a reference so the elapsed time never accumulates
/// floating point rounding
#[derive(Debug, Clone, Copy)]
pub struct IntegerClock {
	start_time: f64,
	clock_rate_hz: f64,
	cycles: u64
}

impl IntegerClock {

	pub fn new(clock_rate_hz: f64) -> Self {
		Self{ start_time: 0.0, clock_rate_hz, cycles: 0 }
	}

	pub fn set_cycles(&mut self, cycles:u64) { self.cycles = cycles; }

	pub fn time(&self) -> f64 { self.start_time + ((self.cycles as f64)/self.clock_rate_hz) }

}
