
use serde::{Serialize, Deserialize};

/// Spreading code generation and FFT templates
pub mod code;

/// Carrier wipe-off and multi-tap code correlation
pub mod correlator;

/// FFT-based search over code phase and Doppler
pub mod acquisition;

/// Carrier and code tracking loops
pub mod tracking;

/// Bit sync, frame sync, and message decoding
pub mod telemetry_decode;

pub mod pvt;

pub mod observation;

pub mod channel;

pub const L1_CARRIER_HZ:f64 = 1575.42e6;

/// Nominal signal travel time assigned to the closest satellite when pseudoranges are formed [ms]
pub const NOMINAL_TRAVEL_TIME_MS:f64 = 68.802;

/// Signals this receiver knows how to acquire, track and decode
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
	GpsL1Ca,
	SbasL1,
}

impl Signal {

	pub fn code_len(&self) -> usize { 1023 }

	/// [chips/sec]
	pub fn chip_rate(&self) -> f64 { 1.023e6 }

	/// [sec]
	pub fn code_period(&self) -> f64 { 1.0e-3 }

	pub fn carrier_hz(&self) -> f64 { L1_CARRIER_HZ }

	pub fn is_valid_prn(&self, prn:usize) -> bool {
		match self {
			Signal::GpsL1Ca => (1..=32).contains(&prn),
			Signal::SbasL1  => (120..=158).contains(&prn),
		}
	}

	/// Code periods between loop filter updates once bit sync is achieved
	pub fn loop_periods(&self) -> usize {
		match self {
			Signal::GpsL1Ca => 10,
			Signal::SbasL1  => 2,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Signal::GpsL1Ca => "L1CA",
			Signal::SbasL1  => "SBAS",
		}
	}

}

impl std::fmt::Display for Signal {
	fn fmt(&self, f:&mut std::fmt::Formatter) -> std::fmt::Result { write!(f, "{}", self.name()) }
}
