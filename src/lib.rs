
use thiserror::Error;

pub mod config;
pub mod filters;
pub mod gnss;
pub mod io;
pub mod receiver;

pub mod utils;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum GnssError {
	#[error("invalid configuration: {0}")]
	ConfigInvalid(String),
	#[error("sample source unavailable: {0}")]
	SourceUnavailable(String),
	#[error("channel initialization failed: {0}")]
	ChannelInit(String),
	#[error("stale read at sample {offset}, oldest retained sample is {oldest}")]
	StaleRead{ offset:u64, oldest:u64 },
	#[error("samples up to {end} not yet written, {written} available")]
	NotYetAvailable{ end:u64, written:u64 },
	#[error("acquisition failed for PRN {prn}, peak ratio {peak_ratio:.2}")]
	AcquisitionFailed{ prn:usize, peak_ratio:f64 },
	#[error("navigation bit or frame sync lost")]
	SyncLost,
	#[error("navigation decode failed: {0}")]
	DecodeFailed(&'static str),
	#[error("ephemeris missing or stale")]
	EphemerisStale,
	#[error("satellite elevation {0:.1} [deg] below mask")]
	LowElevation(f64),
	#[error("SNR {0:.1} [dB-Hz] below threshold")]
	LowSnr(f64),
	#[error("position solution rejected: {0}")]
	SolverDiverged(&'static str),
	#[error("{0} usable satellites, need at least 4")]
	InsufficientSatellites(usize),
	#[error("invalid telemetry data: {0}")]
	InvalidTelemetryData(&'static str),
}

impl GnssError {

	/// Only these abort the receiver; every other kind is recovered by the component that raised it.
	pub fn is_fatal(&self) -> bool {
		matches!(self, GnssError::ConfigInvalid(_) | GnssError::SourceUnavailable(_) | GnssError::ChannelInit(_))
	}

}

impl From<std::io::Error> for GnssError {
	fn from(e:std::io::Error) -> Self { GnssError::SourceUnavailable(e.to_string()) }
}
