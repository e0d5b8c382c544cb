
use serde::{Serialize, Deserialize};

use crate::gnss::Signal;
use crate::gnss::observation::ObservationTable;
use crate::gnss::pvt::Fix;
use crate::io::jamming::JammingState;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelStatus {
	pub prn: usize,
	pub signal: Signal,
	pub acquired: bool,
	pub bit_synced: bool,
	pub decoded: bool,
	pub snr: f64,       // [dB-Hz]
	pub doppler: f64,   // [Hz]
	pub resets: u64,
}

/// Periodic picture of the whole receiver
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusSnapshot {
	/// Signal time consumed from the source [sec]
	pub elapsed_s: f64,
	pub channels: Vec<ChannelStatus>,
	/// Newest accepted fix
	pub fix: Option<Fix>,
	/// Fixes accepted since the start of the run
	pub fix_count: u64,
	pub stale_reads: u64,
	pub jamming: JammingState,
}

impl StatusSnapshot {

	pub fn capture(table:&ObservationTable, fix:Option<Fix>, elapsed_s:f64) -> Self {
		let channels = table.channels.iter().map(|c| ChannelStatus{
			prn: c.prn, signal: c.signal,
			acquired: c.acquired, bit_synced: c.bit_synced, decoded: c.decoded,
			snr: c.snr, doppler: c.doppler, resets: c.resets,
		}).collect();
		Self{ elapsed_s, channels, fix, fix_count: 0, stale_reads: table.stale_reads, jamming: JammingState::default() }
	}

	pub fn tracked(&self) -> usize { self.channels.iter().filter(|c| c.acquired).count() }

	pub fn decoded(&self) -> usize { self.channels.iter().filter(|c| c.decoded).count() }

	pub fn resets(&self) -> u64 { self.channels.iter().map(|c| c.resets).sum() }

}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::config::ChannelConfig;

	#[test]
	fn snapshot_counts_channel_states() {
		let cfgs:Vec<ChannelConfig> = vec![
			ChannelConfig{ prn: 5, signal: Signal::GpsL1Ca },
			ChannelConfig{ prn: 12, signal: Signal::GpsL1Ca },
			ChannelConfig{ prn: 131, signal: Signal::SbasL1 },
		];
		let mut table = ObservationTable::new(&cfgs);
		table.channels[0].acquired = true;
		table.channels[0].decoded = true;
		table.channels[2].acquired = true;
		table.reset_channel(1);
		table.stale_reads = 2;

		let snap = StatusSnapshot::capture(&table, None, 12.5);
		assert_eq!(snap.tracked(), 2);
		assert_eq!(snap.decoded(), 1);
		assert_eq!(snap.resets(), 1);
		assert_eq!(snap.stale_reads, 2);

		let json = serde_json::to_string(&snap).unwrap();
		let back:StatusSnapshot = serde_json::from_str(&json).unwrap();
		assert_eq!(back, snap);
	}

}
