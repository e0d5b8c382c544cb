
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::GnssError;
use crate::config::{PvtConfig, ReceiverConfig};
use crate::gnss::channel::Channel;
use crate::gnss::observation::ObservationTable;
use crate::gnss::pvt::{Fix, PvtSolver};
use crate::io::{self, JammingMonitor, SampleRing, SampleSource};
use crate::utils::{IntegerClock, lock};

pub mod status;


use self::status::StatusSnapshot;

/// Why a receiver run ended without a fatal error
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
	EndOfStream,
	Stopped,
}

/// State shared by the producer, the channels, the aggregator and the status task
#[derive(Clone)]
pub struct Shared {
	pub ring: Arc<SampleRing>,
	pub table: Arc<Mutex<ObservationTable>>,
	pub jamming: Arc<JammingMonitor>,
	/// Newest accepted fix
	pub fix: Arc<Mutex<Option<Fix>>>,
	/// Fixes accepted so far, each one also went out on the fix channel
	pub fix_count: Arc<AtomicU64>,
	pub stop: Arc<AtomicBool>,
}

impl Shared {

	pub fn new(cfg:&ReceiverConfig, stop:Arc<AtomicBool>) -> Self {
		Self{
			ring: Arc::new(SampleRing::new(cfg.ring.block_samples, cfg.ring.n_blocks, cfg.sample_format.bytes_per_sample())),
			table: Arc::new(Mutex::new(ObservationTable::new(&cfg.channels))),
			jamming: Arc::new(JammingMonitor::new(cfg.sample_format, &cfg.jamming)),
			fix: Arc::new(Mutex::new(None)),
			fix_count: Arc::new(AtomicU64::new(0)),
			stop,
		}
	}

	pub fn snapshot(&self, clock:&mut IntegerClock) -> StatusSnapshot {
		clock.set_cycles(self.ring.samples_written());
		let fix = lock(&self.fix).clone();
		StatusSnapshot{
			jamming: self.jamming.state(),
			fix_count: self.fix_count.load(Ordering::Relaxed),
			..StatusSnapshot::capture(&lock(&self.table), fix, clock.time())
		}
	}

}

/// Assembles the next observation epoch and solves it.  `None` means no new epoch was ready.
pub fn aggregate(table:&Mutex<ObservationTable>, solver:&mut PvtSolver, cfg:&PvtConfig) -> Option<Result<Fix, GnssError>> {
	let mut t = lock(table);
	let rx_tow = t.assemble(cfg.out_ms)?;

	let n = t.precheck(cfg);
	if n < 4 { return Some(Err(GnssError::InsufficientSatellites(n))); }
	let week = t.rows.iter().filter(|r| r.valid).map(|r| r.week).max().unwrap_or(0);

	let obs = t.pvt_inputs();
	Some(solver.solve(rx_tow, week, &obs).map(|soln| {
		t.apply_solution(&soln);
		soln.fix
	}))
}

fn initial_position(cfg:&PvtConfig) -> (f64, f64, f64) { cfg.initial_position.unwrap_or((0.0, 0.0, 0.0)) }

fn block_period(cfg:&ReceiverConfig) -> Option<Duration> {
	if cfg.playback_speed > 0.0 {
		Some(Duration::from_secs_f64((cfg.ring.block_samples as f64) / cfg.sample_rate_hz / cfg.playback_speed))
	} else {
		None
	}
}

fn spawn_aggregator(shared:Shared, cfg:PvtConfig, fix_tx:mpsc::Sender<Fix>, done:Arc<AtomicBool>) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut solver = PvtSolver::new(initial_position(&cfg));
		let mut listening = true;
		let mut interval = tokio::time::interval(Duration::from_millis(cfg.out_ms.max(1)));
		loop {
			interval.tick().await;
			let finished = done.load(Ordering::Relaxed);

			// Drain every epoch the channels have tagged since the last tick
			while let Some(result) = aggregate(&shared.table, &mut solver, &cfg) {
				match result {
					Ok(fix) => {
						debug!("Fix at TOW {:.3}: ({:.6}, {:.6}, {:.1}), GDOP {:.2}", fix.tow, fix.latitude, fix.longitude, fix.height, fix.gdop);
						*lock(&shared.fix) = Some(fix.clone());
						shared.fix_count.fetch_add(1, Ordering::Relaxed);
						if listening && fix_tx.send(fix).await.is_err() {
							warn!("Fix consumer has gone away, fixes are no longer delivered");
							listening = false;
						}
					},
					Err(e) => debug!("No fix this epoch: {}", e),
				}
			}

			if finished { break; }
		}
	})
}

fn spawn_status(shared:Shared, fs:f64, period_ms:u64, tx:mpsc::Sender<StatusSnapshot>, done:Arc<AtomicBool>) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut clock = IntegerClock::new(fs);
		let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
		loop {
			interval.tick().await;
			if done.load(Ordering::Relaxed) { break; }
			match tx.try_send(shared.snapshot(&mut clock)) {
				Ok(()) => {},
				Err(mpsc::error::TrySendError::Full(_)) => debug!("Status consumer is behind, snapshot dropped"),
				Err(mpsc::error::TrySendError::Closed(_)) => break,
			}
		}
	})
}

/// Runs the receiver over `source` until the stream ends or `stop` is raised.  Every accepted fix is sent on
/// `fix_tx`, waiting for room when the consumer is behind.  Status snapshots are sent on `status_tx` every
/// `status_period_ms` and dropped when the consumer is behind, plus a final one after every task has finished.
pub async fn run(cfg:ReceiverConfig, source:Box<dyn SampleSource>, stop:Arc<AtomicBool>,
	status_tx:mpsc::Sender<StatusSnapshot>, fix_tx:mpsc::Sender<Fix>) -> Result<StopReason, GnssError> {
	cfg.validate()?;

	let channels:Vec<Channel> = cfg.channels.iter().enumerate()
		.map(|(idx, ch)| Channel::new(idx, ch, &cfg))
		.collect::<Result<_, _>>()?;

	let shared = Shared::new(&cfg, stop);
	let done = Arc::new(AtomicBool::new(false));
	info!("Starting {} channels at {:.3} [Msps]", channels.len(), cfg.sample_rate_hz*1.0e-6);

	let producer:JoinHandle<Result<u64, GnssError>> = {
		let (ring, stop, jamming) = (shared.ring.clone(), shared.stop.clone(), shared.jamming.clone());
		let period = block_period(&cfg);
		let mut source = source;
		tokio::task::spawn_blocking(move || io::run_producer(source.as_mut(), &ring, &stop, period, Some(&*jamming)))
	};

	let channel_handles:Vec<JoinHandle<()>> = channels.into_iter().map(|mut ch| {
		let (ring, table, stop) = (shared.ring.clone(), shared.table.clone(), shared.stop.clone());
		tokio::task::spawn_blocking(move || ch.run(&ring, &table, &stop))
	}).collect();

	let aggregator = spawn_aggregator(shared.clone(), cfg.pvt.clone(), fix_tx, done.clone());
	let status = spawn_status(shared.clone(), cfg.sample_rate_hz, cfg.status_period_ms, status_tx.clone(), done.clone());

	let produced = match producer.await {
		Ok(result) => result,
		Err(e) => Err(GnssError::SourceUnavailable(format!("producer task failed: {}", e))),
	};
	let stopped = shared.stop.load(Ordering::Relaxed);
	if produced.is_err() {
		shared.stop.store(true, Ordering::Relaxed);
	}

	// Channels drain what is left in the ring once the producer has closed it
	for handle in channel_handles {
		if let Err(e) = handle.await { error!("Channel task failed: {}", e); }
	}
	shared.stop.store(true, Ordering::Relaxed);
	done.store(true, Ordering::Relaxed);

	if let Err(e) = aggregator.await { error!("Aggregator task failed: {}", e); }
	if let Err(e) = status.await { error!("Status task failed: {}", e); }

	let mut clock = IntegerClock::new(cfg.sample_rate_hz);
	if status_tx.send(shared.snapshot(&mut clock)).await.is_err() {
		debug!("Status consumer has gone away, final snapshot dropped");
	}

	let n_blocks = produced?;
	let reason = if stopped { StopReason::Stopped } else { StopReason::EndOfStream };
	info!("Receiver finished after {} blocks: {:?}", n_blocks, reason);
	Ok(reason)
}
