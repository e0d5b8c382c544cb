
extern crate clap;
extern crate colored;
extern crate rust_gnss_rx;

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Arg, App};
use colored::*;
use log::{error, warn};
use tokio::sync::mpsc;

use rust_gnss_rx::GnssError;
use rust_gnss_rx::config::{ChannelConfig, ReceiverConfig};
use rust_gnss_rx::gnss::Signal;
use rust_gnss_rx::gnss::pvt::Fix;
use rust_gnss_rx::io::{FileSource, SampleFormat};
use rust_gnss_rx::receiver::{self, StopReason};
use rust_gnss_rx::receiver::status::StatusSnapshot;

const EXIT_STOPPED:i32 = 2;
const EXIT_CONFIG:i32 = 3;
const EXIT_SOURCE:i32 = 4;
const EXIT_CHANNEL:i32 = 5;
const EXIT_OTHER:i32 = 1;

fn exit_code(e:&GnssError) -> i32 {
	match e {
		GnssError::ConfigInvalid(_)     => EXIT_CONFIG,
		GnssError::SourceUnavailable(_) => EXIT_SOURCE,
		GnssError::ChannelInit(_)       => EXIT_CHANNEL,
		_ => EXIT_OTHER,
	}
}

fn parse_prns(s:&str) -> Result<Vec<ChannelConfig>, GnssError> {
	s.split(',').map(|tok| {
		let prn:usize = tok.trim().parse().map_err(|_| GnssError::ConfigInvalid(format!("bad PRN '{}'", tok)))?;
		let signal = if prn >= 120 { Signal::SbasL1 } else { Signal::GpsL1Ca };
		Ok(ChannelConfig{ prn, signal })
	}).collect()
}

fn parse_f64(name:&str, s:&str) -> Result<f64, GnssError> {
	s.parse().map_err(|_| GnssError::ConfigInvalid(format!("{} must be a number, got '{}'", name, s)))
}

fn print_status(snap:&StatusSnapshot) {
	let line = format!("{:8.1} [sec]: {:2} tracked, {:2} decoded, {} fixes, {} resets, {} stale reads, power {:.1}",
		snap.elapsed_s, snap.tracked(), snap.decoded(), snap.fix_count, snap.resets(), snap.stale_reads, snap.jamming.power);
	eprintln!("{}", line.cyan());
	if snap.jamming.jamming {
		let since = snap.jamming.onset_sample.unwrap_or(0);
		eprintln!("{}", format!("    JAMMING since sample {}", since).red().bold());
	}
	for ch in snap.channels.iter().filter(|c| c.acquired) {
		let flags = format!("{}{}", if ch.bit_synced { "S" } else { "-" }, if ch.decoded { "D" } else { "-" });
		eprintln!("    {} PRN {:3} {} {:5.1} [dB-Hz] {:8.1} [Hz]", ch.signal, ch.prn, flags, ch.snr, ch.doppler);
	}
}

#[tokio::main]
async fn main() {

	env_logger::Builder::from_default_env()
		.format_timestamp_secs()
		.format_module_path(false)
		.init();

	let matches = App::new("GPS/SBAS L1 Software Receiver")
		.version("0.1.0")
		.about("Takes 8-bit samples of the L1 band and produces GPS fixes")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
			.required(true).takes_value(true))
		.arg(Arg::with_name("config")
			.short("c").long("config")
			.help("JSON receiver configuration, command line options override it")
			.takes_value(true))
		.arg(Arg::with_name("input_type")
			.short("t").long("type")
			.takes_value(true)
			.possible_values(&["real", "complex", "complex_u8"]))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true))
		.arg(Arg::with_name("if_hz").long("if_hz").takes_value(true)
			.help("Intermediate frequency [Hz], zero for baseband"))
		.arg(Arg::with_name("prns").short("p").long("prns").takes_value(true)
			.help("Comma-separated PRN list, 120 and above are tracked as SBAS"))
		.arg(Arg::with_name("playback_speed").long("playback_speed").takes_value(true)
			.help("Multiple of real time to replay the file at, 0 for as fast as possible"))
		.arg(Arg::with_name("jam_threshold").long("jam_threshold").takes_value(true)
			.help("Mean I^2 + Q^2 per sample that counts as jamming, 0 turns the monitor off"))
		.arg(Arg::with_name("json").long("json")
			.help("Print each new fix as a line of JSON on stdout"))
		.get_matches();

	let built:Result<(ReceiverConfig, String), GnssError> = (|| {
		let mut cfg = match matches.value_of("config") {
			Some(path) => ReceiverConfig::from_json_file(path)?,
			None => ReceiverConfig::default(),
		};
		if let Some(s) = matches.value_of("sample_rate_sps") { cfg.sample_rate_hz = parse_f64("sample rate", s)?; }
		if let Some(s) = matches.value_of("if_hz") { cfg.intermediate_freq_hz = parse_f64("IF", s)?; }
		if let Some(s) = matches.value_of("playback_speed") { cfg.playback_speed = parse_f64("playback speed", s)?; }
		if let Some(s) = matches.value_of("prns") { cfg.channels = parse_prns(s)?; }
		if let Some(s) = matches.value_of("jam_threshold") {
			let t = parse_f64("jamming threshold", s)?;
			if t == 0.0 { cfg.jamming.enabled = false; } else { cfg.jamming.power_threshold = t; }
		}
		match matches.value_of("input_type") {
			Some("complex") => cfg.sample_format = SampleFormat::Complex,
			Some("complex_u8") => cfg.sample_format = SampleFormat::ComplexU8,
			Some("real")    => cfg.sample_format = SampleFormat::Real,
			_ => {},
		}
		cfg.validate()?;
		let fname = matches.value_of("filename").unwrap_or_default().to_string();
		Ok((cfg, fname))
	})();

	let (cfg, fname) = match built {
		Ok(x) => x,
		Err(e) => {
			error!("{}", e);
			eprintln!("{}", format!("{}", e).red().bold());
			process::exit(exit_code(&e));
		},
	};
	let json = matches.is_present("json");

	eprintln!("Decoding {} at {} [samples/sec] with {} channels", &fname, cfg.sample_rate_hz, cfg.channels.len());

	let stop = Arc::new(AtomicBool::new(false));
	{
		let stop = stop.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				warn!("Interrupted, shutting down");
				stop.store(true, Ordering::Relaxed);
			}
		});
	}

	let (tx, mut rx) = mpsc::channel::<StatusSnapshot>(16);
	let printer = tokio::spawn(async move {
		while let Some(snap) = rx.recv().await { print_status(&snap); }
	});

	let (fix_tx, mut fix_rx) = mpsc::channel::<Fix>(64);
	let fix_printer = tokio::spawn(async move {
		while let Some(fix) = fix_rx.recv().await {
			if json {
				match serde_json::to_string(&fix) {
					Ok(s) => println!("{}", s),
					Err(e) => error!("Unable to serialize fix: {}", e),
				}
			} else {
				eprintln!("{}", format!("Position Fix: {:.5} [deg] lat, {:.5} [deg] lon, {:.1} [m], GDOP {:.2}, {} SVs",
					fix.latitude, fix.longitude, fix.height, fix.gdop, fix.sv_count).green().bold());
			}
		}
	});

	let result = receiver::run(cfg, Box::new(FileSource::new(fname)), stop, tx, fix_tx).await;
	if let Err(e) = printer.await { error!("Status printer failed: {}", e); }
	if let Err(e) = fix_printer.await { error!("Fix printer failed: {}", e); }

	match result {
		Ok(StopReason::EndOfStream) => eprintln!("{}", "End of sample stream".green()),
		Ok(StopReason::Stopped) => {
			eprintln!("{}", "Stopped".yellow());
			process::exit(EXIT_STOPPED);
		},
		Err(e) => {
			eprintln!("{}", format!("{}", e).red().bold());
			process::exit(exit_code(&e));
		},
	}

}
