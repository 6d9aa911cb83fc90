#[macro_use] extern crate serde_derive;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, Command};
use tokio::sync::watch;

use log::warn;

use crate::common::Options;
use crate::rest_api::HttpTransport;
use crate::tester::Tester;

mod common;
mod config;
mod error;
mod playback;
mod profiler;
mod rest_api;
mod session;
mod streamer;
mod tester;



fn cli() -> Command {
	Command::new("eagle-eye-tester")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Tests the fetching of Eagle Eye live streams.")
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.required(true)
				.value_parser(value_parser!(PathBuf))
				.help("The JSON configuration file")
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.help("Print request timings and other details while executing")
		)
		.subcommand_required(true)
		.subcommand(
			Command::new("stream")
				.about("Stream a camera indefinitely, reconnecting whenever the stream drops")
				.arg(Arg::new("camera").required(true).help("Camera name from the config file"))
		)
		.subcommand(
			Command::new("latency")
				.about("Measure time to first byte for every configured camera")
				.arg(
					Arg::new("runs")
						.required(true)
						.value_parser(value_parser!(u32).range(1..))
						.help("Number of rounds over all cameras")
				)
		)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let matches = cli().get_matches();

	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let config_path = matches.get_one::<PathBuf>("config").context("No config file given")?;
	let options = Options { verbose: matches.get_flag("verbose") };
	let config = config::load(config_path)?;
	let tester = Tester::new(HttpTransport::new()?, config, options);

	match matches.subcommand() {
		Some(("stream", args)) => {
			let camera = args.get_one::<String>("camera").context("No camera given")?;
			stream(&tester, camera).await.context("Could not stream")?;
		},
		Some(("latency", args)) => {
			let runs = *args.get_one::<u32>("runs").context("No number of runs given")?;
			println!("Testing latency");
			let reports = tokio::select! {
				reports = tester.run_latency_test(runs) => reports.context("Could not complete latency test")?,
				_ = tokio::signal::ctrl_c() => bail!("Latency test interrupted"),
			};
			for report in reports {
				println!("{}", report);
			}
		},
		Some((other, _)) => bail!("Invalid command {}", other),
		None => bail!("No command given"),
	}

	anyhow::Ok(())
}

async fn stream(tester: &Tester<HttpTransport>, camera: &str) -> Result<(), error::TesterError> {
	let (stop, cancel) = watch::channel(false);
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				let _ = stop.send(true);
			},
			Err(err) => {
				warn!("Cannot listen for Ctrl+C; error was {}", err);
			},
		}
	});

	tester.run_streaming(camera, cancel).await
}
