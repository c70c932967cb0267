//! Tether operator shell.
//!
//! Starts a host from a config file and runs console commands read from
//! stdin, one per line.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tether_host::{Host, HostConfig};
use tracing::info;

/// Shell command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Plugin host shell with an inspectable handle table")]
#[command(version)]
struct Args {
	/// Host configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => HostConfig::load(path)
			.with_context(|| format!("loading {}", path.display()))?,
		None => HostConfig::default(),
	};
	let mut host = Host::new(config).context("starting host")?;

	let stdin = std::io::stdin();
	for line in stdin.lock().lines() {
		let line = line.context("reading stdin")?;
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		if matches!(line, "quit" | "exit") {
			break;
		}
		match host.console(line) {
			Ok(output) => {
				for out in output {
					println!("{out}");
				}
			}
			Err(error) => eprintln!("{error}"),
		}
	}

	info!("shutting down");
	host.shutdown();
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("tether=trace,tether_handles=trace,tether_host=debug,info")
		} else {
			EnvFilter::new("tether=warn,tether_handles=info,tether_host=info,warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
