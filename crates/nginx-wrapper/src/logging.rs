use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{bail, Context};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use wrapper_core::Settings;

/// Parses a `log.level` value. Accepts the names used by both logrus
/// style configs and tracing.
pub fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
	Ok(match level.trim().to_ascii_lowercase().as_str() {
		"trace" => LevelFilter::TRACE,
		"debug" => LevelFilter::DEBUG,
		"info" => LevelFilter::INFO,
		"warn" | "warning" => LevelFilter::WARN,
		"error" | "fatal" | "panic" => LevelFilter::ERROR,
		"off" => LevelFilter::OFF,
		other => bail!("invalid log level ({}) specified in log.level", other),
	})
}

fn writer(destination: &str) -> anyhow::Result<BoxMakeWriter> {
	Ok(match destination.to_ascii_uppercase().as_str() {
		"" | "STDOUT" => BoxMakeWriter::new(std::io::stdout),
		"STDERR" => BoxMakeWriter::new(std::io::stderr),
		_ => {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(destination)
				.with_context(|| format!("unable to open log destination ({})", destination))?;
			BoxMakeWriter::new(Mutex::new(file))
		}
	})
}

/// Installs the global subscriber from the `log.*` settings and returns
/// the most verbose level it lets through. `RUST_LOG` takes precedence
/// over `log.level`.
pub fn init(settings: &Settings) -> anyhow::Result<LevelFilter> {
	let level = parse_level(&settings.get_string("log.level"))?;
	let writer = writer(&settings.get_string("log.destination"))?;
	let full_timestamp = settings.get_bool("log.formatter_options.full_timestamp");

	let layer = match settings.get_string("log.formatter_name").as_str() {
		"JSONFormatter" => fmt::layer().json().with_writer(writer).boxed(),
		"TextFormatter" | "" if full_timestamp => fmt::layer().with_writer(writer).boxed(),
		"TextFormatter" | "" => fmt::layer()
			.with_timer(fmt::time::Uptime::default())
			.with_writer(writer)
			.boxed(),
		other => bail!("unknown log formatter ({}) specified in log.formatter_name", other),
	};

	let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
	tracing_subscriber::registry()
		.with(layer)
		.with(filter)
		.try_init()
		.context("unable to install log subscriber")?;

	Ok(LevelFilter::current())
}
