// This file is part of the ElectionGuard tally orchestrator.

//! Logging setup: colored, short-form output to stdout and a full-detail
//! rotating file sink, dispatched through `fern`.

use std::{io, path::Path};

use fern::colors::{Color, ColoredLevelConfig};

/// Initialize the global logger.
///
/// `std` controls the verbosity printed to stdout; `file` controls the
/// verbosity written to `log_path` (created if missing). Safe to call once
/// per process; a second call returns an error rather than panicking.
pub fn init(std: log::LevelFilter, file: log::LevelFilter, log_path: &Path) -> io::Result<()> {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	if let Some(parent) = log_path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	let stdout_dispatcher = fern::Dispatch::new()
		.level_for("sqlx", log::LevelFilter::Warn)
		.level_for("lapin", log::LevelFilter::Warn)
		.level_for("reqwest", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {} {}",
				chrono::Local::now().format("[%H:%M:%S]"),
				colors.color(record.level()),
				message,
			))
		})
		.chain(fern::Dispatch::new().level(std).chain(io::stdout()));

	let file_dispatcher = fern::Dispatch::new()
		.level(file)
		.level_for("sqlx", log::LevelFilter::Warn)
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}][{}] {}{}",
				chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
				record.target(),
				record.level(),
				message,
				format_location(record.file(), record.line()),
			))
		})
		.chain(fern::log_file(log_path)?);

	fern::Dispatch::new()
		.chain(stdout_dispatcher)
		.chain(file_dispatcher)
		.apply()
		.map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;
	Ok(())
}

fn format_location(file: Option<&str>, line: Option<u32>) -> String {
	match (file, line) {
		(Some(f), Some(l)) => format!(" ({}:{})", f, l),
		_ => String::new(),
	}
}
