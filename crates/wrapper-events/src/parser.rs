//! Extraction of process ids from nginx error log lines.
//!
//! nginx prefixes every error log message with `<pid>#<tid>: `. The parsers
//! here are intentionally small suffix/prefix matchers rather than a full
//! grammar of the log format.

use crate::error::LogParseError;

/// Maximum number of digits in a 64-bit process id.
pub const MAX_PID_WIDTH: usize = 19;

const START_WORKER_PROCESS: &str = "start worker process ";

/// Parses the `<pid>#<tid>:` prefix of an nginx log message.
pub fn parse_pid_and_tid(line: &str) -> Result<(i64, i64), LogParseError> {
	let colon = line.find(':').ok_or_else(|| LogParseError::MissingColon {
		line: line.to_string(),
	})?;
	let hash = line.find('#').ok_or_else(|| LogParseError::MissingHash {
		line: line.to_string(),
	})?;

	if hash >= colon {
		return Err(LogParseError::HashAfterColon {
			line: line.to_string(),
		});
	}

	let pid = parse_field(&line[..hash], "pid", line)?;
	let tid = parse_field(&line[hash + 1..colon], "tid", line)?;

	Ok((pid, tid))
}

fn parse_field(text: &str, field: &'static str, line: &str) -> Result<i64, LogParseError> {
	text.parse::<i64>().map_err(|source| LogParseError::InvalidNumber {
		field,
		line: line.to_string(),
		source,
	})
}

/// Returns the worker pid from a line ending in `start worker process <pid>`,
/// or -1 when the line doesn't end that way.
///
/// Only the last `len("start worker process ") + MAX_PID_WIDTH` characters
/// are inspected, so arbitrarily long leading text costs nothing. Trailing
/// whitespace is ignored. A digit run longer than [`MAX_PID_WIDTH`] is
/// rejected rather than truncated.
pub fn extract_pid_from_start_worker_process(text: &str) -> i64 {
	let window = START_WORKER_PROCESS.len() + MAX_PID_WIDTH;
	let literal = START_WORKER_PROCESS.as_bytes();

	let mut chars = text.chars().rev().take(window).peekable();
	while chars.next_if(|c| c.is_whitespace()).is_some() {}

	let mut digits = String::with_capacity(MAX_PID_WIDTH);
	while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
		if digits.len() >= MAX_PID_WIDTH {
			return -1;
		}
		digits.insert(0, c);
	}

	if digits.is_empty() {
		return -1;
	}

	for expected in literal.iter().rev() {
		match chars.next() {
			Some(c) if c == char::from(*expected) => {}
			_ => return -1,
		}
	}

	digits.parse::<i64>().unwrap_or(-1)
}
