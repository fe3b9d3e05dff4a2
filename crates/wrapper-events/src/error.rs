use std::num::ParseIntError;

use thiserror::Error;

use crate::event::EventKind;

/// A log line that does not carry the `<pid>#<tid>:` prefix nginx writes
/// in front of every error log message.
#[derive(Debug, Error)]
pub enum LogParseError {
	#[error("unable to find expected colon in message: {line}")]
	MissingColon { line: String },

	#[error("unable to find expected hash in message: {line}")]
	MissingHash { line: String },

	#[error("hash is beyond colon position - can't parse: {line}")]
	HashAfterColon { line: String },

	#[error("invalid {field} in message: {line}")]
	InvalidNumber {
		field: &'static str,
		line: String,
		#[source]
		source: ParseIntError,
	},
}

#[derive(Debug, Error)]
pub enum EventError {
	#[error("unknown event name ({name})")]
	UnknownEvent { name: String },
}

/// Returned when triggers for an event that the supervisor can't recover
/// from (everything except `exit-worker`) report errors. Callers are
/// expected to log every error and terminate the process.
#[derive(Debug, Error)]
#[error("{event} event trigger caused {} error(s)", .errors.len())]
pub struct FatalEventError {
	pub event: EventKind,
	pub errors: Vec<anyhow::Error>,
}

impl FatalEventError {
	pub fn new(event: EventKind, errors: Vec<anyhow::Error>) -> Self {
		Self { event, errors }
	}

	/// Logs every trigger error with its full cause chain.
	pub fn log(&self) {
		for err in &self.errors {
			tracing::error!(event = %self.event, "{:#}", err);
		}
		tracing::error!("{}", self);
	}
}
