use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wrapper_events::{EventStateTracker, FatalEventError};

use crate::monitor::fatal_exit;

const NGINX_PREFIX: &str = "nginx: ";

/// One line of nginx output split into its severity and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NginxLogLine<'a> {
	pub level: Option<&'a str>,
	pub message: &'a str,
}

/// Splits a line nginx wrote to stdout or stderr.
///
/// nginx writes `[level] pid#tid: text` to its error log and prefixes
/// messages printed before the log is open with `nginx: `. The message is
/// whatever follows the first `]`, or the whole line when there is none.
/// Blank lines yield `None`.
pub fn parse_nginx_log_line(line: &str) -> Option<NginxLogLine<'_>> {
	let line = line.strip_prefix(NGINX_PREFIX).unwrap_or(line).trim();
	if line.is_empty() {
		return None;
	}

	let close = line.find(']');
	let level = match (line.find('['), close) {
		(Some(open), Some(close)) if open < close => Some(&line[open + 1..close]),
		_ => None,
	};
	let message = match close {
		Some(close) => line[close + 1..].trim_start(),
		None => line,
	};
	Some(NginxLogLine { level, message })
}

impl NginxLogLine<'_> {
	/// Re-logs the line at the tracing level matching nginx's severity.
	pub fn emit(&self) {
		match self.level.map(str::to_ascii_lowercase).as_deref() {
			Some("emerg" | "alert" | "crit" | "error") => tracing::error!(target: "nginx", "{}", self.message),
			Some("warn" | "warning") => tracing::warn!(target: "nginx", "{}", self.message),
			Some("debug") => tracing::debug!(target: "nginx", "{}", self.message),
			_ => tracing::info!(target: "nginx", "{}", self.message),
		}
	}
}

/// Logs each received line and feeds it to the tracker, in arrival order.
/// Stops at the first fatal trigger failure.
pub async fn process_lines(
	mut lines: mpsc::UnboundedReceiver<String>,
	tracker: &mut EventStateTracker,
) -> Result<(), FatalEventError> {
	while let Some(line) = lines.recv().await {
		let Some(parsed) = parse_nginx_log_line(&line) else {
			continue;
		};
		parsed.emit();
		tracker.parse_for_triggerable_event(parsed.message).await?;
	}
	Ok(())
}

/// Reads nginx's stdout and stderr line by line and hands the lines to a
/// single consumer. The returned task ends when both streams close.
pub fn spawn_log_pump<O, E>(stdout: O, stderr: E, mut tracker: EventStateTracker) -> JoinHandle<()>
where
	O: AsyncRead + Unpin + Send + 'static,
	E: AsyncRead + Unpin + Send + 'static,
{
	let (tx, rx) = mpsc::unbounded_channel();
	tokio::spawn(read_lines(stdout, tx.clone()));
	tokio::spawn(read_lines(stderr, tx));

	tokio::spawn(async move {
		if let Err(e) = process_lines(rx, &mut tracker).await {
			fatal_exit(e);
		}
	})
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		match read_line_lossy(&mut reader, &mut buf).await {
			Ok(Some(line)) => {
				if tx.send(line).is_err() {
					break;
				}
			}
			Ok(None) => break,
			Err(e) => {
				tracing::warn!("error reading nginx output: {}", e);
				break;
			}
		}
	}
}

/// Reads one line, dropping the trailing `\n` or `\r\n`. Bytes that are not
/// valid UTF-8 become U+FFFD instead of failing the read, so a stray byte
/// in a child's output doesn't end the stream. `None` means end of input.
pub(crate) async fn read_line_lossy<R: AsyncBufRead + Unpin>(
	reader: &mut R,
	buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
	buf.clear();
	if reader.read_until(b'\n', buf).await? == 0 {
		return Ok(None);
	}
	if buf.last() == Some(&b'\n') {
		buf.pop();
		if buf.last() == Some(&b'\r') {
			buf.pop();
		}
	}
	Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use wrapper_events::{EventKind, EventRegistry, Trigger};

	#[test]
	fn splits_level_and_message() {
		let parsed = parse_nginx_log_line("2024/01/01 10:00:00 [notice] 11#11: start worker processes").unwrap();
		assert_eq!(parsed.level, Some("notice"));
		assert_eq!(parsed.message, "11#11: start worker processes");
	}

	#[test]
	fn strips_nginx_prefix() {
		let parsed = parse_nginx_log_line("nginx: [warn] the \"user\" directive makes sense only as root  ").unwrap();
		assert_eq!(parsed.level, Some("warn"));
		assert_eq!(parsed.message, "the \"user\" directive makes sense only as root");
	}

	#[test]
	fn unbracketed_line_is_kept_whole() {
		let parsed = parse_nginx_log_line("configuration file test is successful").unwrap();
		assert_eq!(parsed.level, None);
		assert_eq!(parsed.message, "configuration file test is successful");

		let reversed = parse_nginx_log_line("odd ] then [ text").unwrap();
		assert_eq!(reversed.level, None);
		assert_eq!(reversed.message, "then [ text");
	}

	#[test]
	fn blank_lines_are_skipped() {
		assert_eq!(parse_nginx_log_line(""), None);
		assert_eq!(parse_nginx_log_line("nginx:   "), None);
	}

	#[tokio::test]
	async fn process_lines_feeds_the_tracker() {
		let events = Arc::new(EventRegistry::new());
		let mut tracker = EventStateTracker::new(events);
		let (tx, rx) = mpsc::unbounded_channel();
		for line in [
			"2024/01/01 10:00:00 [notice] 1#1: start worker processes",
			"",
			"2024/01/01 10:00:00 [notice] 1#1: start worker process 7",
			"2024/01/01 10:00:00 [notice] 1#1: start worker process 8",
		] {
			tx.send(line.to_string()).unwrap();
		}
		drop(tx);

		process_lines(rx, &mut tracker).await.unwrap();
		assert_eq!(tracker.worker_count(), 2);
	}

	#[tokio::test]
	async fn lossy_reader_survives_invalid_utf8() {
		let input: &[u8] = b"ok\r\nbad \xff byte\nlast";
		let mut reader = BufReader::new(input);
		let mut buf = Vec::new();
		assert_eq!(read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(), Some("ok"));
		assert_eq!(
			read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(),
			Some("bad \u{fffd} byte")
		);
		assert_eq!(read_line_lossy(&mut reader, &mut buf).await.unwrap().as_deref(), Some("last"));
		assert_eq!(read_line_lossy(&mut reader, &mut buf).await.unwrap(), None);
	}

	#[tokio::test]
	async fn log_pump_keeps_reading_after_invalid_utf8() {
		let events = Arc::new(EventRegistry::new());
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		events.add_trigger(
			EventKind::StartWorker,
			Trigger::new("test.count-workers", move |_| {
				let counter = Arc::clone(&counter);
				async move {
					counter.fetch_add(1, Ordering::SeqCst);
					Ok(())
				}
			}),
		);

		let stdout = std::io::Cursor::new(
			b"[notice] 1#1: \xff\xfe garbled\n[notice] 1#1: start worker processes\n[notice] 1#1: start worker process 7\n"
				.to_vec(),
		);
		let stderr = std::io::Cursor::new(Vec::new());
		let tracker = EventStateTracker::new(Arc::clone(&events));

		spawn_log_pump(stdout, stderr, tracker).await.unwrap();
		assert_eq!(fired.load(Ordering::SeqCst), 1);
	}
}
