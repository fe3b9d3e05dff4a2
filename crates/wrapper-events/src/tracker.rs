use std::sync::Arc;

use serde_json::json;

use crate::error::FatalEventError;
use crate::event::{EventKind, Metadata};
use crate::parser::{extract_pid_from_start_worker_process, parse_pid_and_tid};
use crate::registry::EventRegistry;

const START_WORKER_PROCESSES: &str = "start worker processes";
const EXIT: &str = " exit";

/// Where the tracker believes nginx is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
	NotStarted,
	AwaitingFirstWorker,
	Running,
	Reloading,
}

/// Turns nginx log lines into lifecycle events.
///
/// Lines must be fed in the order nginx wrote them, from a single task.
/// The tracker owns its counters exclusively; the only state shared with
/// other tasks is the registry's reload flag.
pub struct EventStateTracker {
	events: Arc<EventRegistry>,
	first_start_worker_processes_found: bool,
	first_start_worker_process_found: bool,
	worker_count: usize,
}

impl EventStateTracker {
	pub fn new(events: Arc<EventRegistry>) -> Self {
		Self {
			events,
			first_start_worker_processes_found: false,
			first_start_worker_process_found: false,
			worker_count: 0,
		}
	}

	pub fn events(&self) -> &Arc<EventRegistry> {
		&self.events
	}

	pub fn worker_count(&self) -> usize {
		self.worker_count
	}

	pub fn state(&self) -> TrackerState {
		if self.events.reload_flag().is_set() {
			TrackerState::Reloading
		} else if self.first_start_worker_process_found {
			TrackerState::Running
		} else if self.first_start_worker_processes_found {
			TrackerState::AwaitingFirstWorker
		} else {
			TrackerState::NotStarted
		}
	}

	/// Inspects one log line (with the `nginx: ` prefix and any level
	/// bracket already removed) and fires whatever events it implies.
	///
	/// Errors from `start`, `reload` and `start-worker` triggers are
	/// returned as a [`FatalEventError`]. Errors from `exit-worker`
	/// triggers are only logged.
	pub async fn parse_for_triggerable_event(&mut self, line: &str) -> Result<(), FatalEventError> {
		if !self.first_start_worker_processes_found && line.ends_with(START_WORKER_PROCESSES) {
			self.first_start_worker_processes_found = true;
			return Ok(());
		}

		if self.first_start_worker_processes_found {
			let worker_pid = extract_pid_from_start_worker_process(line);
			if worker_pid >= 0 {
				return self.parse_start_events(line, worker_pid).await;
			}
		}

		if line.ends_with(EXIT) && self.worker_count > 0 {
			let (worker_pid, worker_tid) = match parse_pid_and_tid(line) {
				Ok(ids) => ids,
				Err(e) => {
					tracing::warn!("{}", e);
					return Ok(());
				}
			};

			self.worker_count -= 1;
			let metadata = metadata(json!({
				"worker_pid": worker_pid,
				"worker_tid": worker_tid,
				"worker_count": self.worker_count,
			}));
			for err in self.events.trigger(EventKind::ExitWorker, metadata).await {
				tracing::warn!("{:#}", err);
			}
		}

		Ok(())
	}

	async fn parse_start_events(&mut self, line: &str, worker_pid: i64) -> Result<(), FatalEventError> {
		let (pid, tid) = parse_pid_and_tid(line).unwrap_or_else(|e| {
			tracing::warn!("{}", e);
			(-1, -1)
		});

		let reloading = self.events.reload_flag().is_set();

		if !self.first_start_worker_process_found && !reloading {
			self.fire(EventKind::Start, json!({ "pid": pid, "tid": tid })).await?;
			self.first_start_worker_process_found = true;
		} else if reloading {
			self.fire(EventKind::Reload, json!({ "pid": pid, "tid": tid })).await?;
			// Only cleared once the reload triggers have finished.
			self.events.reload_flag().clear();
		}

		self.worker_count += 1;
		self.fire(
			EventKind::StartWorker,
			json!({
				"worker_pid": worker_pid,
				"worker_tid": tid,
				"worker_count": self.worker_count,
			}),
		)
		.await
	}

	async fn fire(&self, kind: EventKind, metadata_value: serde_json::Value) -> Result<(), FatalEventError> {
		let errors = self.events.trigger(kind, metadata(metadata_value)).await;
		if errors.is_empty() {
			Ok(())
		} else {
			Err(FatalEventError::new(kind, errors))
		}
	}
}

fn metadata(value: serde_json::Value) -> Metadata {
	match value {
		serde_json::Value::Object(map) => map,
		_ => Metadata::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::Trigger;
	use std::sync::Mutex;

	fn tracker() -> (EventStateTracker, Arc<Mutex<Vec<(EventKind, Metadata)>>>) {
		let events = Arc::new(EventRegistry::new());
		let fired = Arc::new(Mutex::new(Vec::new()));
		let log = Arc::clone(&fired);
		events.add_trigger_to_all_events(Trigger::new("test.record", move |message| {
			let log = Arc::clone(&log);
			async move {
				log.lock().unwrap().push((message.event, message.metadata));
				Ok(())
			}
		}));
		(EventStateTracker::new(events), fired)
	}

	#[tokio::test]
	async fn worker_lines_before_announcement_are_ignored() {
		let (mut tracker, fired) = tracker();
		tracker.parse_for_triggerable_event("1#1: start worker process 2").await.unwrap();
		assert!(fired.lock().unwrap().is_empty());
		assert_eq!(tracker.state(), TrackerState::NotStarted);
		assert_eq!(tracker.worker_count(), 0);
	}

	#[tokio::test]
	async fn first_worker_fires_start_then_start_worker() {
		let (mut tracker, fired) = tracker();
		tracker.parse_for_triggerable_event("10#10: start worker processes").await.unwrap();
		assert_eq!(tracker.state(), TrackerState::AwaitingFirstWorker);
		assert!(fired.lock().unwrap().is_empty());

		tracker.parse_for_triggerable_event("10#11: start worker process 12").await.unwrap();
		assert_eq!(tracker.state(), TrackerState::Running);

		let fired = fired.lock().unwrap();
		assert_eq!(fired.len(), 2);
		assert_eq!(fired[0].0, EventKind::Start);
		assert_eq!(fired[0].1["pid"], 10);
		assert_eq!(fired[0].1["tid"], 11);
		assert_eq!(fired[1].0, EventKind::StartWorker);
		assert_eq!(fired[1].1["worker_pid"], 12);
		assert_eq!(fired[1].1["worker_tid"], 11);
		assert_eq!(fired[1].1["worker_count"], 1);
	}

	#[tokio::test]
	async fn worker_line_without_prefix_still_counts() {
		let (mut tracker, fired) = tracker();
		tracker.parse_for_triggerable_event("start worker processes").await.unwrap();
		tracker.parse_for_triggerable_event("start worker process 7").await.unwrap();

		let fired = fired.lock().unwrap();
		assert_eq!(fired[0].0, EventKind::Start);
		assert_eq!(fired[0].1["pid"], -1);
		assert_eq!(fired[1].1["worker_pid"], 7);
		assert_eq!(tracker.worker_count(), 1);
	}

	#[tokio::test]
	async fn exit_line_with_bad_prefix_is_dropped() {
		let (mut tracker, fired) = tracker();
		tracker.parse_for_triggerable_event("1#1: start worker processes").await.unwrap();
		tracker.parse_for_triggerable_event("1#1: start worker process 2").await.unwrap();
		tracker.parse_for_triggerable_event("garbage exit").await.unwrap();

		assert_eq!(tracker.worker_count(), 1);
		assert_eq!(fired.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn reload_flag_set_before_first_worker() {
		let (mut tracker, fired) = tracker();
		tracker.parse_for_triggerable_event("1#1: start worker processes").await.unwrap();
		tracker.events().reload_flag().set();
		assert_eq!(tracker.state(), TrackerState::Reloading);

		tracker.parse_for_triggerable_event("1#1: start worker process 2").await.unwrap();
		tracker.parse_for_triggerable_event("1#1: start worker process 3").await.unwrap();

		let kinds: Vec<EventKind> = fired.lock().unwrap().iter().map(|(k, _)| *k).collect();
		assert_eq!(
			kinds,
			vec![
				EventKind::Reload,
				EventKind::StartWorker,
				EventKind::Start,
				EventKind::StartWorker,
			]
		);
		assert!(!tracker.events().reload_flag().is_set());
	}

	#[tokio::test]
	async fn failing_start_worker_trigger_is_fatal() {
		let events = Arc::new(EventRegistry::new());
		events.add_trigger(
			EventKind::StartWorker,
			Trigger::new("test.fail", |_| async { anyhow::bail!("template error") }),
		);
		let mut tracker = EventStateTracker::new(events);

		tracker.parse_for_triggerable_event("1#1: start worker processes").await.unwrap();
		let err = tracker.parse_for_triggerable_event("1#1: start worker process 2").await.unwrap_err();
		assert_eq!(err.event, EventKind::StartWorker);
		assert_eq!(err.errors.len(), 1);
		assert_eq!(err.to_string(), "start-worker event trigger caused 1 error(s)");
	}
}
