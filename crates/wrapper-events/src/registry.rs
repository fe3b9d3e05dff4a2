use tokio::sync::watch;

use crate::error::EventError;
use crate::event::{Event, EventKind, Metadata, Trigger};

/// Marks that a reload has been requested of nginx and the first worker
/// of the new generation hasn't been seen in the log yet.
///
/// Set by the process monitor just before nginx is sent SIGHUP and cleared
/// by the state tracker once the `reload` triggers have run.
pub struct ReloadFlag {
	started: watch::Sender<bool>,
}

impl ReloadFlag {
	pub fn new() -> Self {
		let (started, _) = watch::channel(false);
		Self { started }
	}

	pub fn is_set(&self) -> bool {
		*self.started.borrow()
	}

	pub fn set(&self) {
		self.started.send_replace(true);
	}

	pub fn clear(&self) {
		self.started.send_replace(false);
	}

	/// Resolves once no reload is in flight.
	pub async fn wait_until_clear(&self) {
		let mut rx = self.started.subscribe();
		// The sender lives as long as self, so this can't fail.
		let _ = rx.wait_for(|started| !*started).await;
	}
}

impl Default for ReloadFlag {
	fn default() -> Self {
		Self::new()
	}
}

/// The catalog of the seven nginx lifecycle events.
///
/// Built once at start-up and shared (behind an `Arc`) by every component
/// that registers or fires triggers.
pub struct EventRegistry {
	events: Vec<Event>,
	reload_started: ReloadFlag,
}

impl EventRegistry {
	pub fn new() -> Self {
		Self {
			events: EventKind::ALL.into_iter().map(Event::new).collect(),
			reload_started: ReloadFlag::new(),
		}
	}

	pub fn event(&self, kind: EventKind) -> &Event {
		&self.events[kind.index()]
	}

	pub fn events(&self) -> impl Iterator<Item = &Event> {
		self.events.iter()
	}

	pub fn event_names(&self) -> Vec<&'static str> {
		self.events.iter().map(Event::name).collect()
	}

	pub fn reload_flag(&self) -> &ReloadFlag {
		&self.reload_started
	}

	pub fn add_trigger(&self, kind: EventKind, trigger: Trigger) {
		self.event(kind).add_trigger(trigger);
	}

	pub fn add_final_trigger(&self, kind: EventKind, trigger: Trigger) {
		self.event(kind).add_final_trigger(trigger);
	}

	pub async fn trigger(&self, kind: EventKind, metadata: Metadata) -> Vec<anyhow::Error> {
		self.event(kind).trigger(metadata).await
	}

	pub fn find_by_name(&self, name: &str) -> Option<&Event> {
		EventKind::from_name(name).map(|kind| self.event(kind))
	}

	/// Registers a trigger against an event named by a string, as plugins
	/// and configuration files refer to events.
	pub fn add_trigger_by_name(&self, name: &str, trigger: Trigger) -> Result<(), EventError> {
		let kind: EventKind = name.parse()?;
		self.add_trigger(kind, trigger);
		Ok(())
	}

	pub fn add_trigger_to_all_events(&self, trigger: Trigger) {
		for event in &self.events {
			event.add_trigger(trigger.clone());
		}
	}
}

impl Default for EventRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};

	fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Trigger {
		let log = Arc::clone(log);
		let label = name.to_string();
		Trigger::new(name, move |message| {
			let log = Arc::clone(&log);
			let label = label.clone();
			async move {
				log.lock().unwrap().push(format!("{}:{}", label, message.event));
				Ok(())
			}
		})
	}

	fn failing(name: &str) -> Trigger {
		let label = name.to_string();
		Trigger::new(name, move |_| {
			let label = label.clone();
			async move { anyhow::bail!("{} failed", label) }
		})
	}

	#[tokio::test]
	async fn triggers_run_in_registration_order_then_final() {
		let registry = EventRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		registry.add_final_trigger(EventKind::Start, recorder(&log, "final"));
		registry.add_trigger(EventKind::Start, recorder(&log, "first"));
		registry.add_trigger(EventKind::Start, recorder(&log, "second"));
		registry.add_trigger(EventKind::Start, recorder(&log, "first"));

		let errors = registry.trigger(EventKind::Start, Metadata::new()).await;
		assert!(errors.is_empty());
		assert_eq!(
			*log.lock().unwrap(),
			vec!["first:start", "second:start", "first:start", "final:start"]
		);
	}

	#[tokio::test]
	async fn final_trigger_is_replaced() {
		let registry = EventRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		registry.add_final_trigger(EventKind::Exit, recorder(&log, "old"));
		registry.add_final_trigger(EventKind::Exit, recorder(&log, "new"));

		registry.trigger(EventKind::Exit, Metadata::new()).await;
		assert_eq!(*log.lock().unwrap(), vec!["new:exit"]);
	}

	#[tokio::test]
	async fn failing_trigger_does_not_stop_later_triggers() {
		let registry = EventRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		registry.add_trigger(EventKind::Reload, failing("broken"));
		registry.add_trigger(EventKind::Reload, recorder(&log, "after"));
		registry.add_final_trigger(EventKind::Reload, failing("last"));

		let errors = registry.trigger(EventKind::Reload, Metadata::new()).await;
		assert_eq!(errors.len(), 2);
		assert!(format!("{:#}", errors[0]).contains("broken failed"));
		assert!(format!("{:#}", errors[1]).contains("last failed"));
		assert_eq!(*log.lock().unwrap(), vec!["after:reload"]);
	}

	#[tokio::test]
	async fn trigger_receives_metadata() {
		let registry = EventRegistry::new();
		let seen = Arc::new(Mutex::new(None));
		let seen_clone = Arc::clone(&seen);
		registry.add_trigger(
			EventKind::ExitWorker,
			Trigger::new("capture", move |message| {
				let seen = Arc::clone(&seen_clone);
				async move {
					*seen.lock().unwrap() = Some(message.metadata);
					Ok(())
				}
			}),
		);

		let mut metadata = Metadata::new();
		metadata.insert("worker_pid".into(), 42.into());
		registry.trigger(EventKind::ExitWorker, metadata).await;

		let seen = seen.lock().unwrap().clone().unwrap();
		assert_eq!(seen["worker_pid"], 42);
	}

	#[tokio::test]
	async fn add_trigger_by_name_then_fire() {
		let registry = EventRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		registry.add_trigger(EventKind::Exit, recorder(&log, "existing"));
		registry.add_trigger_by_name("exit", recorder(&log, "by-name")).unwrap();

		registry.trigger(EventKind::Exit, Metadata::new()).await;
		assert_eq!(*log.lock().unwrap(), vec!["existing:exit", "by-name:exit"]);
	}

	#[test]
	fn add_trigger_by_unknown_name_fails() {
		let registry = EventRegistry::new();
		let err = registry
			.add_trigger_by_name("restart", Trigger::new("t", |_| async { Ok(()) }))
			.unwrap_err();
		assert!(matches!(err, EventError::UnknownEvent { ref name } if name == "restart"));
		assert_eq!(err.to_string(), "unknown event name (restart)");
	}

	#[test]
	fn find_by_name() {
		let registry = EventRegistry::new();
		assert_eq!(registry.find_by_name("pre-reload").unwrap().kind(), EventKind::PreReload);
		assert!(registry.find_by_name("nope").is_none());
	}

	#[tokio::test]
	async fn add_trigger_to_all_events() {
		let registry = EventRegistry::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		registry.add_trigger_to_all_events(recorder(&log, "all"));

		for kind in EventKind::ALL {
			registry.trigger(kind, Metadata::new()).await;
		}
		assert_eq!(log.lock().unwrap().len(), 7);
		assert_eq!(registry.event_names().len(), 7);
	}

	#[tokio::test]
	async fn reload_flag_wait_until_clear() {
		let flag = Arc::new(ReloadFlag::new());
		flag.wait_until_clear().await;

		flag.set();
		assert!(flag.is_set());

		let waiter = {
			let flag = Arc::clone(&flag);
			tokio::spawn(async move { flag.wait_until_clear().await })
		};
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		assert!(!waiter.is_finished());

		flag.clear();
		tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();
	}
}
