use std::sync::Arc;

use wrapper_core::Settings;
use wrapper_events::{EventKind, EventRegistry, Trigger};

/// Triggers the wrapper itself registers before any plugin.
pub fn register_core_triggers(events: &EventRegistry, settings: &Arc<Settings>, debug: bool) {
	if debug {
		events.add_trigger_to_all_events(Trigger::new("core.log-event-fired", |message| async move {
			tracing::debug!("[{}] triggered: {:?}", message.event.id(), message.metadata);
			Ok(())
		}));
	}

	let settings = Arc::clone(settings);
	events.add_trigger(
		EventKind::PreReload,
		Trigger::new("core.record-reload-time", move |_| {
			let settings = Arc::clone(&settings);
			async move {
				settings.set("last_reload_time", wrapper_core::time::now_utc());
				Ok(())
			}
		}),
	);
}

pub fn log_events(events: &EventRegistry) {
	for event in events.events() {
		tracing::debug!("Event registered: {}", event);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wrapper_events::Metadata;

	#[tokio::test]
	async fn pre_reload_records_reload_time() {
		let events = EventRegistry::new();
		let settings = Arc::new(Settings::new());
		settings.set_default("last_reload_time", wrapper_core::defaults::NOT_RELOADED);
		register_core_triggers(&events, &settings, false);

		assert!(events.trigger(EventKind::PreReload, Metadata::new()).await.is_empty());
		let recorded = settings.get_string("last_reload_time");
		assert_ne!(recorded, wrapper_core::defaults::NOT_RELOADED);
		assert!(recorded.ends_with("+0000 UTC"));
	}

	#[test]
	fn event_logger_only_in_debug() {
		let events = EventRegistry::new();
		register_core_triggers(&events, &Arc::new(Settings::new()), false);
		assert!(events.event(EventKind::Start).trigger_names().is_empty());

		let events = EventRegistry::new();
		register_core_triggers(&events, &Arc::new(Settings::new()), true);
		for event in events.events() {
			assert!(event.trigger_names().contains(&"core.log-event-fired".to_string()));
		}
	}
}
