//! Runs auxiliary processes next to nginx.
//!
//! Every `[coprocess.<section>]` table describes one process, started by
//! the event named in `exec_event` and stopped by the one in `stop_event`.
//!
//! ```toml
//! [coprocess.registrator]
//! name = "registrator"
//! exec = ["/usr/local/bin/register", "${host_id}"]
//! stop_exec = ["/usr/local/bin/deregister", "${host_id}"]
//! restarts = "unlimited"
//! background = true
//! exec_event = "start"
//! stop_event = "exit"
//! ```

mod policy;
mod process;

use std::sync::Arc;

use anyhow::Context;
use toml::Table;
use wrapper_core::Settings;
use wrapper_events::{EventRegistry, Trigger};

pub use policy::RestartPolicy;
pub use process::{Coprocess, CoprocessConfig};

use crate::completion::Completion;
use crate::error::PluginError;
use crate::plugin::{Plugin, PluginContext, PluginMetadata};

pub const PLUGIN_NAME: &str = "coprocess";

pub struct CoprocessPlugin;

impl Plugin for CoprocessPlugin {
	fn name(&self) -> &str {
		PLUGIN_NAME
	}

	fn metadata(&self, _settings: &Settings) -> PluginMetadata {
		PluginMetadata {
			name: PLUGIN_NAME.to_string(),
			config_defaults: Table::new(),
		}
	}

	fn start(&self, context: PluginContext) -> Result<(), PluginError> {
		tracing::trace!("plugin [{}] starting", PLUGIN_NAME);
		for coprocess in read_coprocesses(&context.settings)? {
			register_triggers(coprocess, &context.events, &context.completion);
		}
		Ok(())
	}
}

/// Builds every valid coprocess in the `coprocess` section. Invalid
/// definitions are logged and skipped.
pub fn read_coprocesses(settings: &Settings) -> Result<Vec<Arc<Coprocess>>, PluginError> {
	let Some(sections) = settings.get_table(PLUGIN_NAME) else {
		return Err(PluginError::MissingSection {
			section: PLUGIN_NAME.to_string(),
		});
	};

	let mut coprocesses = Vec::new();
	for section in sections.keys() {
		let config = CoprocessConfig::from_settings(section, settings);
		match Coprocess::new(section, config, settings) {
			Ok(coprocess) => {
				tracing::trace!("parsed coprocess definition ({}) for ({}) coprocess", section, coprocess.name());
				coprocesses.push(Arc::new(coprocess));
			}
			Err(e) => tracing::warn!("error parsing coprocess configuration: {}", e),
		}
	}
	Ok(coprocesses)
}

/// Hooks a coprocess up to its exec and stop events.
pub fn register_triggers(coprocess: Arc<Coprocess>, events: &EventRegistry, completion: &Completion) {
	let name = coprocess.name().to_string();

	let exec = {
		let coprocess = Arc::clone(&coprocess);
		let completion = completion.clone();
		Trigger::new(format!("{}.start-coprocess-{}", PLUGIN_NAME, name), move |_| {
			let coprocess = Arc::clone(&coprocess);
			let completion = completion.clone();
			async move {
				if coprocess.is_background() {
					let guard = completion.track();
					tokio::spawn(async move {
						let _guard = guard;
						if let Err(e) = coprocess.execute().await {
							tracing::error!("{:#}", anyhow::Error::from(e));
						}
						coprocess.mark_done();
					});
					Ok(())
				} else {
					let result = coprocess.execute().await;
					coprocess.mark_done();
					result.with_context(|| format!("coprocess ({}) failed", coprocess.name()))
				}
			}
		})
	};
	events.add_trigger(coprocess.exec_event(), exec);

	if !coprocess.stop_exec().is_empty() {
		let stop = {
			let coprocess = Arc::clone(&coprocess);
			Trigger::new(format!("{}.exec-coprocess-stop-cmd-{}", PLUGIN_NAME, name), move |_| {
				let coprocess = Arc::clone(&coprocess);
				async move {
					coprocess
						.execute_stop_cmd()
						.await
						.with_context(|| format!("stop command for coprocess ({}) failed", coprocess.name()))
				}
			})
		};
		events.add_trigger(coprocess.stop_event(), stop);
	}

	let terminate = {
		let coprocess = Arc::clone(&coprocess);
		Trigger::new(format!("{}.terminate-coprocess-{}", PLUGIN_NAME, name), move |_| {
			let coprocess = Arc::clone(&coprocess);
			async move {
				coprocess
					.terminate()
					.await
					.with_context(|| format!("unable to terminate coprocess ({})", coprocess.name()))
			}
		})
	};
	events.add_trigger(coprocess.stop_event(), terminate);

	tracing::debug!(
		"registered coprocess ({}) on events ({}) and ({})",
		name,
		coprocess.exec_event(),
		coprocess.stop_event()
	);
}
