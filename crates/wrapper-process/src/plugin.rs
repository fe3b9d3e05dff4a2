//! Extension points for code that reacts to nginx lifecycle events.
//!
//! A plugin describes itself through [`Plugin::metadata`], whose
//! `config_defaults` are registered under `<plugin name>.<key>` before the
//! plugin is started, and registers its triggers from [`Plugin::start`].
//! Only plugins listed in the `enabled_plugins` setting are loaded.

use std::sync::Arc;

use toml::Table;
use wrapper_core::Settings;
use wrapper_events::EventRegistry;

use crate::completion::Completion;
use crate::control::ReloadHandle;
use crate::coprocess::CoprocessPlugin;
use crate::error::PluginError;
use crate::template::TemplatePlugin;

#[derive(Debug, Clone, Default)]
pub struct PluginMetadata {
	pub name: String,
	pub config_defaults: Table,
}

/// What a plugin gets to work with when it starts.
#[derive(Clone)]
pub struct PluginContext {
	pub settings: Arc<Settings>,
	pub events: Arc<EventRegistry>,
	pub reload: ReloadHandle,
	/// Work a plugin spawns should hold a guard from here so the wrapper
	/// waits for it before exiting.
	pub completion: Completion,
}

pub trait Plugin: Send + Sync {
	fn name(&self) -> &str;

	fn metadata(&self, settings: &Settings) -> PluginMetadata;

	/// Registers the plugin's triggers. Must return promptly; long running
	/// work belongs in triggers or spawned tasks.
	fn start(&self, context: PluginContext) -> Result<(), PluginError>;
}

/// Plugins compiled into the wrapper.
pub fn embedded_plugins() -> Vec<Box<dyn Plugin>> {
	vec![Box::new(CoprocessPlugin), Box::new(TemplatePlugin)]
}

pub fn is_enabled(name: &str, settings: &Settings) -> bool {
	settings.get_string_slice("enabled_plugins").iter().any(|p| p == name)
}

/// Registers the plugin's config defaults and, when `start` is set, starts
/// it. Returns `Ok(false)` when the plugin isn't enabled.
pub fn load_plugin(plugin: &dyn Plugin, context: &PluginContext, start: bool) -> Result<bool, PluginError> {
	let name = plugin.name();
	if !is_enabled(name, &context.settings) {
		tracing::debug!("plugin [{}] was detected but not enabled - not loading", name);
		return Ok(false);
	}

	let metadata = plugin.metadata(&context.settings);
	if metadata.name != name {
		return Err(PluginError::NameMismatch {
			expected: name.to_string(),
			found: metadata.name,
		});
	}
	context.settings.set_section_defaults(name, metadata.config_defaults);

	if start {
		plugin.start(context.clone()).map_err(|e| PluginError::Start {
			name: name.to_string(),
			source: Box::new(e),
		})?;
		tracing::info!("started plugin: [{}]", name);
	} else {
		tracing::info!("loaded plugin: [{}]", name);
	}
	Ok(true)
}

/// Loads every plugin in turn. A plugin that fails is logged and skipped.
pub fn load_all(plugins: &[Box<dyn Plugin>], context: &PluginContext, start: bool) {
	for plugin in plugins {
		if let Err(e) = load_plugin(plugin.as_ref(), context, start) {
			tracing::error!("error loading embedded plugin ({}): {:#}", plugin.name(), anyhow::Error::from(e));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::control::reload_channel;
	use std::sync::atomic::{AtomicBool, Ordering};

	struct Recording {
		name: &'static str,
		reported: &'static str,
		started: AtomicBool,
	}

	impl Plugin for Recording {
		fn name(&self) -> &str {
			self.name
		}

		fn metadata(&self, _settings: &Settings) -> PluginMetadata {
			let mut config_defaults = Table::new();
			config_defaults.insert("interval".into(), toml::Value::Integer(30));
			PluginMetadata {
				name: self.reported.to_string(),
				config_defaults,
			}
		}

		fn start(&self, _context: PluginContext) -> Result<(), PluginError> {
			self.started.store(true, Ordering::SeqCst);
			Ok(())
		}
	}

	fn context(enabled: &[&str]) -> PluginContext {
		let settings = Settings::new();
		settings.set(
			"enabled_plugins",
			toml::Value::Array(enabled.iter().map(|p| toml::Value::from(*p)).collect()),
		);
		let (reload, _queue) = reload_channel();
		PluginContext {
			settings: Arc::new(settings),
			events: Arc::new(EventRegistry::new()),
			reload,
			completion: Completion::new(),
		}
	}

	fn recording(name: &'static str, reported: &'static str) -> Recording {
		Recording {
			name,
			reported,
			started: AtomicBool::new(false),
		}
	}

	#[test]
	fn disabled_plugin_is_skipped() {
		let plugin = recording("metrics", "metrics");
		let ctx = context(&["coprocess"]);
		assert!(!load_plugin(&plugin, &ctx, true).unwrap());
		assert!(!plugin.started.load(Ordering::SeqCst));
		assert!(!ctx.settings.is_set("metrics.interval"));
	}

	#[test]
	fn enabled_plugin_gets_defaults_and_starts() {
		let plugin = recording("metrics", "metrics");
		let ctx = context(&["metrics"]);
		assert!(load_plugin(&plugin, &ctx, true).unwrap());
		assert!(plugin.started.load(Ordering::SeqCst));
		assert_eq!(ctx.settings.get_string("metrics.interval"), "30");
		assert!(ctx.settings.known_keys().contains(&"metrics.interval".to_string()));
	}

	#[test]
	fn load_without_start() {
		let plugin = recording("metrics", "metrics");
		let ctx = context(&["metrics"]);
		assert!(load_plugin(&plugin, &ctx, false).unwrap());
		assert!(!plugin.started.load(Ordering::SeqCst));
		assert_eq!(ctx.settings.get_string("metrics.interval"), "30");
	}

	#[test]
	fn metadata_name_must_match() {
		let plugin = recording("metrics", "stats");
		let ctx = context(&["metrics"]);
		let err = load_plugin(&plugin, &ctx, true).unwrap_err();
		assert!(matches!(err, PluginError::NameMismatch { .. }));
		assert!(!plugin.started.load(Ordering::SeqCst));
	}
}
