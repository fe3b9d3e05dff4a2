//! Generates nginx's configuration from templates before nginx starts
//! and before every reload.
//!
//! `template.conf_template_path` is either one template, which becomes
//! `nginx.conf` in `template.conf_output_path`, or a directory whose tree
//! is recreated there. Files ending in `template.template_suffix` are
//! rendered with the suffix removed; other files are copied as they are.
//!
//! ```text
//! worker_processes [[ .vcpu_count ]];
//! pid [[ .run_path ]]/nginx.pid;
//! error_log stderr [[ .env.NGINX_LOG_LEVEL ]];
//! ```

mod conf;
mod render;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use toml::{Table, Value};
use wrapper_core::Settings;
use wrapper_events::{EventKind, EventRegistry, Trigger};

pub use conf::{ConfTemplate, Mapping, TemplateConfig};
pub use render::{render, TemplateParams};

use crate::error::PluginError;
use crate::plugin::{Plugin, PluginContext, PluginMetadata};

pub const PLUGIN_NAME: &str = "template";

const DEFAULT_SUFFIX: &str = ".tmpl";
const DEFAULT_RUN_PATH_SUBDIRS: [&str; 6] = ["client_body", "conf", "proxy", "fastcgi", "uswsgi", "scgi"];

pub struct TemplatePlugin;

impl Plugin for TemplatePlugin {
	fn name(&self) -> &str {
		PLUGIN_NAME
	}

	fn metadata(&self, settings: &Settings) -> PluginMetadata {
		let suffix = match settings.get_string(&format!("{}.template_suffix", PLUGIN_NAME)) {
			s if s.is_empty() => DEFAULT_SUFFIX.to_string(),
			s => s,
		};

		let mut defaults = Table::new();
		defaults.insert("delete_run_path_on_exit".into(), false.into());
		defaults.insert("delete_templated_conf_on_exit".into(), true.into());
		defaults.insert("template_suffix".into(), DEFAULT_SUFFIX.into());
		defaults.insert("template_var_left_delim".into(), "[[".into());
		defaults.insert("template_var_right_delim".into(), "]]".into());
		defaults.insert(
			"run_path_subdirs".into(),
			Value::Array(DEFAULT_RUN_PATH_SUBDIRS.iter().map(|d| Value::from(*d)).collect()),
		);
		defaults.insert("conf_output_path".into(), settings.get_string("conf_path").into());
		defaults.insert("conf_template_path".into(), format!("./nginx.conf{}", suffix).into());

		PluginMetadata {
			name: PLUGIN_NAME.to_string(),
			config_defaults: defaults,
		}
	}

	fn start(&self, context: PluginContext) -> Result<(), PluginError> {
		tracing::trace!("plugin [{}] starting", PLUGIN_NAME);
		register_triggers(&context.settings, &context.events);
		Ok(())
	}
}

/// Creates `run_path` and each of `template.run_path_subdirs` below it.
pub fn init_run_path(settings: &Settings) -> anyhow::Result<()> {
	let run_path = PathBuf::from(settings.get_string("run_path"));
	tracing::trace!("creating directory/verifying: {}", run_path.display());
	std::fs::create_dir_all(&run_path)
		.with_context(|| format!("error creating run_path directory ({})", run_path.display()))?;

	for subdir in settings.get_string_slice(&format!("{}.run_path_subdirs", PLUGIN_NAME)) {
		let path = run_path.join(&subdir);
		std::fs::create_dir_all(&path)
			.with_context(|| format!("error creating subdirectory ({})", path.display()))?;
	}
	Ok(())
}

/// Hooks the plugin up to the lifecycle: the run path is prepared on
/// `pre-start`, templates are applied last on `pre-start` and
/// `pre-reload`, and the generated files are removed last on `exit`.
pub fn register_triggers(settings: &Arc<Settings>, events: &EventRegistry) {
	let conf = Arc::new(Mutex::new(ConfTemplate::new()));

	let init = {
		let settings = Arc::clone(settings);
		Trigger::new(format!("{}.init-runpath", PLUGIN_NAME), move |_| {
			let settings = Arc::clone(&settings);
			async move { init_run_path(&settings) }
		})
	};

	let apply = {
		let settings = Arc::clone(settings);
		let conf = Arc::clone(&conf);
		Trigger::new(format!("{}.apply-templates", PLUGIN_NAME), move |_| {
			let settings = Arc::clone(&settings);
			let conf = Arc::clone(&conf);
			async move {
				let config = TemplateConfig::from_settings(&settings);
				let mut templates = conf.lock().unwrap_or_else(PoisonError::into_inner);
				templates
					.discover(&config)
					.context("error traversing nginx conf template files")?;
				match templates.apply(&config, &TemplateParams::from_settings(&settings)) {
					Ok(()) => Ok(()),
					Err(e) if e.is_templating_problem() => {
						Err(anyhow::Error::from(e).context("invalid nginx conf template"))
					}
					Err(e) => Err(e.into()),
				}
			}
		})
	};

	let cleanup = {
		let settings = Arc::clone(settings);
		let conf = Arc::clone(&conf);
		Trigger::new(format!("{}.clean-up-templates", PLUGIN_NAME), move |_| {
			let settings = Arc::clone(&settings);
			let conf = Arc::clone(&conf);
			async move {
				clean_up(&settings, &conf.lock().unwrap_or_else(PoisonError::into_inner));
				Ok(())
			}
		})
	};

	events.add_trigger(EventKind::PreStart, init);
	events.add_final_trigger(EventKind::PreStart, apply.clone());
	events.add_final_trigger(EventKind::PreReload, apply);
	events.add_final_trigger(EventKind::Exit, cleanup);
}

fn clean_up(settings: &Settings, conf: &ConfTemplate) {
	if settings.get_bool(&format!("{}.delete_templated_conf_on_exit", PLUGIN_NAME)) {
		for e in conf.clean_output() {
			tracing::warn!("{}", e);
		}
	}

	if settings.get_bool(&format!("{}.delete_run_path_on_exit", PLUGIN_NAME)) {
		let run_path = settings.get_string("run_path");
		if run_path.is_empty() {
			return;
		}
		tracing::trace!("removing nginx working directory ({})", run_path);
		if let Err(e) = std::fs::remove_dir_all(&run_path) {
			tracing::error!("unable to remove run_path ({}): {}", run_path, e);
		}
	}
}
