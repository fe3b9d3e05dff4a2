use toml::{Table, Value};

use crate::hostid::host_id;
use crate::settings::Settings;

/// Config file looked for in the working directory when `--config` isn't
/// given.
pub const DEFAULT_CONFIG_PATH: &str = "nginx-wrapper.toml";

/// Prefix of environment variables that override settings, e.g.
/// `NW_NGINX_BINARY` or `NW_LOG.LEVEL`.
pub const ENV_PREFIX: &str = "NW";

pub const NOT_RELOADED: &str = "not reloaded";

pub fn core_defaults() -> Table {
	let mut t = Table::new();
	t.insert("env".into(), Value::Table(env_as_table(std::env::vars_os())));
	t.insert("host_id".into(), host_id().into());
	t.insert("last_reload_time".into(), NOT_RELOADED.into());
	t.insert("modules_path".into(), "/usr/lib/nginx/modules".into());
	t.insert("nginx_binary".into(), "nginx".into());
	t.insert("nginx_version".into(), "unknown".into());
	t.insert("nginx_is_plus".into(), false.into());
	t.insert("plugin_path".into(), "./plugins".into());
	t.insert("enabled_plugins".into(), Value::Array(Vec::new()));
	t.insert("run_path".into(), default_run_path().into());
	t.insert("vcpu_count".into(), vcpu_count().into());
	t
}

pub fn log_defaults() -> Table {
	let mut formatter_options = Table::new();
	formatter_options.insert("full_timestamp".into(), true.into());
	formatter_options.insert("pad_level_text".into(), true.into());

	let mut t = Table::new();
	t.insert("level".into(), "INFO".into());
	t.insert("destination".into(), "STDOUT".into());
	t.insert("formatter_name".into(), "TextFormatter".into());
	t.insert("formatter_options".into(), Value::Table(formatter_options));
	t
}

/// Defaults derived from other settings, applied after the config file is
/// read.
pub fn dynamic_core_defaults(settings: &Settings) -> Table {
	let run_path = std::path::PathBuf::from(settings.get_string("run_path"));
	let mut t = Table::new();
	t.insert("conf_path".into(), run_path.join("conf").to_string_lossy().into_owned().into());
	t
}

fn default_run_path() -> String {
	std::env::temp_dir().join("nginx-wrapper").to_string_lossy().into_owned()
}

fn vcpu_count() -> i64 {
	std::thread::available_parallelism().map(|n| n.get() as i64).unwrap_or(1)
}

fn env_as_table(vars: impl Iterator<Item = (std::ffi::OsString, std::ffi::OsString)>) -> Table {
	vars.map(|(k, v)| {
		(
			k.to_string_lossy().into_owned(),
			Value::String(v.to_string_lossy().into_owned()),
		)
	})
	.collect()
}
