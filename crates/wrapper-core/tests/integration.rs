use std::sync::atomic::{AtomicU32, Ordering};

use wrapper_core::config;
use wrapper_core::interpolate::Substitutions;
use wrapper_core::SettingsError;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> std::path::PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("wrapper-core-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

const CONFIG: &str = r#"
enabled_plugins = ["coprocess"]
run_path = "/var/run/nginx-wrapper"
modules_path = "/opt/nginx/modules"

[log]
level = "TRACE"
formatter_name = "JSONFormatter"

[coprocess.registrator]
name = "registrator"
exec = ["/usr/local/bin/register", "--host", "${host_id}", "--modules", "${modules_path}"]
restarts = 3
exec_event = "start"
stop_event = "exit"
"#;

#[test]
fn load_config_file() {
	let dir = temp_dir("load");
	let path = dir.join("nginx-wrapper.toml");
	std::fs::write(&path, CONFIG).unwrap();

	let settings = config::load(&path).unwrap();
	assert_eq!(settings.get_string("conf_path"), "/var/run/nginx-wrapper/conf");
	assert_eq!(settings.get_string("log.level"), "TRACE");
	assert_eq!(settings.get_string("log.formatter_name"), "JSONFormatter");
	assert!(settings.get_bool("log.formatter_options.full_timestamp"));
	assert_eq!(settings.get_string("coprocess.registrator.restarts"), "3");
	assert!(settings.get_table("coprocess").unwrap().contains_key("registrator"));

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn interpolate_loaded_settings() {
	let dir = temp_dir("interpolate");
	let path = dir.join("nginx-wrapper.toml");
	std::fs::write(&path, CONFIG).unwrap();

	let settings = config::load(&path).unwrap();
	let subs = Substitutions::from_settings(&settings);
	let exec = subs.interpolate_all(&settings.get_string_slice("coprocess.registrator.exec"));

	assert_eq!(exec[2], settings.get_string("host_id"));
	assert_eq!(exec[4], "/opt/nginx/modules");

	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn last_reload_time_is_mutable_at_runtime() {
	let settings = config::from_toml_str("", std::path::Path::new("inline.toml")).unwrap();
	assert_eq!(settings.get_string("last_reload_time"), "not reloaded");

	settings.set("last_reload_time", wrapper_core::time::format_utc(0));
	let subs = Substitutions::from_settings(&settings);
	assert_eq!(subs.interpolate("${last_reload_time}"), "1970-01-01 00:00:00 +0000 UTC");
}

#[test]
fn unknown_keys_are_reported_by_all_keys() {
	let settings = config::from_toml_str("typo_key = 1\n[log]\nlevl = 'x'", std::path::Path::new("inline.toml"))
		.unwrap();
	let known = settings.known_keys();
	let unknown: Vec<String> = settings
		.all_keys()
		.into_iter()
		.filter(|k| k.matches('.').count() < 2 && !known.contains(k))
		.collect();
	assert_eq!(unknown, vec!["log.levl", "typo_key"]);
}

#[test]
fn unreadable_directory_is_a_read_error() {
	let dir = temp_dir("dir-as-file");
	let err = config::load(&dir).err().unwrap();
	assert!(matches!(err, SettingsError::Read { .. }));
	let _ = std::fs::remove_dir_all(&dir);
}
