//! `${name}` substitution in command arguments.

use std::collections::HashMap;

use crate::settings::Settings;

const SETTINGS_KEYS: [&str; 7] = [
	"host_id",
	"modules_path",
	"nginx_binary",
	"plugin_path",
	"run_path",
	"vcpu_count",
	"last_reload_time",
];

/// Values available for substitution: a fixed set of settings, the
/// wrapper's pid and every entry of the `env` map.
pub struct Substitutions {
	values: HashMap<String, String>,
}

impl Substitutions {
	pub fn from_settings(settings: &Settings) -> Self {
		let mut values: HashMap<String, String> = settings.get_string_map("env").into_iter().collect();
		for key in SETTINGS_KEYS {
			values.insert(key.to_string(), settings.get_string(key));
		}
		values.insert("wrapper_pid".to_string(), std::process::id().to_string());
		Self { values }
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.values.get(name).map(String::as_str)
	}

	/// Replaces every `${name}` with its value in a single left-to-right
	/// pass. Unknown names and unterminated placeholders are left as they
	/// are; substituted text is never rescanned.
	pub fn interpolate(&self, text: &str) -> String {
		let mut out = String::with_capacity(text.len());
		let mut rest = text;

		while let Some(start) = rest.find("${") {
			out.push_str(&rest[..start]);
			let after = &rest[start + 2..];
			match after.find('}') {
				Some(end) => {
					let name = &after[..end];
					match self.get(name) {
						Some(value) => out.push_str(value),
						None => out.push_str(&rest[start..start + end + 3]),
					}
					rest = &after[end + 1..];
				}
				None => {
					out.push_str(&rest[start..]);
					rest = "";
				}
			}
		}
		out.push_str(rest);
		out
	}

	pub fn interpolate_all(&self, args: &[String]) -> Vec<String> {
		args.iter().map(|arg| self.interpolate(arg)).collect()
	}
}
