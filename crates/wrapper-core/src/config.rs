use std::path::{Path, PathBuf};

use toml::Table;

use crate::defaults::{core_defaults, dynamic_core_defaults, log_defaults, DEFAULT_CONFIG_PATH, ENV_PREFIX};
use crate::error::SettingsError;
use crate::settings::Settings;

/// Builds the settings store from defaults, the `NW_` environment and the
/// TOML file at `path`.
pub fn load(path: &Path) -> Result<Settings, SettingsError> {
	let content = std::fs::read_to_string(path).map_err(|source| read_error(path, source))?;
	from_toml_str(&content, path)
}

pub fn from_toml_str(content: &str, origin: &Path) -> Result<Settings, SettingsError> {
	let file: Table = toml::from_str(content).map_err(|source| SettingsError::Parse {
		path: origin.to_path_buf(),
		source,
	})?;

	let settings = Settings::with_env_prefix(ENV_PREFIX);
	settings.set_defaults(core_defaults());
	settings.set_section_defaults("log", log_defaults());
	settings.set_file(file);
	settings.set_defaults(dynamic_core_defaults(&settings));
	Ok(settings)
}

fn read_error(path: &Path, source: std::io::Error) -> SettingsError {
	match source.kind() {
		std::io::ErrorKind::NotFound if path == Path::new(DEFAULT_CONFIG_PATH) => {
			SettingsError::DefaultConfigNotFound { path: path.to_path_buf() }
		}
		std::io::ErrorKind::NotFound => SettingsError::ConfigNotFound { path: path.to_path_buf() },
		std::io::ErrorKind::PermissionDenied => SettingsError::PermissionDenied {
			path: path.to_path_buf(),
			source,
		},
		_ => SettingsError::Read {
			path: path.to_path_buf(),
			source,
		},
	}
}

/// Resolves `name` the way a shell would: paths containing a `/` are used
/// as given, bare names are searched for in `PATH`.
pub fn find_in_path(name: &str) -> Result<PathBuf, SettingsError> {
	let not_found = || SettingsError::NotInPath { name: name.to_string() };

	if name.contains('/') {
		let path = PathBuf::from(name);
		return if is_executable(&path) { Ok(path) } else { Err(not_found()) };
	}

	let search = std::env::var_os("PATH").ok_or_else(not_found)?;
	std::env::split_paths(&search)
		.map(|dir| dir.join(name))
		.find(|candidate| is_executable(candidate))
		.ok_or_else(not_found)
}

fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;
	std::fs::metadata(path)
		.map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}
