use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("The default config file path ({}) was not found in the current directory", .path.display())]
	DefaultConfigNotFound { path: PathBuf },

	#[error("The specified config file path ({}) does not exist", .path.display())]
	ConfigNotFound { path: PathBuf },

	#[error("The specified config file path ({}) does not have sufficient privileges: {source}", .path.display())]
	PermissionDenied {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to read config file ({})", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to parse config file ({})", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("unable to find ({name}) in PATH")]
	NotInPath { name: String },
}
