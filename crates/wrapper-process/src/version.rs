use std::fmt;
use std::path::Path;

use regex::Regex;
use tokio::process::Command;
use wrapper_core::Settings;

use crate::error::VersionError;

const VERSION_PREFIX: &str = "nginx version: ";
const CONFIGURE_ARGS_PREFIX: &str = "configure arguments:";
const VERSION_PATTERN: &str = r"^.*:?\s*(nginx/(\d+\.\d+\.\d+)\s*(.*))";
const CONFIGURE_ARG_SEPARATOR: &str = r"\s+--";

/// What `nginx -V` reports about the binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NginxVersion {
	/// `nginx/1.17.9 (nginx-plus-r21)`
	pub full: String,
	/// `1.17.9`
	pub version: String,
	/// `nginx-plus-r21`, or empty for open source builds
	pub detail: String,
	pub is_plus: bool,
	pub additional_detail: Vec<String>,
	/// `--key[=value]` build flags in the order nginx printed them, without
	/// the leading dashes.
	pub configure_args: Vec<(String, String)>,
}

impl NginxVersion {
	pub fn configure_arg(&self, key: &str) -> Option<&str> {
		self.configure_args
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}

	/// Everything `nginx -V` printed, reassembled.
	pub fn info(&self) -> String {
		let mut out = String::new();
		out.push_str(&self.full);
		out.push('\n');
		for line in &self.additional_detail {
			out.push_str(line);
			out.push('\n');
		}
		if !self.configure_args.is_empty() {
			out.push_str(CONFIGURE_ARGS_PREFIX);
			for (key, value) in &self.configure_args {
				out.push_str(" --");
				out.push_str(key);
				if !value.is_empty() {
					out.push('=');
					out.push_str(value);
				}
			}
		}
		out
	}

	/// Records the version in the settings and uses the binary's
	/// `--modules-path` as the `modules_path` default.
	pub fn apply(&self, settings: &Settings) {
		settings.set("nginx_version", self.version.as_str());
		settings.set("nginx_is_plus", self.is_plus);
		if let Some(modules_path) = self.configure_arg("modules-path") {
			settings.set_default("modules_path", modules_path);
		}
	}
}

impl fmt::Display for NginxVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.full)
	}
}

/// Runs `<binary> -V` and parses what it prints to stdout and stderr.
pub async fn read_nginx_version(binary: &Path) -> Result<NginxVersion, VersionError> {
	let output = Command::new(binary)
		.arg("-V")
		.output()
		.await
		.map_err(|source| VersionError::Exec {
			path: binary.to_path_buf(),
			source,
		})?;

	let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
	combined.push_str(&String::from_utf8_lossy(&output.stderr));

	if !output.status.success() {
		return Err(VersionError::Status {
			path: binary.to_path_buf(),
			status: output.status,
			output: combined.trim().to_string(),
		});
	}

	if combined.trim().is_empty() {
		return Err(VersionError::NoOutput {
			path: binary.to_path_buf(),
		});
	}
	parse_version_output(&combined)
}

/// Parses the full `nginx -V` text. The first line carries the version.
pub fn parse_version_output(output: &str) -> Result<NginxVersion, VersionError> {
	let mut lines = output.lines();
	let first = lines.next().ok_or_else(|| VersionError::InvalidVersion { line: String::new() })?;
	let mut version = parse_version(first)?;

	for line in lines {
		match line.strip_prefix(CONFIGURE_ARGS_PREFIX) {
			Some(args) => version.configure_args = parse_configure_args(args)?,
			None => version.additional_detail.push(line.to_string()),
		}
	}
	Ok(version)
}

/// Parses `nginx version: nginx/1.17.9 (nginx-plus-r21)`. The
/// `nginx version: ` prefix is optional.
pub fn parse_version(line: &str) -> Result<NginxVersion, VersionError> {
	let pattern = Regex::new(VERSION_PATTERN)?;
	let text = line.strip_prefix(VERSION_PREFIX).unwrap_or(line);

	let caps = pattern.captures(text).ok_or_else(|| VersionError::InvalidVersion {
		line: line.to_string(),
	})?;
	let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

	let detail = group(3).trim_matches(|c| c == '(' || c == ')').to_string();
	Ok(NginxVersion {
		full: group(1).to_string(),
		version: group(2).to_string(),
		is_plus: detail.starts_with("nginx-plus"),
		detail,
		..Default::default()
	})
}

/// Splits the text after `configure arguments:` into ordered key/value
/// pairs. A repeated key keeps its first position and its last value.
pub fn parse_configure_args(text: &str) -> Result<Vec<(String, String)>, VersionError> {
	let separator = Regex::new(CONFIGURE_ARG_SEPARATOR)?;
	let mut args: Vec<(String, String)> = Vec::new();

	for chunk in separator.split(text).filter(|c| !c.is_empty()) {
		let (key, value) = match chunk.find('=') {
			Some(pos) if pos > 0 => (&chunk[..pos], &chunk[pos + 1..]),
			_ => (chunk, ""),
		};
		match args.iter_mut().find(|(k, _)| k == key) {
			Some(existing) => existing.1 = value.to_string(),
			None => args.push((key.to_string(), value.to_string())),
		}
	}
	Ok(args)
}
