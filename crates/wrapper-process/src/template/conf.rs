use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use wrapper_core::Settings;

use super::render::{render, TemplateParams};
use super::PLUGIN_NAME;
use crate::error::TemplateError;

const OUTPUT_FILE_MODE: u32 = 0o640;
const OUTPUT_DIR_MODE: u32 = 0o740;

/// The `template.*` settings that drive discovery and rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateConfig {
	pub template_path: PathBuf,
	pub output_path: PathBuf,
	pub suffix: String,
	pub left_delim: String,
	pub right_delim: String,
}

impl TemplateConfig {
	pub fn from_settings(settings: &Settings) -> Self {
		let key = |field: &str| settings.get_string(&format!("{}.{}", PLUGIN_NAME, field));
		Self {
			template_path: PathBuf::from(key("conf_template_path")),
			output_path: PathBuf::from(key("conf_output_path")),
			suffix: key("template_suffix"),
			left_delim: key("template_var_left_delim"),
			right_delim: key("template_var_right_delim"),
		}
	}

	fn is_template(&self, path: &Path) -> bool {
		!self.suffix.is_empty()
			&& path
				.file_name()
				.is_some_and(|name| name.to_string_lossy().ends_with(self.suffix.as_str()))
	}
}

/// Where one discovered source ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
	pub source: PathBuf,
	pub output: PathBuf,
	pub is_dir: bool,
}

/// The set of files and directories generated from the template path, in
/// the order they were found.
#[derive(Debug, Default)]
pub struct ConfTemplate {
	mappings: Vec<Mapping>,
}

impl ConfTemplate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mappings(&self) -> &[Mapping] {
		&self.mappings
	}

	/// Rebuilds the mapping list from the template path.
	///
	/// A single file maps to `nginx.conf` in the output path. A directory
	/// is walked in name order: subdirectories are recreated, files keep
	/// their relative path with the template suffix removed. Anything that
	/// is neither a regular file nor a directory is skipped with a warning.
	pub fn discover(&mut self, config: &TemplateConfig) -> Result<(), TemplateError> {
		let template_path = &config.template_path;
		let metadata = fs::metadata(template_path).map_err(|source| TemplateError::TemplatePath {
			path: template_path.clone(),
			source,
		})?;
		if !metadata.is_file() && !metadata.is_dir() {
			return Err(TemplateError::NotFileOrDirectory {
				path: template_path.clone(),
			});
		}
		fs::metadata(&config.output_path).map_err(|source| TemplateError::OutputPath {
			path: config.output_path.clone(),
			source,
		})?;

		self.mappings.clear();

		if metadata.is_file() {
			let mapping = Mapping {
				source: template_path.clone(),
				output: config.output_path.join("nginx.conf"),
				is_dir: false,
			};
			tracing::debug!(
				"adding single template file mapping: {} -> {}",
				mapping.source.display(),
				mapping.output.display()
			);
			self.mappings.push(mapping);
			return Ok(());
		}

		// The root already exists in the output path, so it's never mapped.
		for entry in WalkDir::new(template_path).min_depth(1).sort_by_file_name() {
			let entry = entry.map_err(|source| TemplateError::Walk {
				path: template_path.clone(),
				source,
			})?;
			let path = entry.path();
			if entry.file_name().to_string_lossy() == config.suffix {
				return Err(TemplateError::OnlySuffix {
					path: path.to_path_buf(),
				});
			}

			let Ok(relative) = path.strip_prefix(template_path) else {
				continue;
			};
			let mut output = config.output_path.join(relative);
			let file_type = entry.file_type();

			let is_dir = if file_type.is_dir() {
				true
			} else if file_type.is_file() {
				let stripped = output
					.file_name()
					.map(|name| name.to_string_lossy().into_owned())
					.and_then(|name| name.strip_suffix(config.suffix.as_str()).map(String::from));
				if let Some(name) = stripped.filter(|_| !config.suffix.is_empty()) {
					output.set_file_name(name);
				}
				false
			} else {
				tracing::warn!(
					"unable to process path ({}) because it isn't a regular file or directory",
					path.display()
				);
				continue;
			};

			tracing::debug!("adding template file mapping: {} -> {}", path.display(), output.display());
			self.mappings.push(Mapping {
				source: path.to_path_buf(),
				output,
				is_dir,
			});
		}
		Ok(())
	}

	/// Creates every mapped directory, renders every template file and
	/// copies everything else. Stops at the first failure.
	pub fn apply(&self, config: &TemplateConfig, params: &TemplateParams) -> Result<(), TemplateError> {
		for mapping in &self.mappings {
			let Mapping { source, output, is_dir } = mapping;
			if *is_dir {
				tracing::trace!("recreating directory from ({}) at ({})", source.display(), output.display());
				DirBuilder::new()
					.recursive(true)
					.mode(OUTPUT_DIR_MODE)
					.create(output)
					.map_err(|source| TemplateError::MakeDirectory {
						path: output.clone(),
						source,
					})?;
			} else if config.is_template(source) {
				tracing::trace!("templating file from ({}) to ({})", source.display(), output.display());
				apply_file_template(source, output, config, params)?;
			} else {
				tracing::trace!("copying file from ({}) to ({})", source.display(), output.display());
				fs::copy(source, output).map_err(|e| TemplateError::Copy {
					from: source.clone(),
					to: output.clone(),
					source: e,
				})?;
			}
		}
		Ok(())
	}

	/// Removes everything [`ConfTemplate::apply`] produced. Paths that are
	/// already gone are not an error.
	pub fn clean_output(&self) -> Vec<std::io::Error> {
		tracing::trace!("removing templated nginx configuration");
		let mut errors = Vec::new();
		for mapping in &self.mappings {
			tracing::trace!("removing ({})", mapping.output.display());
			let removed = if mapping.is_dir {
				fs::remove_dir_all(&mapping.output)
			} else {
				fs::remove_file(&mapping.output)
			};
			match removed {
				Err(e) if e.kind() != ErrorKind::NotFound => errors.push(std::io::Error::new(
					e.kind(),
					format!("error removing templated file ({}): {}", mapping.output.display(), e),
				)),
				_ => {}
			}
		}
		errors
	}
}

fn apply_file_template(
	template: &Path,
	output: &Path,
	config: &TemplateConfig,
	params: &TemplateParams,
) -> Result<(), TemplateError> {
	let text = fs::read_to_string(template).map_err(|source| TemplateError::Read {
		path: template.to_path_buf(),
		source,
	})?;
	let rendered = render(&text, &config.left_delim, &config.right_delim, params).map_err(|source| {
		TemplateError::Render {
			template: template.to_path_buf(),
			output: output.to_path_buf(),
			source,
		}
	})?;

	let write_error = |source| TemplateError::Write {
		template: template.to_path_buf(),
		output: output.to_path_buf(),
		source,
	};
	let mut file = OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(OUTPUT_FILE_MODE)
		.open(output)
		.map_err(write_error)?;
	file.write_all(rendered.as_bytes()).map_err(write_error)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir(name: &str) -> PathBuf {
		let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("wrapper-template-test-{}-{}-{}", std::process::id(), n, name));
		let _ = fs::remove_dir_all(&dir);
		fs::create_dir_all(&dir).unwrap();
		dir
	}

	fn config(template_path: PathBuf, output_path: PathBuf) -> TemplateConfig {
		TemplateConfig {
			template_path,
			output_path,
			suffix: ".tmpl".into(),
			left_delim: "[[".into(),
			right_delim: "]]".into(),
		}
	}

	fn params() -> TemplateParams {
		let mut params = TemplateParams::default();
		params.insert("run_path", "/var/run/nw");
		params.insert("vcpu_count", 4);
		params
	}

	#[test]
	fn single_file_maps_to_nginx_conf() {
		let dir = temp_dir("single");
		let template = dir.join("main.conf.tmpl");
		fs::write(&template, "worker_processes [[ .vcpu_count ]];\n").unwrap();
		let out = dir.join("out");
		fs::create_dir(&out).unwrap();

		let cfg = config(template.clone(), out.clone());
		let mut conf = ConfTemplate::new();
		conf.discover(&cfg).unwrap();
		assert_eq!(
			conf.mappings(),
			&[Mapping {
				source: template,
				output: out.join("nginx.conf"),
				is_dir: false
			}]
		);

		conf.apply(&cfg, &params()).unwrap();
		assert_eq!(fs::read_to_string(out.join("nginx.conf")).unwrap(), "worker_processes 4;\n");
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn directory_is_walked_in_name_order() {
		let dir = temp_dir("tree");
		let src = dir.join("src");
		fs::create_dir_all(src.join("conf.d")).unwrap();
		fs::write(src.join("nginx.conf.tmpl"), "pid [[ .run_path ]]/nginx.pid;\n").unwrap();
		fs::write(src.join("mime.types"), "types {}\n").unwrap();
		fs::write(src.join("conf.d").join("site.conf.tmpl"), "root [[run_path]];\n").unwrap();
		std::os::unix::fs::symlink(src.join("mime.types"), src.join("linked")).unwrap();
		let out = dir.join("out");
		fs::create_dir(&out).unwrap();

		let cfg = config(src.clone(), out.clone());
		let mut conf = ConfTemplate::new();
		conf.discover(&cfg).unwrap();
		let outputs: Vec<_> = conf.mappings().iter().map(|m| (m.output.clone(), m.is_dir)).collect();
		assert_eq!(
			outputs,
			vec![
				(out.join("conf.d"), true),
				(out.join("conf.d").join("site.conf"), false),
				(out.join("mime.types"), false),
				(out.join("nginx.conf"), false),
			]
		);

		conf.apply(&cfg, &params()).unwrap();
		assert_eq!(fs::read_to_string(out.join("nginx.conf")).unwrap(), "pid /var/run/nw/nginx.pid;\n");
		assert_eq!(fs::read_to_string(out.join("conf.d/site.conf")).unwrap(), "root /var/run/nw;\n");
		assert_eq!(fs::read_to_string(out.join("mime.types")).unwrap(), "types {}\n");

		assert!(conf.clean_output().is_empty());
		assert!(!out.join("conf.d").exists());
		assert!(!out.join("nginx.conf").exists());
		assert!(out.exists());
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn rediscovery_replaces_the_mappings() {
		let dir = temp_dir("refresh");
		let src = dir.join("src");
		fs::create_dir(&src).unwrap();
		fs::write(src.join("a.conf"), "").unwrap();
		let cfg = config(src.clone(), dir.clone());

		let mut conf = ConfTemplate::new();
		conf.discover(&cfg).unwrap();
		fs::remove_file(src.join("a.conf")).unwrap();
		fs::write(src.join("b.conf"), "").unwrap();
		conf.discover(&cfg).unwrap();

		assert_eq!(conf.mappings().len(), 1);
		assert_eq!(conf.mappings()[0].output, dir.join("b.conf"));
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn file_named_only_the_suffix_is_rejected() {
		let dir = temp_dir("suffix");
		let src = dir.join("src");
		fs::create_dir(&src).unwrap();
		fs::write(src.join(".tmpl"), "").unwrap();

		let err = ConfTemplate::new().discover(&config(src, dir.clone())).unwrap_err();
		assert!(matches!(err, TemplateError::OnlySuffix { .. }), "{err}");
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn missing_paths_are_reported() {
		let dir = temp_dir("missing");
		let err = ConfTemplate::new()
			.discover(&config(dir.join("nope.tmpl"), dir.clone()))
			.unwrap_err();
		assert!(err.to_string().starts_with("error opening nginx conf template path"));

		fs::write(dir.join("nginx.conf.tmpl"), "").unwrap();
		let err = ConfTemplate::new()
			.discover(&config(dir.join("nginx.conf.tmpl"), dir.join("no-output")))
			.unwrap_err();
		assert!(err.to_string().starts_with("error opening nginx conf template output path"));
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn template_errors_name_both_files() {
		let dir = temp_dir("bad");
		let template = dir.join("nginx.conf.tmpl");
		fs::write(&template, "user [[ .nobody ]];\n").unwrap();
		let out = dir.join("out");
		fs::create_dir(&out).unwrap();

		let cfg = config(template.clone(), out.clone());
		let mut conf = ConfTemplate::new();
		conf.discover(&cfg).unwrap();
		let err = conf.apply(&cfg, &params()).unwrap_err();
		assert!(err.is_templating_problem());
		assert!(err.to_string().contains(&template.display().to_string()));
		assert!(err.to_string().contains(&out.join("nginx.conf").display().to_string()));
		assert!(!out.join("nginx.conf").exists());
		let _ = fs::remove_dir_all(&dir);
	}
}
