use std::path::PathBuf;

use thiserror::Error;
use wrapper_events::FatalEventError;

#[derive(Debug, Error)]
pub enum RunError {
	#[error(transparent)]
	Fatal(#[from] FatalEventError),

	#[error("error starting ({})", .path.display())]
	Spawn {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to create run path ({})", .path.display())]
	RunPath {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Error)]
pub enum VersionError {
	#[error("unable to execute NGINX executable ({})", .path.display())]
	Exec {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("NGINX executable ({}) exited with {status}: {output}", .path.display())]
	Status {
		path: PathBuf,
		status: std::process::ExitStatus,
		output: String,
	},

	#[error("no output from NGINX executable ({})", .path.display())]
	NoOutput { path: PathBuf },

	#[error("can't extract invalid version text: {line}")]
	InvalidVersion { line: String },

	#[error("invalid version pattern")]
	Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum PluginError {
	#[error("plugin metadata name ({found}) does not match plugin ({expected})")]
	NameMismatch { expected: String, found: String },

	#[error("{section} section in configuration not found")]
	MissingSection { section: String },

	#[error("error starting plugin ({name})")]
	Start {
		name: String,
		#[source]
		source: Box<PluginError>,
	},
}

/// Every problem found in one `[coprocess.<section>]` definition.
#[derive(Debug, Error)]
#[error("error initializing coprocess section ({section}):{}", format_violations(.violations))]
pub struct CoprocessInitError {
	pub section: String,
	pub violations: Vec<String>,
}

fn format_violations(violations: &[String]) -> String {
	violations.iter().map(|v| format!("\n    {}", v)).collect()
}

#[derive(Debug, Error)]
pub enum CoprocessError {
	#[error("problem looking up user ({user}) specified for coprocess ({name})")]
	UserLookup {
		name: String,
		user: String,
		#[source]
		source: nix::Error,
	},

	#[error("user ({user}) specified for coprocess ({name}) does not exist")]
	UnknownUser { name: String, user: String },

	#[error("unable to start coprocess ({name}) command ({program})")]
	Spawn {
		name: String,
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("({signal}) failed for coprocess ({name}) pid ({pid})")]
	Signal {
		name: String,
		signal: nix::sys::signal::Signal,
		pid: i32,
		#[source]
		source: nix::Error,
	},
}

/// A problem in the text of a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
	#[error("template delimiters must not be empty")]
	EmptyDelimiter,

	#[error("unclosed action starting on line {line}")]
	Unclosed { line: usize },

	#[error("empty action on line {line}")]
	EmptyAction { line: usize },

	#[error("no value for ({name}) on line {line}")]
	UnknownVariable { name: String, line: usize },
}

#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("error opening nginx conf template path ({})", .path.display())]
	TemplatePath {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("template path ({}) is not a valid file or directory", .path.display())]
	NotFileOrDirectory { path: PathBuf },

	#[error("error opening nginx conf template output path ({})", .path.display())]
	OutputPath {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("error walking conf_template_path ({})", .path.display())]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	#[error("can't process filename ({}) that is only a suffix", .path.display())]
	OnlySuffix { path: PathBuf },

	#[error("couldn't make directory: {}", .path.display())]
	MakeDirectory {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to copy file ({}) to ({})", .from.display(), .to.display())]
	Copy {
		from: PathBuf,
		to: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to read template file ({})", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to write output file ({}) for template file ({})", .output.display(), .template.display())]
	Write {
		template: PathBuf,
		output: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unable to apply template with template file ({}) to output file ({})", .template.display(), .output.display())]
	Render {
		template: PathBuf,
		output: PathBuf,
		#[source]
		source: RenderError,
	},
}

impl TemplateError {
	/// Whether the problem is in a template's text rather than the
	/// filesystem around it.
	pub fn is_templating_problem(&self) -> bool {
		matches!(self, TemplateError::Render { .. })
	}
}
