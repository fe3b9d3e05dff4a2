use std::collections::BTreeMap;

use toml::Value;
use wrapper_core::settings::value_to_string;
use wrapper_core::Settings;

use crate::error::RenderError;

/// Values a template can refer to: every known setting, with the dots in
/// its key replaced by underscores (`log.level` is `log_level`).
/// Table values can be indexed further with dots, as in `env.HOME` or
/// `log_formatter_options.full_timestamp`.
#[derive(Debug, Clone, Default)]
pub struct TemplateParams {
	values: BTreeMap<String, Value>,
}

impl TemplateParams {
	pub fn from_settings(settings: &Settings) -> Self {
		let values = settings
			.known_keys()
			.into_iter()
			.filter_map(|key| settings.get(&key).map(|value| (key.replace('.', "_"), value)))
			.collect();
		Self { values }
	}

	pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
		self.values.insert(name.to_string(), value.into());
	}

	pub fn lookup(&self, name: &str) -> Option<String> {
		let mut parts = name.split('.');
		let mut value = self.values.get(parts.next()?)?;
		for part in parts {
			value = value.as_table()?.get(part)?;
		}
		Some(value_to_string(value))
	}
}

/// Replaces each `<left> .name <right>` action in `text` with the value
/// of `name`. The leading dot and surrounding whitespace are optional.
/// Text outside actions is copied unchanged.
pub fn render(text: &str, left: &str, right: &str, params: &TemplateParams) -> Result<String, RenderError> {
	if left.is_empty() || right.is_empty() {
		return Err(RenderError::EmptyDelimiter);
	}

	let mut out = String::with_capacity(text.len());
	let mut offset = 0;

	while let Some(found) = text[offset..].find(left) {
		let open = offset + found;
		out.push_str(&text[offset..open]);

		let inner_start = open + left.len();
		let line = line_of(text, open);
		let Some(len) = text[inner_start..].find(right) else {
			return Err(RenderError::Unclosed { line });
		};

		let action = text[inner_start..inner_start + len].trim();
		let name = action.strip_prefix('.').unwrap_or(action);
		if name.is_empty() {
			return Err(RenderError::EmptyAction { line });
		}
		match params.lookup(name) {
			Some(value) => out.push_str(&value),
			None => {
				return Err(RenderError::UnknownVariable {
					name: name.to_string(),
					line,
				})
			}
		}
		offset = inner_start + len + right.len();
	}

	out.push_str(&text[offset..]);
	Ok(out)
}

fn line_of(text: &str, at: usize) -> usize {
	text[..at].matches('\n').count() + 1
}
