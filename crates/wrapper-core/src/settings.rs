//! Layered key/value settings.
//!
//! Keys are dotted paths into nested TOML tables (`log.level`,
//! `coprocess.web.exec`). A lookup consults, from highest to lowest
//! priority: values set at runtime, the environment, the config file and
//! finally registered defaults. When several layers hold a table at the
//! same key the tables are merged, so `get_table("log")` sees defaults for
//! every field the file leaves out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use toml::{Table, Value};

#[derive(Default)]
struct Layers {
	overrides: Table,
	file: Table,
	defaults: Table,
	known: BTreeSet<String>,
}

pub struct Settings {
	layers: RwLock<Layers>,
	env_prefix: Option<String>,
}

impl Settings {
	pub fn new() -> Self {
		Self {
			layers: RwLock::new(Layers::default()),
			env_prefix: None,
		}
	}

	/// Settings that also consult `<PREFIX>_<KEY>` environment variables,
	/// with the key upper-cased (`NW_RUN_PATH`, `NW_LOG.LEVEL`).
	pub fn with_env_prefix(prefix: &str) -> Self {
		Self {
			layers: RwLock::new(Layers::default()),
			env_prefix: Some(prefix.to_string()),
		}
	}

	fn read(&self) -> RwLockReadGuard<'_, Layers> {
		self.layers.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, Layers> {
		self.layers.write().unwrap_or_else(PoisonError::into_inner)
	}

	fn env_value(&self, key: &str) -> Option<String> {
		let prefix = self.env_prefix.as_ref()?;
		std::env::var(format!("{}_{}", prefix, key.to_uppercase())).ok()
	}

	pub fn get(&self, key: &str) -> Option<Value> {
		let layers = self.read();
		let mut found = None;
		overlay(&mut found, lookup(&layers.defaults, key));
		overlay(&mut found, lookup(&layers.file, key));
		if let Some(value) = self.env_value(key) {
			found = Some(Value::String(value));
		}
		overlay(&mut found, lookup(&layers.overrides, key));
		found
	}

	pub fn is_set(&self, key: &str) -> bool {
		self.get(key).is_some()
	}

	/// The value at `key` rendered as a string. Missing keys are empty.
	pub fn get_string(&self, key: &str) -> String {
		self.get(key).map(|v| value_to_string(&v)).unwrap_or_default()
	}

	pub fn get_bool(&self, key: &str) -> bool {
		match self.get(key) {
			Some(Value::Boolean(b)) => b,
			Some(Value::Integer(i)) => i != 0,
			Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "1" | "t" | "true"),
			_ => false,
		}
	}

	/// Arrays yield their elements as strings; a plain string is split on
	/// whitespace.
	pub fn get_string_slice(&self, key: &str) -> Vec<String> {
		match self.get(key) {
			Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
			Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
			_ => Vec::new(),
		}
	}

	pub fn get_string_map(&self, key: &str) -> BTreeMap<String, String> {
		match self.get(key) {
			Some(Value::Table(table)) => table.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect(),
			_ => BTreeMap::new(),
		}
	}

	pub fn get_table(&self, key: &str) -> Option<Table> {
		match self.get(key) {
			Some(Value::Table(table)) => Some(table),
			_ => None,
		}
	}

	pub fn set(&self, key: &str, value: impl Into<Value>) {
		insert(&mut self.write().overrides, key, value.into());
	}

	pub fn set_default(&self, key: &str, value: impl Into<Value>) {
		insert(&mut self.write().defaults, key, value.into());
	}

	/// Registers top-level defaults. Every key becomes a known key.
	pub fn set_defaults(&self, defaults: Table) {
		let mut layers = self.write();
		for (key, value) in defaults {
			layers.known.insert(key.clone());
			insert(&mut layers.defaults, &key, value);
		}
	}

	/// Registers defaults under `section`; each becomes a known
	/// `section.key`.
	pub fn set_section_defaults(&self, section: &str, defaults: Table) {
		let mut layers = self.write();
		for (key, value) in defaults {
			let path = format!("{}.{}", section, key);
			layers.known.insert(path.clone());
			insert(&mut layers.defaults, &path, value);
		}
	}

	/// Replaces the values read from the config file.
	pub fn set_file(&self, file: Table) {
		self.write().file = file;
	}

	pub fn known_keys(&self) -> Vec<String> {
		self.read().known.iter().cloned().collect()
	}

	/// Every leaf key from every layer, sorted. Known keys that hold tables
	/// (such as `env`) are reported as a single key.
	pub fn all_keys(&self) -> Vec<String> {
		let layers = self.read();
		let mut keys = BTreeSet::new();
		for table in [&layers.defaults, &layers.file, &layers.overrides] {
			collect_keys(table, "", &layers.known, &mut keys);
		}
		keys.into_iter().collect()
	}
}

impl Default for Settings {
	fn default() -> Self {
		Self::new()
	}
}

pub fn value_to_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Integer(i) => i.to_string(),
		Value::Float(f) => f.to_string(),
		Value::Boolean(b) => b.to_string(),
		Value::Datetime(d) => d.to_string(),
		other => other.to_string(),
	}
}

fn lookup<'a>(table: &'a Table, key: &str) -> Option<&'a Value> {
	let mut parts = key.split('.');
	let mut value = table.get(parts.next()?)?;
	for part in parts {
		value = value.as_table()?.get(part)?;
	}
	Some(value)
}

fn insert(table: &mut Table, key: &str, value: Value) {
	match key.split_once('.') {
		None => {
			table.insert(key.to_string(), value);
		}
		Some((head, rest)) => {
			let child = table
				.entry(head.to_string())
				.or_insert_with(|| Value::Table(Table::new()));
			if !child.is_table() {
				*child = Value::Table(Table::new());
			}
			if let Value::Table(child) = child {
				insert(child, rest, value);
			}
		}
	}
}

fn overlay(found: &mut Option<Value>, value: Option<&Value>) {
	let Some(value) = value else {
		return;
	};
	match (found.as_mut(), value) {
		(Some(Value::Table(base)), Value::Table(top)) => merge(base, top),
		_ => *found = Some(value.clone()),
	}
}

fn merge(base: &mut Table, top: &Table) {
	for (key, value) in top {
		if let (Some(Value::Table(b)), Value::Table(t)) = (base.get_mut(key), value) {
			merge(b, t);
			continue;
		}
		base.insert(key.clone(), value.clone());
	}
}

fn collect_keys(table: &Table, prefix: &str, known: &BTreeSet<String>, keys: &mut BTreeSet<String>) {
	for (key, value) in table {
		let path = if prefix.is_empty() {
			key.clone()
		} else {
			format!("{}.{}", prefix, key)
		};
		match value {
			Value::Table(child) if !known.contains(&path) => collect_keys(child, &path, known, keys),
			_ => {
				keys.insert(path);
			}
		}
	}
}
