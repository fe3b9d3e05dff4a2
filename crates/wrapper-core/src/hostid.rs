const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// A stable identifier for this host. Falls back to a random id when no
/// machine id is available.
pub fn host_id() -> String {
	host_id_from(&MACHINE_ID_PATHS)
}

fn host_id_from(paths: &[&str]) -> String {
	for path in paths {
		match std::fs::read_to_string(path) {
			Ok(content) if !content.trim().is_empty() => return content.trim().to_string(),
			Ok(_) => tracing::warn!("machine id file ({}) is empty", path),
			Err(e) => tracing::debug!("unable to read machine id from ({}): {}", path, e),
		}
	}
	tracing::debug!("no machine id found, generating a random host id");
	uuid::Uuid::new_v4().simple().to_string()
}
