use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use tokio::process::Command;
use tokio::sync::watch;
use wrapper_core::Settings;
use wrapper_events::{EventKind, EventStateTracker, FatalEventError, Metadata};

use crate::error::RunError;
use crate::log::spawn_log_pump;
use crate::monitor::{fatal_exit, to_metadata, ProcessMonitor};

/// How long the log pump may keep draining once the process has exited.
/// A grandchild that inherited the pipes can hold them open indefinitely.
const LOG_DRAIN: Duration = Duration::from_secs(1);

/// Arguments nginx is started with: its prefix, its main config file and
/// `daemon off;` so it stays in the foreground under the wrapper.
pub fn nginx_args(run_path: &Path, conf_path: &Path) -> Vec<String> {
	vec![
		"-p".to_string(),
		run_path.display().to_string(),
		"-c".to_string(),
		conf_path.join("nginx.conf").display().to_string(),
		"-g".to_string(),
		"daemon off;".to_string(),
	]
}

/// Starts nginx from the `nginx_binary`, `run_path` and `conf_path`
/// settings.
pub async fn start_nginx(monitor: &Arc<ProcessMonitor>, settings: &Settings) -> Result<u32, RunError> {
	let run_path = PathBuf::from(settings.get_string("run_path"));
	let conf_path = PathBuf::from(settings.get_string("conf_path"));
	std::fs::create_dir_all(&run_path).map_err(|source| RunError::RunPath {
		path: run_path.clone(),
		source,
	})?;

	let binary = PathBuf::from(settings.get_string("nginx_binary"));
	run_command(monitor, &binary, &nginx_args(&run_path, &conf_path)).await
}

/// Runs the binary at `path` under the monitor and returns its pid.
///
/// Fires `pre-start` first. Once spawned, the process's output is fed
/// through the log pump, `exit` fires with `{pid}` when it ends, and the
/// monitor's stop signal sends it SIGTERM. The monitor's completion
/// counter stays raised until the `exit` triggers have run.
pub async fn run_command(monitor: &Arc<ProcessMonitor>, path: &Path, args: &[String]) -> Result<u32, RunError> {
	let errors = monitor.events().trigger(EventKind::PreStart, Metadata::new()).await;
	if !errors.is_empty() {
		return Err(FatalEventError::new(EventKind::PreStart, errors).into());
	}

	let file = path
		.file_name()
		.map(|f| f.to_string_lossy().into_owned())
		.unwrap_or_else(|| path.display().to_string());

	let mut cmd = Command::new(path);
	cmd.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped());

	let guard = monitor.completion().track();
	let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
		path: path.to_path_buf(),
		source,
	})?;

	let Some(raw_pid) = child.id() else {
		return Err(RunError::Spawn {
			path: path.to_path_buf(),
			source: std::io::Error::other("process exited before its pid could be read"),
		});
	};
	let pid = Pid::from_raw(raw_pid as i32);
	monitor.mark_started(pid);
	tracing::info!("started {} with pid {}", file, raw_pid);

	let pump = match (child.stdout.take(), child.stderr.take()) {
		(Some(stdout), Some(stderr)) => {
			Some(spawn_log_pump(stdout, stderr, EventStateTracker::new(Arc::clone(monitor.events()))))
		}
		_ => None,
	};

	let (exited_tx, exited_rx) = watch::channel(false);

	{
		let monitor = Arc::clone(monitor);
		let file = file.clone();
		tokio::spawn(async move {
			let _guard = guard;
			let status = child.wait().await;
			exited_tx.send_replace(true);
			match status {
				Ok(status) if status.success() => tracing::debug!("{} exited", file),
				Ok(status) => tracing::error!("{} exited with error: {}", file, status),
				Err(e) => tracing::error!("{} exited with error: {}", file, e),
			}

			if let Some(pump) = pump {
				if tokio::time::timeout(LOG_DRAIN, pump).await.is_err() {
					tracing::debug!("output of {} still open after exit - no longer waiting for it", file);
				}
			}

			let metadata = to_metadata(json!({ "pid": raw_pid }));
			let errors = monitor.events().trigger(EventKind::Exit, metadata).await;
			if !errors.is_empty() {
				fatal_exit(FatalEventError::new(EventKind::Exit, errors));
			}
		});
	}

	{
		let mut stop = monitor.subscribe_stop();
		let mut exited = exited_rx;
		tokio::spawn(async move {
			tokio::select! {
				res = stop.wait_for(|stopping| *stopping) => {
					if res.is_err() {
						return;
					}
				}
				_ = exited.wait_for(|done| *done) => return,
			}
			if *exited.borrow() {
				return;
			}

			tracing::info!("killing {} with signal {}", file, Signal::SIGTERM as i32);
			match kill(pid, Signal::SIGTERM) {
				Ok(()) => {}
				Err(Errno::ESRCH) => tracing::debug!("{} ({}) already exited", file, pid),
				Err(e) => {
					tracing::error!("unable to kill process [{}]: {}", pid, e);
					std::process::exit(1);
				}
			}
		});
	}

	Ok(raw_pid)
}
