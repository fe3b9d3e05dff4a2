use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{Pid, User};
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, RwLock};
use wrapper_core::interpolate::Substitutions;
use wrapper_core::Settings;
use wrapper_events::EventKind;

use super::policy::RestartPolicy;
use crate::error::{CoprocessError, CoprocessInitError};
use crate::log::read_line_lossy;

const EXIT_WAIT: Duration = Duration::from_secs(5);

/// The raw `[coprocess.<section>]` values, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoprocessConfig {
	pub name: String,
	pub exec: Vec<String>,
	pub stop_exec: Vec<String>,
	pub user: String,
	pub restarts: String,
	pub background: bool,
	pub exec_event: String,
	pub stop_event: String,
}

impl CoprocessConfig {
	pub fn from_settings(section: &str, settings: &Settings) -> Self {
		let key = |field: &str| format!("coprocess.{}.{}", section, field);
		let restarts = if settings.is_set(&key("restarts")) {
			settings.get_string(&key("restarts"))
		} else {
			RestartPolicy::Never.to_string()
		};
		Self {
			name: settings.get_string(&key("name")),
			exec: settings.get_string_slice(&key("exec")),
			stop_exec: settings.get_string_slice(&key("stop_exec")),
			user: settings.get_string(&key("user")),
			restarts,
			background: settings.get_bool(&key("background")),
			exec_event: settings.get_string(&key("exec_event")),
			stop_event: settings.get_string(&key("stop_event")),
		}
	}
}

enum Delivery {
	Delivered,
	NotRunning,
}

/// An auxiliary process started and stopped alongside nginx.
///
/// The pid slot is written only while (re)launching, under the write lock,
/// and read when signalling. Setting the restart policy to
/// [`RestartPolicy::Terminating`] before taking the read lock guarantees a
/// concurrent restart loop either sees the new policy or publishes its pid
/// first.
pub struct Coprocess {
	name: String,
	exec: Vec<String>,
	stop_exec: Vec<String>,
	user: Option<String>,
	restarts: Mutex<RestartPolicy>,
	background: bool,
	exec_event: EventKind,
	stop_event: EventKind,
	done: AtomicBool,
	process: RwLock<Option<Pid>>,
	running: watch::Sender<bool>,
}

impl Coprocess {
	/// Validates a definition, reporting every problem at once, and
	/// interpolates `${var}` placeholders in both commands.
	pub fn new(section: &str, config: CoprocessConfig, settings: &Settings) -> Result<Self, CoprocessInitError> {
		let mut violations = Vec::new();

		if config.name.trim().is_empty() {
			violations.push("coprocess field 'name' is blank".to_string());
		}
		if config.exec.is_empty() {
			violations.push("coprocess field 'exec' is empty".to_string());
		}
		let restarts = config.restarts.parse::<RestartPolicy>();
		if restarts.is_err() {
			violations.push(format!(
				"coprocess field 'restarts' is set to an invalid value ({}) - it must be 'never' or 'unlimited'",
				config.restarts
			));
		}
		let exec_event = EventKind::from_name(&config.exec_event);
		if exec_event.is_none() {
			violations.push(format!(
				"coprocess field 'exec_event' was not set to a valid event name ({})",
				config.exec_event
			));
		}
		let stop_event = EventKind::from_name(&config.stop_event);
		if stop_event.is_none() {
			violations.push(format!(
				"coprocess field 'stop_event' was not set to a valid event name ({})",
				config.stop_event
			));
		}

		let (Ok(restarts), Some(exec_event), Some(stop_event), true) =
			(restarts, exec_event, stop_event, violations.is_empty())
		else {
			return Err(CoprocessInitError {
				section: section.to_string(),
				violations,
			});
		};

		let substitutions = Substitutions::from_settings(settings);
		let (running, _) = watch::channel(false);
		Ok(Self {
			name: config.name,
			exec: substitutions.interpolate_all(&config.exec),
			stop_exec: substitutions.interpolate_all(&config.stop_exec),
			user: Some(config.user).filter(|u| !u.is_empty()),
			restarts: Mutex::new(restarts),
			background: config.background,
			exec_event,
			stop_event,
			done: AtomicBool::new(false),
			process: RwLock::new(None),
			running,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn exec(&self) -> &[String] {
		&self.exec
	}

	pub fn stop_exec(&self) -> &[String] {
		&self.stop_exec
	}

	pub fn is_background(&self) -> bool {
		self.background
	}

	pub fn exec_event(&self) -> EventKind {
		self.exec_event
	}

	pub fn stop_event(&self) -> EventKind {
		self.stop_event
	}

	pub fn restart_policy(&self) -> RestartPolicy {
		*self.restarts.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn set_terminating(&self) {
		*self.restarts.lock().unwrap_or_else(PoisonError::into_inner) = RestartPolicy::Terminating;
	}

	pub fn is_done(&self) -> bool {
		self.done.load(Ordering::SeqCst)
	}

	pub fn mark_done(&self) {
		self.done.store(true, Ordering::SeqCst);
	}

	pub async fn pid(&self) -> Option<Pid> {
		*self.process.read().await
	}

	/// Runs the command, relaunching it as the restart policy allows.
	/// Returns once the process has exited for the last time.
	pub async fn execute(&self) -> Result<(), CoprocessError> {
		let mut restarts = 0u64;
		loop {
			if restarts == 0 {
				tracing::trace!("initiating coprocess ({})", self.name);
			} else {
				tracing::trace!("initiating restart ({}) of coprocess ({})", restarts, self.name);
			}

			let Some(mut child) = self.launch().await? else {
				tracing::debug!("coprocess ({}) is terminating - not launching", self.name);
				break;
			};

			let status = child.wait().await;
			{
				let mut slot = self.process.write().await;
				*slot = None;
				self.running.send_replace(false);
			}
			self.log_exit(&self.exec[0], status);

			if !self.restart_policy().allows_restart(restarts) {
				break;
			}
			restarts += 1;
		}
		Ok(())
	}

	async fn launch(&self) -> Result<Option<Child>, CoprocessError> {
		let mut slot = self.process.write().await;
		if self.restart_policy() == RestartPolicy::Terminating {
			return Ok(None);
		}

		tracing::trace!("starting coprocess ({})", self.name);
		let child = self.spawn(&self.exec)?;
		*slot = child.id().map(|id| Pid::from_raw(id as i32));
		self.running.send_replace(true);
		Ok(Some(child))
	}

	/// Runs the stop command once, if one is configured. The coprocess
	/// won't be relaunched afterwards.
	pub async fn execute_stop_cmd(&self) -> Result<(), CoprocessError> {
		if self.stop_exec.is_empty() {
			tracing::trace!("no stop command specified for coprocess ({}) exiting immediately", self.name);
			return Ok(());
		}
		self.set_terminating();

		tracing::trace!("issuing stop command for coprocess ({})", self.name);
		let mut child = self.spawn(&self.stop_exec)?;
		let status = child.wait().await;
		self.log_exit(&self.stop_exec[0], status);
		tracing::trace!("stop command for coprocess ({}) completed", self.name);
		Ok(())
	}

	/// Stops the process with SIGTERM, then SIGINT, then SIGKILL, giving it
	/// up to five seconds to exit after each of the first two.
	pub async fn terminate(&self) -> Result<(), CoprocessError> {
		self.set_terminating();

		if self.is_done() {
			tracing::trace!("coprocess ({}) already exited", self.name);
			return Ok(());
		}

		for signal in [Signal::SIGTERM, Signal::SIGINT] {
			match self.send_signal(signal).await {
				Ok(Delivery::NotRunning) => return Ok(()),
				Ok(Delivery::Delivered) => {
					if self.wait_for_exit(Some(EXIT_WAIT)).await {
						return Ok(());
					}
				}
				Err(e) => tracing::warn!("{:#}", anyhow::Error::from(e)),
			}
			if self.is_done() {
				return Ok(());
			}
		}

		if let Delivery::NotRunning = self.send_signal(Signal::SIGKILL).await? {
			return Ok(());
		}
		self.wait_for_exit(None).await;
		tracing::debug!("coprocess ({}) exited after SIGKILL", self.name);
		Ok(())
	}

	async fn send_signal(&self, signal: Signal) -> Result<Delivery, CoprocessError> {
		let slot = self.process.read().await;
		let Some(pid) = *slot else {
			tracing::trace!("coprocess ({}) isn't running", self.name);
			return Ok(Delivery::NotRunning);
		};

		tracing::trace!("sending ({}) to coprocess ({}) with pid ({})", signal, self.name, pid);
		match kill(pid, signal) {
			Ok(()) => Ok(Delivery::Delivered),
			Err(Errno::ESRCH) => {
				tracing::debug!("({}) failed for coprocess ({}) pid ({}): process already finished", signal, self.name, pid);
				Ok(Delivery::NotRunning)
			}
			Err(source) => Err(CoprocessError::Signal {
				name: self.name.clone(),
				signal,
				pid: pid.as_raw(),
				source,
			}),
		}
	}

	/// Waits until no process is running. Returns false on timeout.
	async fn wait_for_exit(&self, timeout: Option<Duration>) -> bool {
		let mut running = self.running.subscribe();
		let exited = running.wait_for(|running| !*running);
		match timeout {
			Some(timeout) => matches!(tokio::time::timeout(timeout, exited).await, Ok(Ok(_))),
			None => exited.await.is_ok(),
		}
	}

	fn spawn(&self, argv: &[String]) -> Result<Child, CoprocessError> {
		let Some((program, args)) = argv.split_first() else {
			return Err(CoprocessError::Spawn {
				name: self.name.clone(),
				program: String::new(),
				source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
			});
		};

		let mut cmd = Command::new(program);
		cmd.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());

		if let Some(user) = &self.user {
			tracing::debug!("running coprocess ({}) as user ({})", self.name, user);
			let account = User::from_name(user)
				.map_err(|source| CoprocessError::UserLookup {
					name: self.name.clone(),
					user: user.clone(),
					source,
				})?
				.ok_or_else(|| CoprocessError::UnknownUser {
					name: self.name.clone(),
					user: user.clone(),
				})?;
			cmd.uid(account.uid.as_raw()).gid(account.gid.as_raw());
		}

		let mut child = cmd.spawn().map_err(|source| CoprocessError::Spawn {
			name: self.name.clone(),
			program: program.clone(),
			source,
		})?;

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(log_output(self.name.clone(), stdout));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(log_output(self.name.clone(), stderr));
		}
		Ok(child)
	}

	fn log_exit(&self, program: &str, status: std::io::Result<ExitStatus>) {
		match status {
			Ok(status) if status.success() => {
				tracing::debug!("coprocess ({}) process ({}) exited", self.name, program)
			}
			Ok(status) => match (status.code(), status.signal()) {
				(Some(code), _) => tracing::info!(
					"coprocess ({}) process ({}) exited with non-zero code: {}",
					self.name,
					program,
					code
				),
				(None, Some(signal)) => tracing::debug!(
					"coprocess ({}) process ({}) exited: signal {}",
					self.name,
					program,
					signal
				),
				(None, None) => tracing::error!("coprocess ({}) process ({}) exited with error: {}", self.name, program, status),
			},
			Err(e) => tracing::error!("coprocess ({}) process ({}) exited with error: {}", self.name, program, e),
		}
	}
}

/// Logs a coprocess stream line by line until it closes and returns how
/// many lines were logged.
async fn log_output<R: AsyncRead + Unpin>(name: String, reader: R) -> usize {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	let mut logged = 0;
	loop {
		match read_line_lossy(&mut reader, &mut buf).await {
			Ok(Some(line)) if line.is_empty() => continue,
			Ok(Some(line)) => {
				tracing::info!(coprocess = %name, "{}", line);
				logged += 1;
			}
			Ok(None) => break,
			Err(e) => {
				tracing::warn!(coprocess = %name, "error reading coprocess output: {}", e);
				break;
			}
		}
	}
	logged
}
