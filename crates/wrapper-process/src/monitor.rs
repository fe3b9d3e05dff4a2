use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wrapper_events::{EventKind, EventRegistry, FatalEventError, Metadata};

use crate::completion::Completion;
use crate::control::{ReloadHandle, ReloadQueue};

/// Owns the lifetime of the supervised nginx process.
///
/// One per run, shared behind an `Arc` by the signal listener, the reload
/// worker and the tasks spawned by [`crate::run::run_command`].
pub struct ProcessMonitor {
	events: Arc<EventRegistry>,
	completion: Completion,
	stop: watch::Sender<bool>,
	started: AtomicBool,
	process: Mutex<Option<Pid>>,
	reload_turn: tokio::sync::Mutex<()>,
}

impl ProcessMonitor {
	pub fn new(events: Arc<EventRegistry>, completion: Completion) -> Arc<Self> {
		let (stop, _) = watch::channel(false);
		Arc::new(Self {
			events,
			completion,
			stop,
			started: AtomicBool::new(false),
			process: Mutex::new(None),
			reload_turn: tokio::sync::Mutex::new(()),
		})
	}

	pub fn events(&self) -> &Arc<EventRegistry> {
		&self.events
	}

	pub fn completion(&self) -> &Completion {
		&self.completion
	}

	pub fn is_started(&self) -> bool {
		self.started.load(Ordering::SeqCst)
	}

	pub fn is_stopping(&self) -> bool {
		*self.stop.borrow()
	}

	pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
		self.stop.subscribe()
	}

	pub fn pid(&self) -> Option<Pid> {
		*self.process.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(crate) fn mark_started(&self, pid: Pid) {
		*self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(pid);
		self.started.store(true, Ordering::SeqCst);
	}

	/// Broadcasts the stop signal. Only the first call has any effect;
	/// returns whether this call was it.
	pub fn shutdown(&self, cause: &str) -> bool {
		let first = self.stop.send_if_modified(|stopping| {
			if *stopping {
				false
			} else {
				*stopping = true;
				true
			}
		});
		if first {
			tracing::info!("process stopped due to: {}", cause);
		}
		first
	}

	/// Asks nginx to reload its configuration.
	///
	/// Waits for any reload already in flight to finish, fires `pre-reload`,
	/// flags the reload as started and sends SIGHUP. The flag is cleared by
	/// the state tracker when the first new worker appears, or here if the
	/// signal can't be delivered.
	pub async fn reload(&self, cause: &str) -> Result<(), FatalEventError> {
		if !self.is_started() {
			tracing::info!("nginx process not yet started - can't HUP");
			return Ok(());
		}
		let Some(pid) = self.pid() else {
			tracing::error!("can't issue HUP because there is no process assigned");
			return Ok(());
		};

		let _turn = self.reload_turn.lock().await;
		self.events.reload_flag().wait_until_clear().await;

		if self.is_stopping() {
			tracing::info!("nginx is shutting down - ignoring reload due to: {}", cause);
			return Ok(());
		}

		tracing::info!("SIGHUP sent to nginx process due to: {}", cause);
		let metadata = to_metadata(json!({ "reload_cause": cause }));
		let errors = self.events.trigger(EventKind::PreReload, metadata).await;
		if !errors.is_empty() {
			return Err(FatalEventError::new(EventKind::PreReload, errors));
		}

		self.events.reload_flag().set();
		if let Err(e) = kill(pid, Signal::SIGHUP) {
			self.events.reload_flag().clear();
			tracing::error!("SIGHUP of nginx process ({}) failed: {}", pid, e);
		}
		Ok(())
	}

	/// Handles INT, TERM, HUP and USR2 and works through queued reload
	/// requests. A second INT or TERM exits immediately.
	pub fn listen(self: &Arc<Self>, reloads: ReloadHandle, queue: ReloadQueue) -> std::io::Result<JoinHandle<()>> {
		let signals = crate::signals::listen(Arc::clone(self), reloads)?;
		let monitor = Arc::clone(self);
		tokio::spawn(reload_worker(monitor, queue));
		Ok(signals)
	}
}

async fn reload_worker(monitor: Arc<ProcessMonitor>, mut queue: ReloadQueue) {
	while let Some(cause) = queue.next().await {
		if let Err(e) = monitor.reload(&cause).await {
			fatal_exit(e);
		}
	}
}

/// Logs every trigger error and terminates the wrapper with status 1.
pub fn fatal_exit(err: FatalEventError) -> ! {
	err.log();
	std::process::exit(1)
}

pub(crate) fn to_metadata(value: serde_json::Value) -> Metadata {
	match value {
		serde_json::Value::Object(map) => map,
		_ => Metadata::new(),
	}
}
