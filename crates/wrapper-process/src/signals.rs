use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::control::ReloadHandle;
use crate::monitor::ProcessMonitor;

/// Installs handlers for INT, TERM, HUP and USR2.
///
/// INT and TERM start a graceful shutdown through the monitor; a second one
/// exits the wrapper immediately. HUP and USR2 queue a reload.
pub fn listen(monitor: Arc<ProcessMonitor>, reloads: ReloadHandle) -> std::io::Result<JoinHandle<()>> {
	let mut interrupt = signal(SignalKind::interrupt())?;
	let mut terminate = signal(SignalKind::terminate())?;
	let mut hangup = signal(SignalKind::hangup())?;
	let mut user2 = signal(SignalKind::user_defined2())?;

	Ok(tokio::spawn(async move {
		loop {
			let name = tokio::select! {
				Some(()) = interrupt.recv() => "SIGINT",
				Some(()) = terminate.recv() => "SIGTERM",
				Some(()) = hangup.recv() => "SIGHUP",
				Some(()) = user2.recv() => "SIGUSR2",
				else => break,
			};

			match name {
				"SIGINT" | "SIGTERM" => {
					if monitor.is_stopping() {
						tracing::warn!("second {} received - exiting immediately", name);
						std::process::exit(1);
					}
					tracing::info!("shutdown signal received - shutting down");
					monitor.shutdown(&format!("{} received", name));
				}
				_ => {
					let cause = format!("main process received {}", name);
					if !reloads.request(cause) {
						tracing::warn!("{} received but reloads are no longer processed", name);
					}
				}
			}
		}
	}))
}
