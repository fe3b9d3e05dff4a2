use tokio::sync::mpsc;

/// Lets plugins and the signal listener ask for nginx to be reloaded.
/// Requests are queued and carried out one at a time, in order.
#[derive(Clone)]
pub struct ReloadHandle {
	tx: mpsc::UnboundedSender<String>,
}

pub struct ReloadQueue {
	rx: mpsc::UnboundedReceiver<String>,
}

pub fn reload_channel() -> (ReloadHandle, ReloadQueue) {
	let (tx, rx) = mpsc::unbounded_channel();
	(ReloadHandle { tx }, ReloadQueue { rx })
}

impl ReloadHandle {
	/// Returns false once nothing is processing reloads anymore.
	pub fn request(&self, cause: impl Into<String>) -> bool {
		self.tx.send(cause.into()).is_ok()
	}
}

impl ReloadQueue {
	pub async fn next(&mut self) -> Option<String> {
		self.rx.recv().await
	}
}
