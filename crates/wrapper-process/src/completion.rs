use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts outstanding units of asynchronous work and lets a caller wait
/// for all of them to finish.
#[derive(Clone, Default)]
pub struct Completion {
	inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
	outstanding: AtomicUsize,
	idle: Notify,
}

impl Completion {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn increment(&self) {
		self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
	}

	/// Marks one unit finished. Calls beyond the number of increments are
	/// ignored.
	pub fn done(&self) {
		let previous = self
			.inner
			.outstanding
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
		if previous == Ok(1) {
			self.inner.idle.notify_waiters();
		}
	}

	/// Increments now and decrements when the returned guard is dropped.
	pub fn track(&self) -> CompletionGuard {
		self.increment();
		CompletionGuard {
			completion: self.clone(),
		}
	}

	pub fn outstanding(&self) -> usize {
		self.inner.outstanding.load(Ordering::SeqCst)
	}

	pub async fn wait(&self) {
		loop {
			let idle = self.inner.idle.notified();
			tokio::pin!(idle);
			idle.as_mut().enable();
			if self.outstanding() == 0 {
				return;
			}
			idle.await;
		}
	}
}

pub struct CompletionGuard {
	completion: Completion,
}

impl Drop for CompletionGuard {
	fn drop(&mut self) {
		self.completion.done();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn wait_returns_immediately_when_idle() {
		let completion = Completion::new();
		tokio::time::timeout(Duration::from_secs(1), completion.wait()).await.unwrap();
	}

	#[tokio::test]
	async fn wait_blocks_until_every_guard_drops() {
		let completion = Completion::new();
		let first = completion.track();
		let second = completion.track();
		assert_eq!(completion.outstanding(), 2);

		let waiter = {
			let completion = completion.clone();
			tokio::spawn(async move { completion.wait().await })
		};

		drop(first);
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!waiter.is_finished());

		drop(second);
		tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
		assert_eq!(completion.outstanding(), 0);
	}

	#[test]
	fn done_never_underflows() {
		let completion = Completion::new();
		completion.done();
		assert_eq!(completion.outstanding(), 0);
		completion.increment();
		completion.done();
		completion.done();
		assert_eq!(completion.outstanding(), 0);
	}
}
