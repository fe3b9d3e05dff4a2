//! # wrapper-events
//!
//! Lifecycle events for a supervised nginx process.
//!
//! nginx does not report its lifecycle in a structured way, so the events
//! in this crate are re-derived from its log output. [`parser`] pulls pids
//! out of individual log lines, [`EventRegistry`] holds the seven well-known
//! events and the triggers registered against them, and
//! [`EventStateTracker`] turns an ordered stream of log lines into
//! `start`, `start-worker`, `reload` and `exit-worker` events.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wrapper_events::{EventKind, EventRegistry, EventStateTracker, Trigger};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let events = Arc::new(EventRegistry::new());
//! events.add_trigger(EventKind::Start, Trigger::new("example.on-start", |message| async move {
//! 	println!("nginx started: {:?}", message.metadata);
//! 	Ok(())
//! }));
//!
//! let mut tracker = EventStateTracker::new(Arc::clone(&events));
//! tracker.parse_for_triggerable_event("1#1: start worker processes").await.unwrap();
//! tracker.parse_for_triggerable_event("1#1: start worker process 2").await.unwrap();
//! # }
//! ```

pub mod error;
pub mod event;
pub mod parser;
pub mod registry;
pub mod tracker;

pub use error::{EventError, FatalEventError, LogParseError};
pub use event::{Event, EventKind, Message, Metadata, Trigger, TriggerFuture, ORIGIN};
pub use registry::{EventRegistry, ReloadFlag};
pub use tracker::{EventStateTracker, TrackerState};
