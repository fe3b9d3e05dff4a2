use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::EventError;

/// System of origin for every event in the catalog.
pub const ORIGIN: &str = "nginx";

/// Key/value data passed to triggers when an event fires.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub type TriggerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The seven lifecycle events of a supervised nginx process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
	/// Before nginx starts for the first time.
	PreStart,
	/// nginx started its first worker process.
	Start,
	/// A worker process was started.
	StartWorker,
	/// Before nginx is asked to reload.
	PreReload,
	/// nginx started the first worker after a reload.
	Reload,
	/// A worker process exited.
	ExitWorker,
	/// The main nginx process exited.
	Exit,
}

impl EventKind {
	pub const ALL: [EventKind; 7] = [
		EventKind::PreStart,
		EventKind::Start,
		EventKind::StartWorker,
		EventKind::PreReload,
		EventKind::Reload,
		EventKind::ExitWorker,
		EventKind::Exit,
	];

	pub fn name(self) -> &'static str {
		match self {
			EventKind::PreStart => "pre-start",
			EventKind::Start => "start",
			EventKind::StartWorker => "start-worker",
			EventKind::PreReload => "pre-reload",
			EventKind::Reload => "reload",
			EventKind::ExitWorker => "exit-worker",
			EventKind::Exit => "exit",
		}
	}

	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.name() == name)
	}

	/// Unique id made of the origin and the name, e.g. `nginx.start`.
	pub fn id(self) -> String {
		format!("{}.{}", ORIGIN, self.name())
	}

	pub(crate) fn index(self) -> usize {
		self as usize
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for EventKind {
	type Err = EventError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_name(s).ok_or_else(|| EventError::UnknownEvent { name: s.to_string() })
	}
}

/// What a trigger receives when its event fires.
#[derive(Debug, Clone)]
pub struct Message {
	pub event: EventKind,
	pub metadata: Metadata,
}

type TriggerFn = dyn Fn(Message) -> TriggerFuture + Send + Sync;

/// A named callback bound to an event. Cloning a trigger shares the
/// underlying function.
#[derive(Clone)]
pub struct Trigger {
	name: String,
	function: Arc<TriggerFn>,
}

impl Trigger {
	pub fn new<F, Fut>(name: impl Into<String>, function: F) -> Self
	where
		F: Fn(Message) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		Self {
			name: name.into(),
			function: Arc::new(move |message| -> TriggerFuture { Box::pin(function(message)) }),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn invoke(&self, message: Message) -> anyhow::Result<()> {
		(self.function)(message).await
	}
}

impl fmt::Debug for Trigger {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{{{}}}", self.name)
	}
}

#[derive(Default)]
struct Triggers {
	ordered: Vec<Trigger>,
	last: Option<Trigger>,
}

/// One event of the catalog along with its triggers.
pub struct Event {
	kind: EventKind,
	triggers: RwLock<Triggers>,
}

impl Event {
	pub(crate) fn new(kind: EventKind) -> Self {
		Self {
			kind,
			triggers: RwLock::new(Triggers::default()),
		}
	}

	pub fn kind(&self) -> EventKind {
		self.kind
	}

	pub fn name(&self) -> &'static str {
		self.kind.name()
	}

	pub fn origin(&self) -> &'static str {
		ORIGIN
	}

	pub fn id(&self) -> String {
		self.kind.id()
	}

	pub fn add_trigger(&self, trigger: Trigger) {
		self.triggers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.ordered
			.push(trigger);
	}

	/// Sets the trigger that always runs after all others. Replaces any
	/// previously set final trigger.
	pub fn add_final_trigger(&self, trigger: Trigger) {
		self.triggers.write().unwrap_or_else(PoisonError::into_inner).last = Some(trigger);
	}

	pub fn trigger_names(&self) -> Vec<String> {
		let triggers = self.triggers.read().unwrap_or_else(PoisonError::into_inner);
		triggers.ordered.iter().map(|t| t.name.clone()).collect()
	}

	/// Invokes every trigger in registration order and then the final
	/// trigger. A failing trigger doesn't stop the ones after it; all
	/// failures are returned.
	pub async fn trigger(&self, metadata: Metadata) -> Vec<anyhow::Error> {
		let (ordered, last) = {
			let triggers = self.triggers.read().unwrap_or_else(PoisonError::into_inner);
			(triggers.ordered.clone(), triggers.last.clone())
		};

		let message = Message {
			event: self.kind,
			metadata,
		};
		let mut errors = Vec::new();

		for trigger in ordered.iter().chain(last.iter()) {
			tracing::trace!("invoking trigger ({}) for event ({})", trigger.name, self.id());
			if let Err(e) = trigger.invoke(message.clone()).await {
				errors.push(e.context(format!("trigger ({}) failed for event ({})", trigger.name, self.id())));
			}
		}

		errors
	}
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{{ {} triggers=[{}] }}", self.id(), self.trigger_names().join(","))
	}
}

impl fmt::Debug for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}
