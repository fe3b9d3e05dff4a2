//! Supervision of a single nginx master process.
//!
//! [`run::run_command`] starts nginx under a [`ProcessMonitor`], pumps its
//! output through the event state tracker and fires `pre-start` and `exit`
//! around it. The monitor turns INT and TERM into a graceful stop and HUP
//! and USR2 into serialized reloads. Plugins, such as the embedded
//! [`coprocess`] and [`template`] plugins, hook into the lifecycle events.

pub mod completion;
pub mod control;
pub mod coprocess;
pub mod error;
pub mod log;
pub mod monitor;
pub mod plugin;
pub mod run;
pub mod signals;
pub mod template;
pub mod version;

pub use completion::{Completion, CompletionGuard};
pub use control::{reload_channel, ReloadHandle, ReloadQueue};
pub use error::{CoprocessError, CoprocessInitError, PluginError, RenderError, RunError, TemplateError, VersionError};
pub use monitor::{fatal_exit, ProcessMonitor};
pub use plugin::{Plugin, PluginContext, PluginMetadata};
pub use version::NginxVersion;
