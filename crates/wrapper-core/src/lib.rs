pub mod config;
pub mod defaults;
pub mod error;
pub mod hostid;
pub mod interpolate;
pub mod settings;
pub mod time;

pub use error::SettingsError;
pub use settings::Settings;
