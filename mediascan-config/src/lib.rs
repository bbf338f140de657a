//! Configuration loading for mediascan.
//!
//! Options come from a TOML or JSON file (or inline JSON in the
//! environment), with a handful of environment variables layered on top.
//! The result is validated before anything is started: hard errors stop the
//! process, softer problems are returned as warnings for the caller to log.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, ConfigSource, DatabaseConfig};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
