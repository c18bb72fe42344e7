//! Tool configuration.
//!
//! # Sources (highest priority first)
//!
//! 1. Explicit setters (CLI flags such as `--store`)
//! 2. Environment variables (`FORMULARY_*`)
//! 3. `~/.config/formulary/config.toml`, or the file passed with `--config`
//! 4. Built-in defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use formulary_pm::config::Config;
//!
//! let config = Config::build(None, true).unwrap();
//! println!("Store: {}", config.store.display());
//! ```

#[allow(clippy::module_inception)]
mod config;
mod source;

pub use config::Config;
pub use source::{ConfigLoader, ConfigSource};
