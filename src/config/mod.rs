// src/config/mod.rs

//! Configuration loading and validation for cmdtrigger.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate definitions and analyse the trigger graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{CommandConfig, ConfigFile, RawConfigFile, SettingsSection};
pub use validate::trigger_cycles;
