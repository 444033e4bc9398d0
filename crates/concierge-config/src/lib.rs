//! Configuration system for Concierge.
//!
//! Provides TOML-based configuration with:
//! - Per-subsystem sections (`[llm]`, `[embedding]`, `[session]`,
//!   `[retrieval]`, `[chat]`, `[storage]`, `[logging]`)
//! - Config file layering (user config + project-local + explicit path)
//! - API key resolution (env var → config file, with plaintext warnings)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{ResolvedSecret, SecretSource, resolve_api_key};
pub use types::*;
