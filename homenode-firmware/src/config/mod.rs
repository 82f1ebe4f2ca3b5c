//! Configuration and program persistence
//!
//! The node configuration is parsed by `homenode_core::config`; this
//! module only handles reading it (and the program image) from flash.

mod loader;

pub use homenode_core::config::parse_config;
pub use loader::{log_config_summary, ConfigError, ConfigPersistence};
