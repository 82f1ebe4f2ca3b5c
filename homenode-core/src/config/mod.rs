//! Node configuration
//!
//! Board-agnostic configuration structures. The firmware stores them as
//! postcard binary data or as TOML text; [`parse_config`] reads the latter.

pub mod toml;
pub mod types;

pub use toml::{parse_config, ConfigError};
pub use types::*;
