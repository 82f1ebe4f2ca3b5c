//! Configuration persistence
//!
//! Loads the node configuration and the stored program image from flash.
//! Falls back to embedded defaults if flash is empty.

use core::str;
use defmt::*;

use homenode_core::config::{NodeConfig, CONFIG_VERSION};
use homenode_hal::RamProgramMemory;
use homenode_hal_rp2040::flash::{FlashError, Rp2040FlashStorage, StorageKey, MAX_ITEM_SIZE};
// Import the FlashStorage trait to bring methods into scope
use homenode_hal_rp2040::FlashStorageTrait;

use super::parse_config;

/// Maximum serialized config size (binary)
const MAX_CONFIG_SIZE: usize = 256;

/// Configuration persistence errors
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Flash operation failed
    Flash(FlashError),
    /// Deserialization failed
    Deserialize,
    /// TOML parsing failed
    TomlParse,
    /// Invalid UTF-8 in TOML data
    InvalidUtf8,
    /// Config version mismatch
    VersionMismatch,
}

impl From<FlashError> for ConfigError {
    fn from(e: FlashError) -> Self {
        ConfigError::Flash(e)
    }
}

/// Flash-backed configuration and program store
pub struct ConfigPersistence<'d> {
    storage: Rp2040FlashStorage<'d>,
}

impl<'d> ConfigPersistence<'d> {
    pub fn new(storage: Rp2040FlashStorage<'d>) -> Self {
        Self { storage }
    }

    /// Hand the storage on to the persist task
    pub fn into_storage(self) -> Rp2040FlashStorage<'d> {
        self.storage
    }

    /// Load configuration from flash
    ///
    /// Tries the TOML text first, then the binary postcard format.
    pub async fn load(&mut self) -> Result<NodeConfig, ConfigError> {
        info!("Loading configuration from flash...");

        match self.load_toml().await {
            Ok(config) => {
                info!("Loaded configuration from TOML");
                return Ok(config);
            }
            Err(ConfigError::Flash(FlashError::NotFound)) => {
                debug!("No TOML config found, trying binary format");
            }
            Err(e) => {
                warn!("Failed to load TOML config: {:?}, trying binary", e);
            }
        }

        self.load_binary().await
    }

    /// Load the stored program image into `memory`
    ///
    /// Returns the number of bytes loaded. A missing image leaves the
    /// memory erased, which the interpreter treats as disabled.
    pub async fn load_program<const N: usize>(
        &mut self,
        memory: &mut RamProgramMemory<N>,
    ) -> Result<usize, ConfigError> {
        let mut buffer = [0u8; N];
        let len = self.storage.read(StorageKey::Program, &mut buffer).await?;
        memory.load(&buffer[..len]);
        debug!("Loaded {} byte program image", len);
        Ok(len)
    }

    async fn load_toml(&mut self) -> Result<NodeConfig, ConfigError> {
        let mut buffer = [0u8; MAX_ITEM_SIZE];
        let len = self
            .storage
            .read(StorageKey::NodeConfigToml, &mut buffer)
            .await?;

        debug!("Read {} bytes of TOML from flash", len);

        let toml_str = str::from_utf8(&buffer[..len]).map_err(|_| ConfigError::InvalidUtf8)?;

        let config = parse_config(toml_str).map_err(|e| {
            warn!("TOML parse error: {:?}", e);
            ConfigError::TomlParse
        })?;

        log_config_summary(&config);
        Ok(config)
    }

    async fn load_binary(&mut self) -> Result<NodeConfig, ConfigError> {
        let mut buffer = [0u8; MAX_CONFIG_SIZE];
        let len = self
            .storage
            .read(StorageKey::NodeConfig, &mut buffer)
            .await?;

        debug!("Read {} bytes of binary config from flash", len);

        let config: NodeConfig =
            postcard::from_bytes(&buffer[..len]).map_err(|_| ConfigError::Deserialize)?;

        if config.version != CONFIG_VERSION {
            warn!(
                "Config version mismatch: found {}, expected {}",
                config.version, CONFIG_VERSION
            );
            return Err(ConfigError::VersionMismatch);
        }

        log_config_summary(&config);
        Ok(config)
    }
}

/// Log a summary of the loaded configuration
pub fn log_config_summary(config: &NodeConfig) {
    info!("Configuration loaded successfully");
    debug!("  name: {}", config.radio.name.as_str());
    debug!("  pairing: {:?}", config.radio.pairing_mode);
    debug!(
        "  tick {}ms, retry {} ticks x{}",
        config.timing.tick_ms, config.timing.retry_timeout_ticks, config.timing.max_retries
    );
}
