//! Configuration type definitions

use heapless::{String, Vec};
use homenode_protocol::radio::{MAX_ADV_DATA_LEN, MAX_NAME_LEN, MAX_PIN_LEN};
use homenode_protocol::PairingMode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration format version
pub const CONFIG_VERSION: u8 = 1;

/// Minimum PIN length in digits
pub const MIN_PIN_LEN: usize = 4;

/// Desired radio module settings, applied during bring-up
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RadioConfig {
    /// Advertised device name
    pub name: String<MAX_NAME_LEN>,
    /// Leave whatever name the module already has
    pub keep_name: bool,
    /// Pairing PIN (ASCII digits)
    pub pin: String<MAX_PIN_LEN>,
    /// Pairing mode
    pub pairing_mode: PairingMode,
    /// Raw advertising payload
    pub adv_data: Vec<u8, MAX_ADV_DATA_LEN>,
    /// Raw scan-response payload
    pub scan_response: Vec<u8, MAX_ADV_DATA_LEN>,
    /// Advertising interval in 0.625 ms units
    pub adv_interval: u16,
    /// Advertise once bring-up completes
    pub visible: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        let mut name = String::new();
        let _ = name.push_str("homenode");
        let mut pin = String::new();
        let _ = pin.push_str("123456");
        Self {
            name,
            keep_name: false,
            pin,
            pairing_mode: PairingMode::JustWork,
            adv_data: Vec::new(),
            scan_response: Vec::new(),
            adv_interval: 160,
            visible: true,
        }
    }
}

/// Tick-based timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimingConfig {
    /// Tick period in milliseconds
    pub tick_ms: u16,
    /// Ticks to wait for a radio command-complete
    pub response_timeout_ticks: u16,
    /// Ticks to wait after a module reset
    pub reset_settle_ticks: u16,
    /// Ticks before an unacknowledged message is retransmitted
    pub retry_timeout_ticks: u16,
    /// Retransmissions before a message is abandoned
    pub max_retries: u8,
    /// Ticks between interpreter evaluations
    pub eval_interval_ticks: u16,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            response_timeout_ticks: 50,
            reset_settle_ticks: 100,
            retry_timeout_ticks: 20,
            max_retries: 3,
            eval_interval_ticks: 5,
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeConfig {
    /// Format version
    pub version: u8,
    /// Radio module settings
    pub radio: RadioConfig,
    /// Timing
    pub timing: TimingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            radio: RadioConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Check a PIN is 4 to 6 ASCII digits
pub fn is_valid_pin(pin: &str) -> bool {
    (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}
