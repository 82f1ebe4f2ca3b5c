//! RP2040-specific HAL for the home-automation node
//!
//! Implements the shared `homenode-hal` traits on RP2040 peripherals:
//!
//! - Flash storage driver (implements `homenode_hal::FlashStorage`)
//! - Blocking UART transmit adapter (implements `homenode_hal::UartTx`)

#![no_std]

pub mod flash;
pub mod uart;

// Re-export shared traits from homenode-hal for convenience
pub use homenode_hal::{FlashStorage as FlashStorageTrait, StorageKey};
