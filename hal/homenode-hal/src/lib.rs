//! Homenode Hardware Abstraction Layer
//!
//! This crate defines the hardware abstraction traits the control core is
//! written against. Chip-specific crates implement them; host tests use the
//! in-memory implementations provided here.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  homenode-core / homenode-firmware      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  homenode-hal (this crate - traits)     │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//!            ┌─────────────────┐
//!            │ homenode-hal-   │
//!            │    rp2040       │
//!            └─────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`uart::UartTx`] - Blocking serial transmit
//! - [`memory::ProgramMemory`] - Byte-addressable program storage
//! - [`flash::FlashStorage`] - Persistent key-value storage

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod memory;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use flash::{FlashError, FlashStorage, StorageKey};
pub use memory::{MemoryError, ProgramMemory, RamProgramMemory};
pub use uart::UartTx;
