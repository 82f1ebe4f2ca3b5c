//! Board-agnostic control core for the home-automation node
//!
//! This crate contains all logic that does not depend on specific
//! hardware:
//!
//! - Radio command correlation and the module bring-up sequencer
//! - Reliable per-channel message transport
//! - Per-channel message queues and the packet dispatcher
//! - The bytecode state-machine interpreter
//! - Program upload/download over the transport
//! - Configuration types
//!
//! Everything is driven from two entry points on [`node::Node`]: the
//! receive path (one inbound byte at a time) and the periodic tick.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod interpreter;
pub mod node;
pub mod radio;
pub mod traits;
pub mod transfer;
pub mod transport;

/// Firmware version reported in the identity message
pub const FIRMWARE_VERSION: [u8; 3] = [0, 1, 0];
