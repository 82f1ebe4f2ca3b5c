//! Homenode wire protocols
//!
//! This crate defines the byte-level formats spoken by the node:
//!
//! - The radio module's asynchronous-event UART protocol
//! - The radio module's production/test-mode protocol (HCI events)
//! - The application messages exchanged with a paired peer once a frame's
//!   payload is delivered through the reliable transport
//!
//! # Event frame
//!
//! ```text
//! ┌──────┬───────┬───────┬────────┬──────────────┬──────────┐
//! │ SYNC │ LEN_H │ LEN_L │ OPCODE │ PAYLOAD      │ CHECKSUM │
//! │ 0xAA │ 1B    │ 1B    │ 1B     │ LEN-1 bytes  │ 1B       │
//! └──────┴───────┴───────┴────────┴──────────────┴──────────┘
//! ```
//!
//! # Application message
//!
//! ```text
//! ┌──────┬──────────┬─────────────┐
//! │ KIND │ CHECKSUM │ BODY        │
//! │ 1B   │ 1B       │ 0–30 bytes  │
//! └──────┴──────────┴─────────────┘
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod checksum;
pub mod frame;
pub mod framer;
pub mod message;
pub mod radio;
pub mod test_mode;

pub use checksum::{additive, frame_checksum};
pub use frame::{Frame, FrameError, FrameParser, FRAME_SYNC, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use framer::{Framer, FramingMode, Received};
pub use message::{Kind, Message, MessageError, MESSAGE_CAPACITY, PARAM_NONE};
pub use radio::{Command, ModuleStatus, Opcode, PairingMode, Response};
pub use test_mode::{TestModeFrame, TestModeParser};
