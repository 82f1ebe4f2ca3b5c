//! Collaborator traits
//!
//! These traits define the interface between the control core and the
//! board: peripheral drivers, the input sampler, and extra message-kind
//! builders plugged into the dispatcher.

pub mod input;
pub mod packet;
pub mod peripherals;

pub use input::InputSource;
pub use packet::{Built, PacketBuilder};
pub use peripherals::{PeripheralError, Peripherals, SensorReading, RGB_LEN};
