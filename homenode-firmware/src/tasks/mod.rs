//! Embassy async tasks
//!
//! Each task runs independently and communicates via channels/signals.

pub mod node;
pub mod persist;
pub mod tick;
pub mod uart_rx;

pub use node::{node_task, NodeResources};
pub use persist::persist_task;
pub use tick::tick_task;
pub use uart_rx::{radio_rx_task, usb_rx_task};
