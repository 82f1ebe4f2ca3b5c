//! Inter-task communication channels
//!
//! Defines the static channels used for communication between Embassy tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;

use crate::board::PROGRAM_SIZE;

/// Bytes forwarded per receive chunk
pub const RX_CHUNK_SIZE: usize = 32;

/// Channel capacity for received chunks
const RX_CHANNEL_SIZE: usize = 8;

/// Which UART a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxSource {
    /// Bluetooth radio module
    Radio,
    /// USB serial bridge
    Usb,
}

/// Bytes read from one UART
pub struct RxChunk {
    pub source: RxSource,
    pub bytes: Vec<u8, RX_CHUNK_SIZE>,
}

/// Copy of the program memory image
pub type ProgramImage = Vec<u8, PROGRAM_SIZE>;

/// Received bytes from both UARTs, in arrival order
pub static RX_CHANNEL: Channel<CriticalSectionRawMutex, RxChunk, RX_CHANNEL_SIZE> =
    Channel::new();

/// Latest program image to write to flash
pub static PROGRAM_SNAPSHOT: Signal<CriticalSectionRawMutex, ProgramImage> = Signal::new();
