//! UART serial communication abstractions
//!
//! The radio module and the USB bridge are both plain UARTs. Writes are
//! blocking: a command is on the wire when `write_blocking` returns.

/// UART transmitter
pub trait UartTx {
    /// Error type for transmit operations
    type Error;

    /// Write data to the UART
    ///
    /// Blocks until all data has been written or an error occurs.
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<(), Self::Error>;
}

impl<T: UartTx + ?Sized> UartTx for &mut T {
    type Error = T::Error;

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write_blocking(data)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (**self).flush()
    }
}

/// UART configuration
#[derive(Debug, Clone, Copy)]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
}

impl UartConfig {
    /// Radio module default (BM7x-style modules ship at 115200)
    pub const RADIO: Self = Self { baudrate: 115_200 };

    /// USB bridge default
    pub const USB_BRIDGE: Self = Self { baudrate: 115_200 };
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::RADIO
    }
}
