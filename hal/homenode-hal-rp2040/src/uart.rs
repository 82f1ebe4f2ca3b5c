//! Blocking UART transmit adapter
//!
//! The control core writes radio commands and transport messages with
//! blocking semantics. Any `embedded_io::Write` transmitter (such as the
//! embassy-rp buffered UART TX half) becomes a `homenode_hal::UartTx`.

use embedded_io::Write;
use homenode_hal::UartTx;

/// `UartTx` over an `embedded_io::Write` transmitter
pub struct IoUart<W> {
    inner: W,
}

impl<W: Write> IoUart<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Get the wrapped transmitter back
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> UartTx for IoUart<W> {
    type Error = W::Error;

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.inner.write_all(data)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush()
    }
}
