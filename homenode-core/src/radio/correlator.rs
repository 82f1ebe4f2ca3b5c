//! Command/response correlation
//!
//! The radio module accepts one command at a time. The correlator writes
//! a command to the UART, remembers its opcode and matches the
//! command-complete event that answers it.

use homenode_hal::UartTx;
use homenode_protocol::{Command, FrameError};

/// Errors issuing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Command parameters do not fit a frame
    Encode(FrameError),
    /// UART write failed
    Uart,
    /// Another command is in flight and no more can be held back
    Busy,
}

impl From<FrameError> for CommandError {
    fn from(e: FrameError) -> Self {
        CommandError::Encode(e)
    }
}

/// Tracks the single in-flight radio command
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    outstanding: Option<u8>,
    elapsed: u16,
}

impl Correlator {
    pub const fn new() -> Self {
        Self {
            outstanding: None,
            elapsed: 0,
        }
    }

    /// Encode and write `command`, then wait for its completion
    pub fn send<T: UartTx + ?Sized>(
        &mut self,
        uart: &mut T,
        command: &Command<'_>,
    ) -> Result<(), CommandError> {
        write_command(uart, command)?;
        self.outstanding = Some(command.opcode());
        self.elapsed = 0;
        Ok(())
    }

    /// Opcode of the command awaiting completion
    pub fn outstanding(&self) -> Option<u8> {
        self.outstanding
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Match a command-complete; returns true if it answers the
    /// outstanding command
    pub fn complete(&mut self, command: u8) -> bool {
        if self.outstanding == Some(command) {
            self.outstanding = None;
            true
        } else {
            false
        }
    }

    /// Advance the response timer, returning the opcode that timed out
    pub fn tick(&mut self, timeout_ticks: u16) -> Option<u8> {
        let opcode = self.outstanding?;
        self.elapsed = self.elapsed.saturating_add(1);
        if self.elapsed > timeout_ticks {
            self.clear();
            Some(opcode)
        } else {
            None
        }
    }

    /// Forget the outstanding command
    pub fn clear(&mut self) {
        self.outstanding = None;
        self.elapsed = 0;
    }
}

/// Encode and write a command without tracking it
pub fn write_command<T: UartTx + ?Sized>(
    uart: &mut T,
    command: &Command<'_>,
) -> Result<(), CommandError> {
    let bytes = command.to_frame()?.encode_to_vec()?;
    uart.write_blocking(&bytes).map_err(|_| CommandError::Uart)?;
    uart.flush().map_err(|_| CommandError::Uart)
}

#[cfg(test)]
pub(crate) mod testing {
    use homenode_hal::UartTx;

    /// UART that records every write
    #[derive(Default)]
    pub struct RecordingUart {
        pub bytes: std::vec::Vec<u8>,
    }

    impl UartTx for RecordingUart {
        type Error = ();

        fn write_blocking(&mut self, data: &[u8]) -> Result<(), ()> {
            self.bytes.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ()> {
            Ok(())
        }
    }

    impl RecordingUart {
        /// Opcodes of every event frame written so far
        pub fn opcodes(&self) -> std::vec::Vec<u8> {
            let mut parser = homenode_protocol::FrameParser::new();
            self.bytes
                .iter()
                .filter_map(|&b| parser.feed(b).ok().flatten())
                .map(|frame| frame.opcode)
                .collect()
        }
    }
}
