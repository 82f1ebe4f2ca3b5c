//! Production/test-mode framing
//!
//! When the radio module boots into its production test mode it speaks a
//! bare HCI event stream instead of the event protocol:
//!
//! ```text
//! ┌──────┬──────┬──────┬───────────────┐
//! │ 0x04 │ 0x0E │ PLEN │ PAYLOAD[PLEN] │
//! └──────┴──────┴──────┴───────────────┘
//! ```
//!
//! There is no checksum on this path. The payload of a command-complete
//! event is `num_packets, opcode_lo, opcode_hi, status, params...`.

use heapless::Vec;

use crate::frame::FrameError;

/// HCI event packet indicator
pub const TEST_MODE_PACKET: u8 = 0x04;

/// HCI command-complete event code
pub const TEST_MODE_COMMAND_COMPLETE: u8 = 0x0E;

/// Maximum test-mode payload
pub const MAX_TEST_PAYLOAD_SIZE: usize = 64;

/// A parsed test-mode (HCI command-complete) frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TestModeFrame {
    /// Raw event parameters
    pub payload: Vec<u8, MAX_TEST_PAYLOAD_SIZE>,
}

impl TestModeFrame {
    /// HCI opcode of the completed command, if the payload carries one
    pub fn command_opcode(&self) -> Option<u16> {
        match self.payload.get(1..3) {
            Some(&[lo, hi]) => Some(u16::from_le_bytes([lo, hi])),
            _ => None,
        }
    }

    /// HCI status of the completed command
    pub fn status(&self) -> Option<u8> {
        self.payload.get(3).copied()
    }

    /// Encode this frame into a byte buffer
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let len = 3 + self.payload.len();
        if buffer.len() < len {
            return Err(FrameError::BufferTooSmall);
        }
        buffer[0] = TEST_MODE_PACKET;
        buffer[1] = TEST_MODE_COMMAND_COMPLETE;
        buffer[2] = self.payload.len() as u8;
        buffer[3..len].copy_from_slice(&self.payload);
        Ok(len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Waiting for the packet indicator
    Idle,
    /// Waiting for the event code
    EventCode,
    /// Waiting for the parameter length
    Length,
    /// Reading parameters
    Payload,
}

/// State machine for parsing test-mode frames
#[derive(Debug, Clone)]
pub struct TestModeParser {
    state: ParseState,
    expected: u8,
    buffer: Vec<u8, MAX_TEST_PAYLOAD_SIZE>,
}

impl Default for TestModeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TestModeParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            expected: 0,
            buffer: Vec::new(),
        }
    }

    /// Reset the parser state
    pub fn reset(&mut self) {
        self.state = ParseState::Idle;
        self.expected = 0;
        self.buffer.clear();
    }

    /// Check if the parser is between frames
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Feed a single byte to the parser
    pub fn feed(&mut self, byte: u8) -> Result<Option<TestModeFrame>, FrameError> {
        match self.state {
            ParseState::Idle => {
                if byte == TEST_MODE_PACKET {
                    self.state = ParseState::EventCode;
                }
                Ok(None)
            }
            ParseState::EventCode => {
                if byte != TEST_MODE_COMMAND_COMPLETE {
                    self.reset();
                    return Err(FrameError::InvalidPrefix);
                }
                self.state = ParseState::Length;
                Ok(None)
            }
            ParseState::Length => {
                if usize::from(byte) > MAX_TEST_PAYLOAD_SIZE {
                    self.reset();
                    return Err(FrameError::PayloadTooLarge);
                }
                self.expected = byte;
                self.buffer.clear();
                if byte == 0 {
                    self.reset();
                    return Ok(Some(TestModeFrame {
                        payload: Vec::new(),
                    }));
                }
                self.state = ParseState::Payload;
                Ok(None)
            }
            ParseState::Payload => {
                if self.buffer.push(byte).is_err() {
                    self.reset();
                    return Err(FrameError::PayloadTooLarge);
                }
                if self.buffer.len() == usize::from(self.expected) {
                    let frame = TestModeFrame {
                        payload: core::mem::take(&mut self.buffer),
                    };
                    self.reset();
                    return Ok(Some(frame));
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_complete() {
        let mut parser = TestModeParser::new();
        let bytes = [0x04, 0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];
        let mut result = None;
        for &b in &bytes {
            if let Some(frame) = parser.feed(b).unwrap() {
                result = Some(frame);
            }
        }
        let frame = result.unwrap();
        assert_eq!(frame.command_opcode(), Some(0x0C03)); // HCI reset
        assert_eq!(frame.status(), Some(0x00));
        assert!(parser.is_idle());
    }

    #[test]
    fn test_wrong_event_code_resets() {
        let mut parser = TestModeParser::new();
        assert_eq!(parser.feed(0x04), Ok(None));
        assert_eq!(parser.feed(0x0F), Err(FrameError::InvalidPrefix));
        assert!(parser.is_idle());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut parser = TestModeParser::new();
        parser.feed(0x04).unwrap();
        parser.feed(0x0E).unwrap();
        assert_eq!(
            parser.feed(MAX_TEST_PAYLOAD_SIZE as u8 + 1),
            Err(FrameError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_encode_matches_parse() {
        let frame = TestModeFrame {
            payload: Vec::from_slice(&[0x01, 0x03, 0x0C, 0x00]).unwrap(),
        };
        let mut buf = [0u8; 16];
        let len = frame.encode(&mut buf).unwrap();

        let mut parser = TestModeParser::new();
        let mut parsed = None;
        for &b in &buf[..len] {
            parsed = parser.feed(b).unwrap().or(parsed);
        }
        assert_eq!(parsed, Some(frame));
    }
}
