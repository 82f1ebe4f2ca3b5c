//! Event frame encoding and decoding
//!
//! Frame format:
//! - SYNC (1 byte): 0xAA synchronization byte
//! - LENGTH (2 bytes, big-endian): opcode + payload length (1-129)
//! - OPCODE (1 byte): command or event identifier
//! - PAYLOAD (LENGTH-1 bytes): opcode-specific parameters
//! - CHECKSUM (1 byte): two's complement of the sum of LENGTH..PAYLOAD

use heapless::Vec;

use crate::checksum::additive;

/// Frame synchronization byte
pub const FRAME_SYNC: u8 = 0xAA;

/// Maximum payload size in bytes (receive buffer capacity)
pub const MAX_PAYLOAD_SIZE: usize = 128;

/// Maximum complete frame size (SYNC + LENGTH + OPCODE + MAX_PAYLOAD + CHECKSUM)
pub const MAX_FRAME_SIZE: usize = 1 + 2 + 1 + MAX_PAYLOAD_SIZE + 1;

/// Errors that can occur during frame parsing or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds the receive buffer
    PayloadTooLarge,
    /// Length field of zero (no opcode)
    InvalidLength,
    /// Checksum mismatch
    InvalidChecksum,
    /// Test-mode frame does not start with the expected prefix
    InvalidPrefix,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// A parsed or constructed event frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    /// Command or event identifier
    pub opcode: u8,
    /// Parameter bytes
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl Frame {
    /// Create a new frame with the given opcode and payload
    pub fn new(opcode: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let mut payload_vec = Vec::new();
        payload_vec
            .extend_from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLarge)?;

        Ok(Self {
            opcode,
            payload: payload_vec,
        })
    }

    /// Create a frame with no payload
    pub fn empty(opcode: u8) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }

    /// Value of the LENGTH field for this frame
    pub fn length(&self) -> u16 {
        // payload is bounded by MAX_PAYLOAD_SIZE, so this cannot overflow
        (self.payload.len() + 1) as u16
    }

    /// Checksum over LENGTH, OPCODE and PAYLOAD
    fn calculate_checksum(length: u16, opcode: u8, payload: &[u8]) -> u8 {
        let [hi, lo] = length.to_be_bytes();
        additive(&[hi, lo, opcode])
            .wrapping_add(additive(payload))
            .wrapping_neg()
    }

    /// The checksum byte that trails this frame on the wire
    pub fn checksum(&self) -> u8 {
        Self::calculate_checksum(self.length(), self.opcode, &self.payload)
    }

    /// Encode this frame into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let payload_len = self.payload.len();
        let frame_len = 5 + payload_len; // SYNC + LENGTH(2) + OPCODE + payload + CHECKSUM
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        let [len_hi, len_lo] = self.length().to_be_bytes();

        buffer[0] = FRAME_SYNC;
        buffer[1] = len_hi;
        buffer[2] = len_lo;
        buffer[3] = self.opcode;
        buffer[4..4 + payload_len].copy_from_slice(&self.payload);
        buffer[4 + payload_len] = self.checksum();

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        Vec::from_slice(&buffer[..len]).map_err(|_| FrameError::BufferTooSmall)
    }
}

/// State machine for parsing incoming event frames
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParseState,
    buffer: Vec<u8, MAX_PAYLOAD_SIZE>,
    length: u16,
    opcode: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Waiting for SYNC byte
    Idle,
    /// Got SYNC, waiting for LENGTH high byte
    LengthHigh,
    /// Waiting for LENGTH low byte
    LengthLow,
    /// Waiting for OPCODE
    Opcode,
    /// Reading payload bytes
    Payload,
    /// Waiting for CHECKSUM
    Checksum,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            buffer: Vec::new(),
            length: 0,
            opcode: 0,
        }
    }

    /// Reset the parser state
    pub fn reset(&mut self) {
        self.state = ParseState::Idle;
        self.buffer.clear();
        self.length = 0;
        self.opcode = 0;
    }

    /// Check if the parser is between frames
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Feed a single byte to the parser
    ///
    /// Returns `Ok(Some(frame))` when a complete valid frame is parsed,
    /// `Ok(None)` when more bytes are needed, or `Err` on parse error.
    /// Any error leaves the parser idle, waiting for the next SYNC byte.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        match self.state {
            ParseState::Idle => {
                if byte == FRAME_SYNC {
                    self.state = ParseState::LengthHigh;
                }
                // Silently ignore non-SYNC bytes while idle
                Ok(None)
            }
            ParseState::LengthHigh => {
                self.length = u16::from(byte) << 8;
                self.state = ParseState::LengthLow;
                Ok(None)
            }
            ParseState::LengthLow => {
                self.length |= u16::from(byte);
                if self.length == 0 {
                    self.reset();
                    return Err(FrameError::InvalidLength);
                }
                if usize::from(self.length - 1) > MAX_PAYLOAD_SIZE {
                    self.reset();
                    return Err(FrameError::PayloadTooLarge);
                }
                self.state = ParseState::Opcode;
                Ok(None)
            }
            ParseState::Opcode => {
                self.opcode = byte;
                self.buffer.clear();
                self.state = if self.length == 1 {
                    ParseState::Checksum
                } else {
                    ParseState::Payload
                };
                Ok(None)
            }
            ParseState::Payload => {
                if self.buffer.push(byte).is_err() {
                    self.reset();
                    return Err(FrameError::PayloadTooLarge);
                }
                if self.buffer.len() == usize::from(self.length - 1) {
                    self.state = ParseState::Checksum;
                }
                Ok(None)
            }
            ParseState::Checksum => {
                let expected = Frame::calculate_checksum(self.length, self.opcode, &self.buffer);

                if byte != expected {
                    self.reset();
                    return Err(FrameError::InvalidChecksum);
                }

                let frame = Frame {
                    opcode: self.opcode,
                    payload: core::mem::take(&mut self.buffer),
                };

                self.reset();
                Ok(Some(frame))
            }
        }
    }

    /// Feed multiple bytes to the parser
    ///
    /// Returns the first complete frame found, if any.
    /// Remaining bytes after a complete frame are not consumed.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<Option<Frame>, FrameError> {
        for &byte in bytes {
            if let Some(frame) = self.feed(byte)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}
