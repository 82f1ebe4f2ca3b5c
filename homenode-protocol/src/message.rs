//! Application messages
//!
//! Once the transport delivers a frame's payload, that payload is an
//! application message: a kind tag, an additive checksum over the body,
//! then the kind-specific body. Receivers validate the checksum before
//! dispatching on the kind.

use heapless::Vec;

use crate::checksum::additive;

/// Maximum encoded message size (kind + checksum + body)
pub const MESSAGE_CAPACITY: usize = 32;

/// Maximum body size
pub const MAX_BODY_SIZE: usize = MESSAGE_CAPACITY - 2;

/// Parameter value meaning "no parameter" / "all list items"
pub const PARAM_NONE: u8 = 0xFF;

/// Errors from message encoding or validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// Fewer than the two header bytes
    TooShort,
    /// Body checksum does not match
    InvalidChecksum,
    /// Body does not fit in a message
    TooLarge,
}

/// Message kind tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// Transport acknowledgement carrying the sum of the acknowledged message
    Echo,
    /// Firmware version, module status and name
    Identity,
    /// Stored program length and whole-program checksum
    Consistency,
    /// Program bytes at an address
    Chunk,
    /// Start of a program upload
    UploadBegin,
    /// Interpreter status and current state
    ProgramState,
    /// Request a state transition
    Enter,
    /// Execute one peripheral action
    Action,
    /// I/O-expander output levels
    Outputs,
    /// One LED colour (list kind)
    Led,
    /// One display line (list kind)
    DisplayLine,
    /// Humidity and temperature
    Sensor,
    /// One paired device address (list kind)
    PairedDevice,
    /// Ask the node to queue a kind
    Request,
    /// Diagnostic counters
    Debug,
    /// Tag this firmware does not interpret
    Other(u8),
}

impl Kind {
    /// Parse a kind from its wire tag
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Kind::Echo,
            0x01 => Kind::Identity,
            0x02 => Kind::Consistency,
            0x03 => Kind::Chunk,
            0x04 => Kind::UploadBegin,
            0x05 => Kind::ProgramState,
            0x06 => Kind::Enter,
            0x07 => Kind::Action,
            0x10 => Kind::Outputs,
            0x11 => Kind::Led,
            0x12 => Kind::DisplayLine,
            0x13 => Kind::Sensor,
            0x14 => Kind::PairedDevice,
            0x1E => Kind::Request,
            0x1F => Kind::Debug,
            other => Kind::Other(other),
        }
    }

    /// Convert to wire tag
    pub fn to_byte(self) -> u8 {
        match self {
            Kind::Echo => 0x00,
            Kind::Identity => 0x01,
            Kind::Consistency => 0x02,
            Kind::Chunk => 0x03,
            Kind::UploadBegin => 0x04,
            Kind::ProgramState => 0x05,
            Kind::Enter => 0x06,
            Kind::Action => 0x07,
            Kind::Outputs => 0x10,
            Kind::Led => 0x11,
            Kind::DisplayLine => 0x12,
            Kind::Sensor => 0x13,
            Kind::PairedDevice => 0x14,
            Kind::Request => 0x1E,
            Kind::Debug => 0x1F,
            Kind::Other(other) => other,
        }
    }

    /// Returns true for kinds that are sent as one packet per list item
    pub fn is_list(self) -> bool {
        matches!(
            self,
            Kind::Chunk | Kind::Led | Kind::DisplayLine | Kind::PairedDevice
        )
    }
}

/// A decoded application message
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// Message kind
    pub kind: Kind,
    /// Kind-specific body
    pub body: Vec<u8, MAX_BODY_SIZE>,
}

impl Message {
    /// Create a message, checking the body fits
    pub fn new(kind: Kind, body: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            kind,
            body: Vec::from_slice(body).map_err(|_| MessageError::TooLarge)?,
        })
    }

    /// Validate and decode raw transport payload
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        match bytes {
            [kind, checksum, body @ ..] => {
                if additive(body) != *checksum {
                    return Err(MessageError::InvalidChecksum);
                }
                Self::new(Kind::from_byte(*kind), body)
            }
            _ => Err(MessageError::TooShort),
        }
    }

    /// Encode into a buffer, returning the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, MessageError> {
        encode_into(self.kind, &self.body, buffer)
    }
}

/// Encode `kind` and `body` into `buffer` without building a [`Message`]
pub fn encode_into(kind: Kind, body: &[u8], buffer: &mut [u8]) -> Result<usize, MessageError> {
    let len = body.len().checked_add(2).ok_or(MessageError::TooLarge)?;
    if len > MESSAGE_CAPACITY || buffer.len() < len {
        return Err(MessageError::TooLarge);
    }
    buffer[0] = kind.to_byte();
    buffer[1] = additive(body);
    buffer[2..len].copy_from_slice(body);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let msg = Message::new(Kind::Led, &[2, 0x10, 0x20, 0x30]).unwrap();
        let mut buf = [0u8; MESSAGE_CAPACITY];
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x11, 0x62, 2, 0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_decode_validates_checksum() {
        assert_eq!(
            Message::decode(&[0x06, 0x03, 0x02]),
            Err(MessageError::InvalidChecksum)
        );
        let msg = Message::decode(&[0x06, 0x02, 0x02]).unwrap();
        assert_eq!(msg.kind, Kind::Enter);
        assert_eq!(&msg.body[..], &[0x02]);
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(Message::decode(&[0x01]), Err(MessageError::TooShort));
    }

    #[test]
    fn test_body_too_large() {
        let body = [0u8; MAX_BODY_SIZE + 1];
        assert_eq!(Message::new(Kind::Debug, &body), Err(MessageError::TooLarge));
        let mut buf = [0u8; 64];
        assert_eq!(encode_into(Kind::Debug, &body, &mut buf), Err(MessageError::TooLarge));
    }

    #[test]
    fn test_kind_tags() {
        for byte in 0u8..=0x20 {
            assert_eq!(Kind::from_byte(byte).to_byte(), byte);
        }
        assert!(Kind::Chunk.is_list());
        assert!(!Kind::Identity.is_list());
    }
}
