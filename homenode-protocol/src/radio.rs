//! Radio module command and event set
//!
//! Commands are sent as event frames whose opcode selects the command.
//! The module answers with event frames; [`Response::from_frame`] selects
//! the variant by opcode so callers never reinterpret raw payload bytes.

use heapless::Vec;

use crate::frame::{Frame, FrameError, MAX_PAYLOAD_SIZE};

/// Command and event opcodes
pub struct Opcode;

impl Opcode {
    // Commands (host -> module)
    pub const READ_LOCAL_INFORMATION: u8 = 0x01;
    pub const RESET: u8 = 0x02;
    pub const READ_STATUS: u8 = 0x03;
    pub const READ_DEVICE_NAME: u8 = 0x07;
    pub const WRITE_DEVICE_NAME: u8 = 0x08;
    pub const ERASE_PAIRED_DEVICES: u8 = 0x09;
    pub const READ_PAIRING_MODE: u8 = 0x0A;
    pub const WRITE_PAIRING_MODE: u8 = 0x0B;
    pub const READ_PAIRED_DEVICES: u8 = 0x0C;
    pub const WRITE_ADV_DATA: u8 = 0x11;
    pub const WRITE_SCAN_RESPONSE: u8 = 0x12;
    pub const SET_ADV_PARAMETERS: u8 = 0x13;
    pub const DISCONNECT: u8 = 0x1B;
    pub const SET_ADV_ENABLE: u8 = 0x1C;
    pub const SEND_TRANSPARENT_DATA: u8 = 0x3F;
    pub const READ_PIN: u8 = 0x50;
    pub const WRITE_PIN: u8 = 0x51;

    // Events (module -> host)
    pub const PAIRING_COMPLETE: u8 = 0x61;
    pub const CONNECTION_COMPLETE: u8 = 0x71;
    pub const DISCONNECTION_COMPLETE: u8 = 0x72;
    pub const COMMAND_COMPLETE: u8 = 0x80;
    pub const STATUS_REPORT: u8 = 0x81;
    pub const TRANSPARENT_DATA: u8 = 0x9A;
}

/// Command-complete status for success
pub const STATUS_SUCCESS: u8 = 0x00;

/// Maximum device name length
pub const MAX_NAME_LEN: usize = 16;

/// Maximum advertising or scan-response payload
pub const MAX_ADV_DATA_LEN: usize = 31;

/// Maximum PIN length
pub const MAX_PIN_LEN: usize = 6;

/// Bluetooth device address length
pub const ADDRESS_LEN: usize = 6;

/// Operating status reported by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleStatus {
    Scanning,
    Connecting,
    Standby,
    Broadcast,
    TransparentServiceEnabled,
    Idle,
    Shutdown,
    ConfigureMode,
    Connected,
    Unknown(u8),
}

impl ModuleStatus {
    /// Parse a status byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => ModuleStatus::Scanning,
            0x02 => ModuleStatus::Connecting,
            0x03 => ModuleStatus::Standby,
            0x05 => ModuleStatus::Broadcast,
            0x08 => ModuleStatus::TransparentServiceEnabled,
            0x09 => ModuleStatus::Idle,
            0x0A => ModuleStatus::Shutdown,
            0x0B => ModuleStatus::ConfigureMode,
            0x0C => ModuleStatus::Connected,
            other => ModuleStatus::Unknown(other),
        }
    }

    /// Convert to wire format byte
    pub fn to_byte(self) -> u8 {
        match self {
            ModuleStatus::Scanning => 0x01,
            ModuleStatus::Connecting => 0x02,
            ModuleStatus::Standby => 0x03,
            ModuleStatus::Broadcast => 0x05,
            ModuleStatus::TransparentServiceEnabled => 0x08,
            ModuleStatus::Idle => 0x09,
            ModuleStatus::Shutdown => 0x0A,
            ModuleStatus::ConfigureMode => 0x0B,
            ModuleStatus::Connected => 0x0C,
            ModuleStatus::Unknown(other) => other,
        }
    }

    /// True when a peer link is up
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ModuleStatus::Connected | ModuleStatus::TransparentServiceEnabled
        )
    }
}

/// Pairing mode setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PairingMode {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    #[default]
    JustWork,
}

impl PairingMode {
    /// Parse a pairing mode byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(PairingMode::DisplayOnly),
            0x01 => Some(PairingMode::DisplayYesNo),
            0x02 => Some(PairingMode::KeyboardOnly),
            0x03 => Some(PairingMode::NoInputNoOutput),
            0x04 => Some(PairingMode::JustWork),
            _ => None,
        }
    }

    /// Convert to wire format byte
    pub fn to_byte(self) -> u8 {
        match self {
            PairingMode::DisplayOnly => 0x00,
            PairingMode::DisplayYesNo => 0x01,
            PairingMode::KeyboardOnly => 0x02,
            PairingMode::NoInputNoOutput => 0x03,
            PairingMode::JustWork => 0x04,
        }
    }
}

/// A command for the radio module
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command<'a> {
    ReadLocalInformation,
    Reset,
    ReadStatus,
    ReadDeviceName,
    /// Write device name (persisted in module flash)
    WriteDeviceName(&'a [u8]),
    ErasePairedDevices,
    ReadPairingMode,
    WritePairingMode(PairingMode),
    ReadPairedDevices,
    WriteAdvertisingData(&'a [u8]),
    WriteScanResponse(&'a [u8]),
    /// Advertising interval in 0.625 ms units
    SetAdvertisingParameters { interval: u16 },
    Disconnect,
    /// Advertising on (visible) or off (hidden)
    SetAdvertisingEnable(bool),
    SendTransparentData { handle: u8, data: &'a [u8] },
    ReadPin,
    WritePin(&'a [u8]),
}

/// Store-to-flash flag used by the write-name/adv-data commands
const STORE_PERSISTENT: u8 = 0x01;

fn append(payload: &mut Vec<u8, MAX_PAYLOAD_SIZE>, bytes: &[u8]) -> Result<(), FrameError> {
    payload
        .extend_from_slice(bytes)
        .map_err(|_| FrameError::PayloadTooLarge)
}

impl Command<'_> {
    /// Opcode for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::ReadLocalInformation => Opcode::READ_LOCAL_INFORMATION,
            Command::Reset => Opcode::RESET,
            Command::ReadStatus => Opcode::READ_STATUS,
            Command::ReadDeviceName => Opcode::READ_DEVICE_NAME,
            Command::WriteDeviceName(_) => Opcode::WRITE_DEVICE_NAME,
            Command::ErasePairedDevices => Opcode::ERASE_PAIRED_DEVICES,
            Command::ReadPairingMode => Opcode::READ_PAIRING_MODE,
            Command::WritePairingMode(_) => Opcode::WRITE_PAIRING_MODE,
            Command::ReadPairedDevices => Opcode::READ_PAIRED_DEVICES,
            Command::WriteAdvertisingData(_) => Opcode::WRITE_ADV_DATA,
            Command::WriteScanResponse(_) => Opcode::WRITE_SCAN_RESPONSE,
            Command::SetAdvertisingParameters { .. } => Opcode::SET_ADV_PARAMETERS,
            Command::Disconnect => Opcode::DISCONNECT,
            Command::SetAdvertisingEnable(_) => Opcode::SET_ADV_ENABLE,
            Command::SendTransparentData { .. } => Opcode::SEND_TRANSPARENT_DATA,
            Command::ReadPin => Opcode::READ_PIN,
            Command::WritePin(_) => Opcode::WRITE_PIN,
        }
    }

    /// Encode this command into a frame
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let mut payload = Vec::<u8, MAX_PAYLOAD_SIZE>::new();
        match self {
            Command::WriteDeviceName(name) => {
                if name.len() > MAX_NAME_LEN {
                    return Err(FrameError::PayloadTooLarge);
                }
                append(&mut payload, &[STORE_PERSISTENT])?;
                append(&mut payload, name)?;
            }
            Command::WriteAdvertisingData(data) | Command::WriteScanResponse(data) => {
                if data.len() > MAX_ADV_DATA_LEN {
                    return Err(FrameError::PayloadTooLarge);
                }
                append(&mut payload, &[STORE_PERSISTENT])?;
                append(&mut payload, data)?;
            }
            Command::WritePairingMode(mode) => {
                append(&mut payload, &[mode.to_byte()])?;
            }
            Command::SetAdvertisingParameters { interval } => {
                let [hi, lo] = interval.to_be_bytes();
                // Connectable undirected advertising
                append(&mut payload, &[hi, lo, 0x00])?;
            }
            Command::Disconnect => {
                append(&mut payload, &[0x00])?;
            }
            Command::SetAdvertisingEnable(visible) => {
                append(&mut payload, &[u8::from(*visible)])?;
            }
            Command::SendTransparentData { handle, data } => {
                append(&mut payload, &[*handle])?;
                append(&mut payload, data)?;
            }
            Command::WritePin(pin) => {
                if pin.len() > MAX_PIN_LEN {
                    return Err(FrameError::PayloadTooLarge);
                }
                append(&mut payload, pin)?;
            }
            Command::ReadLocalInformation
            | Command::Reset
            | Command::ReadStatus
            | Command::ReadDeviceName
            | Command::ErasePairedDevices
            | Command::ReadPairingMode
            | Command::ReadPairedDevices
            | Command::ReadPin => {}
        }

        Frame::new(self.opcode(), &payload)
    }
}

/// Events reported by the radio module, selected by opcode
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    /// Completion of a previously issued command
    CommandComplete {
        command: u8,
        status: u8,
        data: Vec<u8, MAX_PAYLOAD_SIZE>,
    },
    /// Unsolicited operating-status transition
    StatusReport(ModuleStatus),
    /// A peer connected
    ConnectionComplete {
        status: u8,
        handle: u8,
        address: [u8; ADDRESS_LEN],
    },
    /// A peer disconnected
    DisconnectionComplete { handle: u8, reason: u8 },
    /// Pairing finished
    PairingComplete { handle: u8, result: u8 },
    /// Application data received from the peer
    TransparentData {
        handle: u8,
        data: Vec<u8, MAX_PAYLOAD_SIZE>,
    },
    /// Opcode this host does not interpret
    Unknown { opcode: u8 },
}

impl Response {
    /// Parse a response from a validated frame
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let p = &frame.payload[..];
        match frame.opcode {
            Opcode::COMMAND_COMPLETE => match p {
                [command, status, data @ ..] => Ok(Response::CommandComplete {
                    command: *command,
                    status: *status,
                    data: Vec::from_slice(data).map_err(|_| FrameError::PayloadTooLarge)?,
                }),
                _ => Err(FrameError::InvalidLength),
            },
            Opcode::STATUS_REPORT => match p {
                [status, ..] => Ok(Response::StatusReport(ModuleStatus::from_byte(*status))),
                _ => Err(FrameError::InvalidLength),
            },
            Opcode::CONNECTION_COMPLETE => match p {
                [status, handle, _role, _addr_type, rest @ ..] if rest.len() >= ADDRESS_LEN => {
                    let mut address = [0u8; ADDRESS_LEN];
                    address.copy_from_slice(&rest[..ADDRESS_LEN]);
                    Ok(Response::ConnectionComplete {
                        status: *status,
                        handle: *handle,
                        address,
                    })
                }
                _ => Err(FrameError::InvalidLength),
            },
            Opcode::DISCONNECTION_COMPLETE => match p {
                [handle, reason, ..] => Ok(Response::DisconnectionComplete {
                    handle: *handle,
                    reason: *reason,
                }),
                _ => Err(FrameError::InvalidLength),
            },
            Opcode::PAIRING_COMPLETE => match p {
                [handle, result, ..] => Ok(Response::PairingComplete {
                    handle: *handle,
                    result: *result,
                }),
                _ => Err(FrameError::InvalidLength),
            },
            Opcode::TRANSPARENT_DATA => match p {
                [handle, data @ ..] => Ok(Response::TransparentData {
                    handle: *handle,
                    data: Vec::from_slice(data).map_err(|_| FrameError::PayloadTooLarge)?,
                }),
                _ => Err(FrameError::InvalidLength),
            },
            opcode => Ok(Response::Unknown { opcode }),
        }
    }

    /// Encode this response into a frame (for testing or simulation)
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let mut payload = Vec::<u8, MAX_PAYLOAD_SIZE>::new();
        let opcode = match self {
            Response::CommandComplete {
                command,
                status,
                data,
            } => {
                append(&mut payload, &[*command, *status])?;
                append(&mut payload, data)?;
                Opcode::COMMAND_COMPLETE
            }
            Response::StatusReport(status) => {
                append(&mut payload, &[status.to_byte()])?;
                Opcode::STATUS_REPORT
            }
            Response::ConnectionComplete {
                status,
                handle,
                address,
            } => {
                append(&mut payload, &[*status, *handle, 0x01, 0x00])?;
                append(&mut payload, address)?;
                Opcode::CONNECTION_COMPLETE
            }
            Response::DisconnectionComplete { handle, reason } => {
                append(&mut payload, &[*handle, *reason])?;
                Opcode::DISCONNECTION_COMPLETE
            }
            Response::PairingComplete { handle, result } => {
                append(&mut payload, &[*handle, *result])?;
                Opcode::PAIRING_COMPLETE
            }
            Response::TransparentData { handle, data } => {
                append(&mut payload, &[*handle])?;
                append(&mut payload, data)?;
                Opcode::TRANSPARENT_DATA
            }
            Response::Unknown { opcode } => *opcode,
        };
        Frame::new(opcode, &payload)
    }
}
