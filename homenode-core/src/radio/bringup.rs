//! Radio module bring-up sequencer
//!
//! After power-up the module is walked through a fixed list of stages that
//! read its identity and settings and write the desired ones. Each stage
//! issues one command and waits for its completion. Failures (an error
//! status or no answer within the response timeout) retry the same stage;
//! the third failure resets the module and starts over from stage 0, and
//! the seventh gives up.

use heapless::Vec;
use homenode_hal::UartTx;
use homenode_protocol::radio::{ADDRESS_LEN, MAX_NAME_LEN, MAX_PIN_LEN, STATUS_SUCCESS};
use homenode_protocol::{Command, Opcode, PairingMode};

use super::correlator::{write_command, CommandError, Correlator};
use crate::config::{RadioConfig, TimingConfig};

/// Failed attempt that triggers a module reset
pub const RESET_ATTEMPT: u8 = 3;

/// Failed attempts before bring-up gives up
pub const MAX_ATTEMPTS: u8 = 7;

/// Paired devices remembered from the module
pub const MAX_PAIRED: usize = 8;

/// Bytes of module identity kept
pub const IDENTITY_LEN: usize = 16;

/// Bring-up stages in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    ReadIdentity,
    ReadName,
    WriteName,
    WriteAdvertisingData,
    WriteScanResponse,
    ReadPairingMode,
    WritePairingMode,
    ReadPin,
    WritePin,
    ReadPairedDevices,
    SetAdvertisingParameters,
    SetVisibility,
}

impl Stage {
    /// Number of stages
    pub const COUNT: usize = 12;

    /// Position in the sequence
    pub fn index(self) -> u8 {
        self as u8
    }

    /// The stage after this one
    pub fn next(self) -> Option<Stage> {
        use Stage::*;
        match self {
            ReadIdentity => Some(ReadName),
            ReadName => Some(WriteName),
            WriteName => Some(WriteAdvertisingData),
            WriteAdvertisingData => Some(WriteScanResponse),
            WriteScanResponse => Some(ReadPairingMode),
            ReadPairingMode => Some(WritePairingMode),
            WritePairingMode => Some(ReadPin),
            ReadPin => Some(WritePin),
            WritePin => Some(ReadPairedDevices),
            ReadPairedDevices => Some(SetAdvertisingParameters),
            SetAdvertisingParameters => Some(SetVisibility),
            SetVisibility => None,
        }
    }

    /// Opcode of the command this stage issues
    pub fn opcode(self) -> u8 {
        use Stage::*;
        match self {
            ReadIdentity => Opcode::READ_LOCAL_INFORMATION,
            ReadName => Opcode::READ_DEVICE_NAME,
            WriteName => Opcode::WRITE_DEVICE_NAME,
            WriteAdvertisingData => Opcode::WRITE_ADV_DATA,
            WriteScanResponse => Opcode::WRITE_SCAN_RESPONSE,
            ReadPairingMode => Opcode::READ_PAIRING_MODE,
            WritePairingMode => Opcode::WRITE_PAIRING_MODE,
            ReadPin => Opcode::READ_PIN,
            WritePin => Opcode::WRITE_PIN,
            ReadPairedDevices => Opcode::READ_PAIRED_DEVICES,
            SetAdvertisingParameters => Opcode::SET_ADV_PARAMETERS,
            SetVisibility => Opcode::SET_ADV_ENABLE,
        }
    }
}

/// Current stage and its failed-attempt count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandSession {
    /// Opcode of the command last issued for this stage
    pub command: u8,
    pub stage: Stage,
    /// Failed attempts, cleared when the stage advances
    pub attempts: u8,
}

impl CommandSession {
    fn new() -> Self {
        Self {
            command: Stage::ReadIdentity.opcode(),
            stage: Stage::ReadIdentity,
            attempts: 0,
        }
    }
}

/// Bring-up failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BringupError {
    /// Seventh failed attempt; the sequencer is idle
    AttemptsExhausted { stage: Stage },
    /// The module reset command could not be written
    Reset(CommandError),
}

/// Observable bring-up progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BringupEvent {
    /// Stage failed and will be retried
    Retrying { stage: Stage, attempts: u8 },
    /// Module reset issued; sequence restarts at stage 0
    ModuleReset { attempts: u8 },
    /// Moved on to a new stage
    Advanced(Stage),
    /// Final stage completed
    Completed,
}

/// A device remembered by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairedDevice {
    pub index: u8,
    pub address: [u8; ADDRESS_LEN],
}

/// Settings read from the module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleInfo {
    /// Raw local-information reply (firmware version, address)
    pub identity: Vec<u8, IDENTITY_LEN>,
    pub name: Vec<u8, MAX_NAME_LEN>,
    pub pairing_mode: Option<PairingMode>,
    pub pin: Vec<u8, MAX_PIN_LEN>,
    pub paired: Vec<PairedDevice, MAX_PAIRED>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Waiting for the module to boot
    Settling(u16),
    /// Ready to issue the current stage
    Issue,
    /// Waiting for the current stage's completion
    Awaiting(u16),
    Complete,
}

/// Bring-up sequencer
#[derive(Debug, Clone)]
pub struct Bringup {
    config: RadioConfig,
    session: CommandSession,
    phase: Phase,
    info: ModuleInfo,
    response_timeout: u16,
    reset_settle: u16,
    resets: u16,
}

impl Bringup {
    /// Create an idle sequencer that will apply `config`
    pub fn new(config: RadioConfig, timing: &TimingConfig) -> Self {
        Self {
            config,
            session: CommandSession::new(),
            phase: Phase::Idle,
            info: ModuleInfo::default(),
            response_timeout: timing.response_timeout_ticks,
            reset_settle: timing.reset_settle_ticks,
            resets: 0,
        }
    }

    /// Begin (or restart) bring-up from stage 0 after the settle delay
    pub fn start(&mut self) {
        self.session = CommandSession::new();
        self.info = ModuleInfo::default();
        self.phase = Phase::Settling(self.reset_settle);
    }

    /// Whether the sequence is running
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            Phase::Settling(_) | Phase::Issue | Phase::Awaiting(_)
        )
    }

    /// Whether every stage completed
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Settings bring-up applies
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn session(&self) -> &CommandSession {
        &self.session
    }

    /// Settings read from the module so far
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Module resets issued since boot
    pub fn resets(&self) -> u16 {
        self.resets
    }

    /// Advance timers and issue the next command when due
    pub fn tick<T: UartTx + ?Sized>(
        &mut self,
        correlator: &mut Correlator,
        uart: &mut T,
    ) -> Result<Option<BringupEvent>, BringupError> {
        match self.phase {
            Phase::Idle | Phase::Complete => Ok(None),
            Phase::Settling(0) => {
                self.phase = Phase::Issue;
                self.issue(correlator, uart)
            }
            Phase::Settling(n) => {
                self.phase = Phase::Settling(n - 1);
                Ok(None)
            }
            Phase::Issue => self.issue(correlator, uart),
            Phase::Awaiting(0) => {
                correlator.clear();
                self.fail(correlator, uart)
            }
            Phase::Awaiting(n) => {
                self.phase = Phase::Awaiting(n - 1);
                Ok(None)
            }
        }
    }

    /// Handle a command-complete already matched by the correlator
    pub fn on_complete<T: UartTx + ?Sized>(
        &mut self,
        correlator: &mut Correlator,
        uart: &mut T,
        command: u8,
        status: u8,
        data: &[u8],
    ) -> Result<Option<BringupEvent>, BringupError> {
        if !matches!(self.phase, Phase::Awaiting(_)) || command != self.session.command {
            return Ok(None);
        }
        if status != STATUS_SUCCESS {
            return self.fail(correlator, uart);
        }
        self.capture(data);
        Ok(Some(self.advance()))
    }

    fn advance(&mut self) -> BringupEvent {
        self.session.attempts = 0;
        match self.session.stage.next() {
            Some(stage) => {
                self.session.stage = stage;
                self.session.command = stage.opcode();
                self.phase = Phase::Issue;
                BringupEvent::Advanced(stage)
            }
            None => {
                self.phase = Phase::Complete;
                BringupEvent::Completed
            }
        }
    }

    /// Issue the current stage, skipping stages whose setting already matches
    fn issue<T: UartTx + ?Sized>(
        &mut self,
        correlator: &mut Correlator,
        uart: &mut T,
    ) -> Result<Option<BringupEvent>, BringupError> {
        while self.should_skip(self.session.stage) {
            if self.advance() == BringupEvent::Completed {
                return Ok(Some(BringupEvent::Completed));
            }
        }

        let stage = self.session.stage;
        let visible = self.config.visible;
        let interval = self.config.adv_interval;
        let mode = self.config.pairing_mode;
        let command = match stage {
            Stage::ReadIdentity => Command::ReadLocalInformation,
            Stage::ReadName => Command::ReadDeviceName,
            Stage::WriteName => Command::WriteDeviceName(self.config.name.as_bytes()),
            Stage::WriteAdvertisingData => Command::WriteAdvertisingData(&self.config.adv_data),
            Stage::WriteScanResponse => Command::WriteScanResponse(&self.config.scan_response),
            Stage::ReadPairingMode => Command::ReadPairingMode,
            Stage::WritePairingMode => Command::WritePairingMode(mode),
            Stage::ReadPin => Command::ReadPin,
            Stage::WritePin => Command::WritePin(self.config.pin.as_bytes()),
            Stage::ReadPairedDevices => Command::ReadPairedDevices,
            Stage::SetAdvertisingParameters => Command::SetAdvertisingParameters { interval },
            Stage::SetVisibility => Command::SetAdvertisingEnable(visible),
        };

        self.session.command = command.opcode();
        self.phase = Phase::Awaiting(self.response_timeout);
        if correlator.send(uart, &command).is_err() {
            return self.fail(correlator, uart);
        }
        Ok(None)
    }

    fn should_skip(&self, stage: Stage) -> bool {
        match stage {
            Stage::WriteName => {
                self.config.keep_name || self.info.name[..] == *self.config.name.as_bytes()
            }
            Stage::WritePairingMode => self.info.pairing_mode == Some(self.config.pairing_mode),
            Stage::WritePin => self.info.pin[..] == *self.config.pin.as_bytes(),
            _ => false,
        }
    }

    /// Remember what a read stage returned
    fn capture(&mut self, data: &[u8]) {
        match self.session.stage {
            Stage::ReadIdentity => self.info.identity = truncated(data),
            Stage::ReadName => self.info.name = truncated(data),
            Stage::ReadPairingMode => {
                self.info.pairing_mode = data.first().and_then(|&b| PairingMode::from_byte(b));
            }
            Stage::ReadPin => self.info.pin = truncated(data),
            Stage::ReadPairedDevices => self.info.paired = parse_paired(data),
            _ => {}
        }
    }

    /// Count a failed attempt and decide what happens next
    fn fail<T: UartTx + ?Sized>(
        &mut self,
        correlator: &mut Correlator,
        uart: &mut T,
    ) -> Result<Option<BringupEvent>, BringupError> {
        self.session.attempts = self.session.attempts.saturating_add(1);
        let attempts = self.session.attempts;

        if attempts >= MAX_ATTEMPTS {
            self.phase = Phase::Idle;
            return Err(BringupError::AttemptsExhausted {
                stage: self.session.stage,
            });
        }

        if attempts == RESET_ATTEMPT {
            correlator.clear();
            self.session.stage = Stage::ReadIdentity;
            self.session.command = Opcode::RESET;
            self.phase = Phase::Settling(self.reset_settle);
            self.resets = self.resets.saturating_add(1);
            write_command(uart, &Command::Reset).map_err(BringupError::Reset)?;
            return Ok(Some(BringupEvent::ModuleReset { attempts }));
        }

        self.phase = Phase::Issue;
        Ok(Some(BringupEvent::Retrying {
            stage: self.session.stage,
            attempts,
        }))
    }
}

fn truncated<const N: usize>(data: &[u8]) -> Vec<u8, N> {
    let len = data.len().min(N);
    Vec::from_slice(&data[..len]).unwrap_or_default()
}

/// Parse `[count, (index, address[6]) x count]`, ignoring a truncated tail
fn parse_paired(data: &[u8]) -> Vec<PairedDevice, MAX_PAIRED> {
    let mut paired = Vec::new();
    let Some((&count, records)) = data.split_first() else {
        return paired;
    };
    for record in records
        .chunks_exact(1 + ADDRESS_LEN)
        .take(usize::from(count))
    {
        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&record[1..]);
        if paired
            .push(PairedDevice {
                index: record[0],
                address,
            })
            .is_err()
        {
            break;
        }
    }
    paired
}
