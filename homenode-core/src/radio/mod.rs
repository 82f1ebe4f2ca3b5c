//! Radio module driver
//!
//! [`Radio`] owns the inbound framer, the command correlator and the
//! bring-up sequencer. Once bring-up completes the module is in
//! application mode: connection events are tracked and transparent data
//! from the peer is handed to the transport.

pub mod bringup;
pub mod correlator;

pub use bringup::{
    Bringup, BringupError, BringupEvent, CommandSession, ModuleInfo, PairedDevice, Stage,
};
pub use correlator::{CommandError, Correlator};

use heapless::{Deque, Vec};
use homenode_hal::UartTx;
use homenode_protocol::radio::STATUS_SUCCESS;
use homenode_protocol::{
    Command, FrameError, Framer, FramingMode, ModuleStatus, Opcode, Received, Response,
    TestModeFrame, MAX_PAYLOAD_SIZE,
};

use crate::config::NodeConfig;
use crate::transport::Link;

/// Errors from the radio receive and tick paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Inbound frame rejected
    Frame(FrameError),
    /// Command could not be written
    Command(CommandError),
    /// Bring-up failed
    Bringup(BringupError),
}

impl From<FrameError> for RadioError {
    fn from(e: FrameError) -> Self {
        RadioError::Frame(e)
    }
}

impl From<CommandError> for RadioError {
    fn from(e: CommandError) -> Self {
        RadioError::Command(e)
    }
}

impl From<BringupError> for RadioError {
    fn from(e: BringupError) -> Self {
        RadioError::Bringup(e)
    }
}

/// Something the rest of the node should react to
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// Bring-up progress
    Bringup(BringupEvent),
    /// Module reported a new operating status
    Status(ModuleStatus),
    /// A peer connected
    Connected { handle: u8 },
    /// The peer disconnected
    Disconnected,
    /// Application data from the peer
    Data(Vec<u8, MAX_PAYLOAD_SIZE>),
    /// A command failed in application mode; status was re-requested
    CommandFailed { command: u8, status: u8 },
    /// Production/test-mode event
    TestMode(TestModeFrame),
}

/// Application-mode commands held while another is in flight
const PENDING_COMMANDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppCommand {
    Advertise(bool),
    Disconnect,
    ReadStatus,
}

impl AppCommand {
    fn command(self) -> Command<'static> {
        match self {
            AppCommand::Advertise(enable) => Command::SetAdvertisingEnable(enable),
            AppCommand::Disconnect => Command::Disconnect,
            AppCommand::ReadStatus => Command::ReadStatus,
        }
    }
}

/// Radio module state
#[derive(Debug, Clone)]
pub struct Radio {
    framer: Framer,
    correlator: Correlator,
    bringup: Bringup,
    pending: Deque<AppCommand, PENDING_COMMANDS>,
    status: ModuleStatus,
    connection: Option<u8>,
    response_timeout: u16,
}

impl Radio {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            framer: Framer::new(),
            correlator: Correlator::new(),
            bringup: Bringup::new(config.radio.clone(), &config.timing),
            pending: Deque::new(),
            status: ModuleStatus::Idle,
            connection: None,
            response_timeout: config.timing.response_timeout_ticks,
        }
    }

    /// Restart bring-up, discarding any in-flight command and connection
    pub fn start(&mut self) {
        self.framer.reset();
        self.correlator.clear();
        self.pending.clear();
        self.connection = None;
        self.bringup.start();
    }

    /// Switch between event and test-mode framing
    pub fn set_framing_mode(&mut self, mode: FramingMode) {
        self.framer.set_mode(mode);
    }

    /// Whether bring-up completed and the module is in application mode
    pub fn is_ready(&self) -> bool {
        self.bringup.is_complete()
    }

    /// Whether a peer is connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Last reported module status
    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    pub fn bringup(&self) -> &Bringup {
        &self.bringup
    }

    /// Settings read from the module during bring-up
    pub fn info(&self) -> &ModuleInfo {
        self.bringup.info()
    }

    /// Process one byte from the radio UART
    pub fn on_byte<T: UartTx + ?Sized>(
        &mut self,
        byte: u8,
        uart: &mut T,
    ) -> Result<Option<RadioEvent>, RadioError> {
        match self.framer.feed(byte)? {
            None => Ok(None),
            Some(Received::TestMode(frame)) => Ok(Some(RadioEvent::TestMode(frame))),
            Some(Received::Event(frame)) => {
                let response = Response::from_frame(&frame)?;
                self.handle(response, uart)
            }
        }
    }

    fn handle<T: UartTx + ?Sized>(
        &mut self,
        response: Response,
        uart: &mut T,
    ) -> Result<Option<RadioEvent>, RadioError> {
        match response {
            Response::CommandComplete {
                command,
                status,
                data,
            } => {
                let matched = self.correlator.complete(command);
                if self.bringup.is_active() {
                    if !matched {
                        return Ok(None);
                    }
                    let event = self.bringup.on_complete(
                        &mut self.correlator,
                        uart,
                        command,
                        status,
                        &data,
                    )?;
                    return Ok(event.map(RadioEvent::Bringup));
                }

                self.issue_next(uart)?;
                if status != STATUS_SUCCESS {
                    if command != Opcode::READ_STATUS && !self.pending.is_full() {
                        self.issue(uart, AppCommand::ReadStatus)?;
                    }
                    return Ok(Some(RadioEvent::CommandFailed { command, status }));
                }
                if command == Opcode::READ_STATUS {
                    if let Some(&byte) = data.first() {
                        self.status = ModuleStatus::from_byte(byte);
                        return Ok(Some(RadioEvent::Status(self.status)));
                    }
                }
                Ok(None)
            }
            Response::StatusReport(status) => {
                self.status = status;
                Ok(Some(RadioEvent::Status(status)))
            }
            Response::ConnectionComplete { status, handle, .. } if status == STATUS_SUCCESS => {
                self.connection = Some(handle);
                Ok(Some(RadioEvent::Connected { handle }))
            }
            Response::DisconnectionComplete { .. } => {
                if self.connection.take().is_some() {
                    Ok(Some(RadioEvent::Disconnected))
                } else {
                    Ok(None)
                }
            }
            Response::TransparentData { data, .. } if self.connection.is_some() => {
                Ok(Some(RadioEvent::Data(data)))
            }
            _ => Ok(None),
        }
    }

    /// Periodic tick: bring-up progress and command timeouts
    pub fn tick<T: UartTx + ?Sized>(
        &mut self,
        uart: &mut T,
    ) -> Result<Option<RadioEvent>, RadioError> {
        if self.bringup.is_active() {
            let event = self.bringup.tick(&mut self.correlator, uart)?;
            return Ok(event.map(RadioEvent::Bringup));
        }
        self.correlator.tick(self.response_timeout);
        self.issue_next(uart)?;
        Ok(None)
    }

    /// Send application data to the connected peer
    ///
    /// Returns false when there is no peer or the write failed.
    pub fn send_data<T: UartTx + ?Sized>(&self, uart: &mut T, data: &[u8]) -> bool {
        self.data_link(uart).transmit(data)
    }

    /// Transport link over the current connection
    ///
    /// The link captures the connection handle, so it does not borrow the
    /// radio.
    pub fn data_link<'a, T: UartTx + ?Sized>(&self, uart: &'a mut T) -> DataLink<'a, T> {
        DataLink {
            handle: self.connection.filter(|_| self.is_ready()),
            uart,
        }
    }

    /// Start or stop advertising
    ///
    /// Held back until any in-flight command completes or times out.
    pub fn set_visible<T: UartTx + ?Sized>(
        &mut self,
        uart: &mut T,
        visible: bool,
    ) -> Result<(), CommandError> {
        self.issue(uart, AppCommand::Advertise(visible))
    }

    /// Drop the current connection
    pub fn disconnect<T: UartTx + ?Sized>(&mut self, uart: &mut T) -> Result<(), CommandError> {
        if self.connection.is_none() {
            return Ok(());
        }
        self.issue(uart, AppCommand::Disconnect)
    }

    /// Number of application commands waiting to be written
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Write `command` now if the module is idle, otherwise queue it
    fn issue<T: UartTx + ?Sized>(
        &mut self,
        uart: &mut T,
        command: AppCommand,
    ) -> Result<(), CommandError> {
        if self.bringup.is_active() {
            return Err(CommandError::Busy);
        }
        if self.correlator.is_busy() || !self.pending.is_empty() {
            return self
                .pending
                .push_back(command)
                .map_err(|_| CommandError::Busy);
        }
        self.correlator.send(uart, &command.command())
    }

    /// Write queued commands until one is in flight
    fn issue_next<T: UartTx + ?Sized>(&mut self, uart: &mut T) -> Result<(), CommandError> {
        while !self.correlator.is_busy() {
            let Some(command) = self.pending.pop_front() else {
                break;
            };
            if command == AppCommand::Disconnect && self.connection.is_none() {
                continue;
            }
            self.correlator.send(uart, &command.command())?;
        }
        Ok(())
    }
}

/// Transparent-data link to the connected peer
pub struct DataLink<'a, T: ?Sized> {
    handle: Option<u8>,
    uart: &'a mut T,
}

impl<T: UartTx + ?Sized> Link for DataLink<'_, T> {
    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn transmit(&mut self, payload: &[u8]) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        let command = Command::SendTransparentData {
            handle,
            data: payload,
        };
        correlator::write_command(&mut *self.uart, &command).is_ok()
    }
}
