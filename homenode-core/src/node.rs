//! The node: all control-core state behind two entry points
//!
//! [`Node::on_radio_byte`] and [`Node::on_usb_byte`] run the receive path
//! one byte at a time. [`Node::tick`] runs everything periodic: radio
//! bring-up and command timeouts, transport retries, one dispatch step per
//! channel and, every `eval_interval_ticks`, an interpreter check.
//!
//! Hardware is borrowed per call through [`NodeIo`], so the node itself
//! owns no drivers and can be driven from a host test.

use homenode_hal::{ProgramMemory, UartTx};
use homenode_protocol::message::{encode_into, MAX_BODY_SIZE};
use homenode_protocol::radio::MAX_NAME_LEN;
use homenode_protocol::{
    additive, Frame, FrameError, FrameParser, Kind, Message, MessageError, Opcode, PARAM_NONE,
};

use crate::config::NodeConfig;
use crate::dispatch::{dispatch, Dispatched, MessageQueue};
use crate::interpreter::program::{NO_STATE, STATUS_ADDR};
use crate::interpreter::{
    program_length, ActionSink, CheckOutcome, Device, Interpreter, InterpreterError,
    InterpreterState, ProgramError, PORT_SIZE, STATUS_DISABLED,
};
use crate::radio::{CommandError, DataLink, Radio, RadioError, RadioEvent};
use crate::traits::{Built, InputSource, PacketBuilder, PeripheralError, Peripherals};
use crate::transfer::{self, ChunkOutcome, ProgramTransfer, TransferError};
use crate::transport::{
    ChannelId, Delivery, Link, Transport, TransportConfig, CHANNEL_COUNT,
};
use crate::FIRMWARE_VERSION;

/// Input flag: a Bluetooth peer is connected
pub const FLAG_BLUETOOTH: u8 = 1 << 0;

/// Input flag: the USB host has sent a valid frame
pub const FLAG_USB: u8 = 1 << 1;

/// Input flag: radio bring-up completed
pub const FLAG_RADIO_READY: u8 = 1 << 2;

/// Errors from the receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeError {
    /// Radio receive or command failure
    Radio(RadioError),
    /// Malformed USB frame
    Frame(FrameError),
    /// Malformed application message
    Message(MessageError),
    /// Program upload failure
    Transfer(TransferError),
    /// Stored program could not be started
    Program(ProgramError),
    /// A peripheral refused an action
    Peripheral(PeripheralError),
}

impl From<RadioError> for NodeError {
    fn from(e: RadioError) -> Self {
        NodeError::Radio(e)
    }
}

impl From<FrameError> for NodeError {
    fn from(e: FrameError) -> Self {
        NodeError::Frame(e)
    }
}

impl From<MessageError> for NodeError {
    fn from(e: MessageError) -> Self {
        NodeError::Message(e)
    }
}

impl From<TransferError> for NodeError {
    fn from(e: TransferError) -> Self {
        NodeError::Transfer(e)
    }
}

impl From<ProgramError> for NodeError {
    fn from(e: ProgramError) -> Self {
        NodeError::Program(e)
    }
}

impl From<CommandError> for NodeError {
    fn from(e: CommandError) -> Self {
        NodeError::Radio(RadioError::Command(e))
    }
}

/// What the receive path did with a completed frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeEvent {
    /// A radio event other than peer data
    Radio(RadioEvent),
    /// An application message was accepted
    Received { channel: ChannelId, kind: Kind },
    /// An upload finished and the new program is enabled
    ProgramLoaded { length: u16 },
}

/// Everything one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReport {
    pub radio: Result<Option<RadioEvent>, RadioError>,
    /// Transport completions, by channel index
    pub deliveries: [Option<Delivery>; CHANNEL_COUNT],
    /// Dispatch step, by channel index
    pub dispatched: [Dispatched; CHANNEL_COUNT],
    /// Interpreter check, when one was due
    pub check: Option<Result<CheckOutcome, InterpreterError>>,
    /// First action failure during the check
    pub action_error: Option<NodeError>,
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeStats {
    pub framer_errors: u16,
    pub give_ups: u16,
    pub loops: u16,
}

/// Hardware borrowed for one call
pub struct NodeIo<'a, R, U, M, P, I, X> {
    /// Radio module UART
    pub radio: &'a mut R,
    /// USB bridge UART
    pub usb: &'a mut U,
    pub memory: &'a mut M,
    pub peripherals: &'a mut P,
    pub inputs: &'a mut I,
    /// Board-specific message kinds, tried after the built-in ones
    pub extensions: &'a mut X,
}

/// Control-core state
#[derive(Debug, Clone)]
pub struct Node {
    radio: Radio,
    usb: FrameParser,
    usb_active: bool,
    transport: Transport,
    queues: [MessageQueue; CHANNEL_COUNT],
    interpreter: Interpreter,
    transfer: ProgramTransfer,
    eval_interval: u16,
    eval_elapsed: u16,
    stats: NodeStats,
}

impl Node {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            radio: Radio::new(config),
            usb: FrameParser::new(),
            usb_active: false,
            transport: Transport::new(TransportConfig {
                retry_timeout_ticks: config.timing.retry_timeout_ticks,
                max_retries: config.timing.max_retries,
            }),
            queues: [MessageQueue::new(), MessageQueue::new()],
            interpreter: Interpreter::new(),
            transfer: ProgramTransfer::new(),
            eval_interval: config.timing.eval_interval_ticks,
            eval_elapsed: 0,
            stats: NodeStats::default(),
        }
    }

    /// Begin radio bring-up and start the stored program
    ///
    /// `ProgramError::NotEnabled` means no program is stored; the radio
    /// is started either way.
    pub fn start<M: ProgramMemory + ?Sized>(&mut self, memory: &M) -> Result<(), ProgramError> {
        self.radio.start();
        self.eval_elapsed = 0;
        self.interpreter.start(memory)
    }

    pub fn radio(&self) -> &Radio {
        &self.radio
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Outbound queue of `channel`
    pub fn queue(&self, channel: ChannelId) -> &MessageQueue {
        &self.queues[channel.index()]
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Whether an upload is in progress
    pub fn is_uploading(&self) -> bool {
        self.transfer.is_active()
    }

    pub fn is_usb_active(&self) -> bool {
        self.usb_active
    }

    /// Mark the USB host present or gone
    ///
    /// Losing the host drops whatever was pending on the USB channel,
    /// including an upload it had started.
    pub fn set_usb_active(&mut self, active: bool) {
        if !active {
            self.transport.cancel(ChannelId::Usb);
            self.queues[ChannelId::Usb.index()].clear();
            self.transfer.abort_from(ChannelId::Usb);
        }
        self.usb_active = active;
    }

    /// Flags byte appended to the sampled inputs
    pub fn input_flags(&self) -> u8 {
        let mut flags = 0;
        if self.radio.is_connected() {
            flags |= FLAG_BLUETOOTH;
        }
        if self.usb_active {
            flags |= FLAG_USB;
        }
        if self.radio.is_ready() {
            flags |= FLAG_RADIO_READY;
        }
        flags
    }

    /// Diagnostic body: `[framer_errors, give_ups, queue_drops, bringup_resets]`
    pub fn debug_counters(&self) -> [u8; 4] {
        let drops = self
            .queues
            .iter()
            .map(MessageQueue::dropped)
            .fold(0, u16::saturating_add);
        [
            saturate(self.stats.framer_errors),
            saturate(self.stats.give_ups),
            saturate(drops),
            saturate(self.radio.bringup().resets()),
        ]
    }

    fn connected(&self) -> [bool; CHANNEL_COUNT] {
        let mut connected = [false; CHANNEL_COUNT];
        connected[ChannelId::Usb.index()] = self.usb_active;
        connected[ChannelId::Bluetooth.index()] =
            self.radio.is_ready() && self.radio.is_connected();
        connected
    }

    /// Process one byte from the radio UART
    pub fn on_radio_byte<R, U, M, P, I, X>(
        &mut self,
        byte: u8,
        io: &mut NodeIo<'_, R, U, M, P, I, X>,
    ) -> Result<Option<NodeEvent>, NodeError>
    where
        R: UartTx,
        U: UartTx,
        M: ProgramMemory,
        P: Peripherals,
        I: InputSource,
        X: PacketBuilder,
    {
        let event = match self.radio.on_byte(byte, &mut *io.radio) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) => {
                if matches!(e, RadioError::Frame(_)) {
                    self.stats.framer_errors = self.stats.framer_errors.saturating_add(1);
                }
                return Err(e.into());
            }
        };

        match event {
            RadioEvent::Data(data) => self.handle_message(ChannelId::Bluetooth, &data, io),
            RadioEvent::Disconnected => {
                self.transport.cancel(ChannelId::Bluetooth);
                self.queues[ChannelId::Bluetooth.index()].clear();
                self.transfer.abort_from(ChannelId::Bluetooth);
                Ok(Some(NodeEvent::Radio(RadioEvent::Disconnected)))
            }
            event => Ok(Some(NodeEvent::Radio(event))),
        }
    }

    /// Process one byte from the USB bridge
    ///
    /// The bridge carries application messages as event frames with the
    /// transparent-data opcode. Other opcodes are ignored.
    pub fn on_usb_byte<R, U, M, P, I, X>(
        &mut self,
        byte: u8,
        io: &mut NodeIo<'_, R, U, M, P, I, X>,
    ) -> Result<Option<NodeEvent>, NodeError>
    where
        R: UartTx,
        U: UartTx,
        M: ProgramMemory,
        P: Peripherals,
        I: InputSource,
        X: PacketBuilder,
    {
        let frame = match self.usb.feed(byte) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.framer_errors = self.stats.framer_errors.saturating_add(1);
                return Err(e.into());
            }
        };
        if frame.opcode != Opcode::TRANSPARENT_DATA {
            return Ok(None);
        }
        self.usb_active = true;
        self.handle_message(ChannelId::Usb, &frame.payload, io)
    }

    fn handle_message<R, U, M, P, I, X>(
        &mut self,
        channel: ChannelId,
        bytes: &[u8],
        io: &mut NodeIo<'_, R, U, M, P, I, X>,
    ) -> Result<Option<NodeEvent>, NodeError>
    where
        R: UartTx,
        U: UartTx,
        M: ProgramMemory,
        P: Peripherals,
    {
        let message = Message::decode(bytes)?;
        let kind = message.kind;
        let body = &message.body[..];

        if kind == Kind::Echo {
            if let Some(&sum) = body.first() {
                self.transport.acknowledge(channel, sum);
            }
            return Ok(Some(NodeEvent::Received { channel, kind }));
        }

        // echoes go straight to the link and are never retransmitted
        let mut echo = [0u8; 3];
        let len = encode_into(Kind::Echo, &[additive(bytes)], &mut echo)?;
        channel_link(
            &self.radio,
            self.usb_active,
            &mut *io.radio,
            &mut *io.usb,
            channel,
        )
        .transmit(&echo[..len]);

        match kind {
            Kind::Request => {
                let (&requested, rest) = body.split_first().ok_or(MessageError::TooShort)?;
                let param = rest.first().copied().filter(|&p| p != PARAM_NONE);
                self.queues[channel.index()].enqueue(Kind::from_byte(requested), param);
            }
            Kind::UploadBegin => {
                let [hi, lo, ..] = *body else {
                    return Err(MessageError::TooShort.into());
                };
                let total = u16::from_be_bytes([hi, lo]);
                self.transfer.begin(&mut *io.memory, total, channel)?;
                self.interpreter.stop();
            }
            Kind::Chunk => return self.store_chunk(channel, body, &mut *io.memory),
            Kind::Enter => {
                let &state = body.first().ok_or(MessageError::TooShort)?;
                self.interpreter.enter(state);
            }
            Kind::Action => {
                let (&device, value) = body.split_first().ok_or(MessageError::TooShort)?;
                match Device::from_byte(device) {
                    Device::Goto | Device::Enter => {
                        let &state = value.first().ok_or(MessageError::TooShort)?;
                        self.interpreter.enter(state);
                    }
                    device => {
                        let connected = self.connected();
                        let mut router = ActionRouter {
                            radio: &mut self.radio,
                            uart: &mut *io.radio,
                            peripherals: &mut *io.peripherals,
                            queues: &mut self.queues,
                            connected,
                            error: None,
                        };
                        router.execute(device, value);
                        if let Some(e) = router.error {
                            return Err(e);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(Some(NodeEvent::Received { channel, kind }))
    }

    /// Store an upload chunk `[addr_hi, addr_lo, n, data[n]]`
    fn store_chunk<M: ProgramMemory + ?Sized>(
        &mut self,
        channel: ChannelId,
        body: &[u8],
        memory: &mut M,
    ) -> Result<Option<NodeEvent>, NodeError> {
        let [hi, lo, n, ref rest @ ..] = *body else {
            return Err(MessageError::TooShort.into());
        };
        let data = rest
            .get(..usize::from(n))
            .ok_or(TransferError::InvalidLength)?;

        let was_active = self.transfer.is_active();
        let result = self
            .transfer
            .write_chunk(memory, u16::from_be_bytes([hi, lo]), data);

        if was_active && !self.transfer.is_active() {
            let queue = &mut self.queues[channel.index()];
            queue.enqueue(Kind::ProgramState, None);
            queue.enqueue(Kind::Consistency, None);
        }

        match result? {
            ChunkOutcome::Stored => Ok(Some(NodeEvent::Received {
                channel,
                kind: Kind::Chunk,
            })),
            ChunkOutcome::Complete => {
                self.eval_elapsed = 0;
                self.interpreter.start(&*memory)?;
                Ok(Some(NodeEvent::ProgramLoaded {
                    length: program_length(&*memory),
                }))
            }
        }
    }

    /// Run one periodic step
    pub fn tick<R, U, M, P, I, X>(&mut self, io: &mut NodeIo<'_, R, U, M, P, I, X>) -> TickReport
    where
        R: UartTx,
        U: UartTx,
        M: ProgramMemory,
        P: Peripherals,
        I: InputSource,
        X: PacketBuilder,
    {
        let radio = self.radio.tick(&mut *io.radio);

        let mut deliveries = [None; CHANNEL_COUNT];
        let mut dispatched = [Dispatched::Idle; CHANNEL_COUNT];
        let debug = self.debug_counters();
        for channel in ChannelId::ALL {
            let i = channel.index();
            let mut link = channel_link(
                &self.radio,
                self.usb_active,
                &mut *io.radio,
                &mut *io.usb,
                channel,
            );
            deliveries[i] = self.transport.retry_trigger(channel, &mut link);
            if deliveries[i] == Some(Delivery::GaveUp) {
                self.stats.give_ups = self.stats.give_ups.saturating_add(1);
            }
            if !link.is_connected() {
                continue;
            }

            let mut builder = (
                NodeKinds {
                    memory: &*io.memory,
                    peripherals: &*io.peripherals,
                    radio: &self.radio,
                    interpreter: &self.interpreter,
                    debug,
                },
                &mut *io.extensions,
            );
            dispatched[i] = dispatch(
                channel,
                &mut self.queues[i],
                &mut self.transport,
                &mut link,
                &mut builder,
            );
        }

        let (check, action_error) = self.evaluate(io);
        TickReport {
            radio,
            deliveries,
            dispatched,
            check,
            action_error,
        }
    }

    /// Interpreter check, every `eval_interval` ticks while running
    fn evaluate<R, U, M, P, I, X>(
        &mut self,
        io: &mut NodeIo<'_, R, U, M, P, I, X>,
    ) -> (
        Option<Result<CheckOutcome, InterpreterError>>,
        Option<NodeError>,
    )
    where
        R: UartTx,
        M: ProgramMemory,
        P: Peripherals,
        I: InputSource,
    {
        if self.interpreter.state() != InterpreterState::Running {
            self.eval_elapsed = 0;
            return (None, None);
        }
        self.eval_elapsed = self.eval_elapsed.saturating_add(1);
        if self.eval_elapsed < self.eval_interval {
            return (None, None);
        }
        self.eval_elapsed = 0;

        let mut inputs = [0u8; PORT_SIZE];
        io.inputs.sample(&mut inputs[..PORT_SIZE - 1]);
        inputs[PORT_SIZE - 1] = self.input_flags();

        let connected = self.connected();
        let mut router = ActionRouter {
            radio: &mut self.radio,
            uart: &mut *io.radio,
            peripherals: &mut *io.peripherals,
            queues: &mut self.queues,
            connected,
            error: None,
        };
        let result = self.interpreter.check(&mut *io.memory, &inputs, &mut router);
        let error = router.error;
        if matches!(result, Err(InterpreterError::LoopDetected { .. })) {
            self.stats.loops = self.stats.loops.saturating_add(1);
        }
        (Some(result), error)
    }
}

fn saturate(n: u16) -> u8 {
    u8::try_from(n).unwrap_or(u8::MAX)
}

/// USB bridge link: messages wrapped in transparent-data event frames
struct UsbLink<'a, U> {
    active: bool,
    uart: &'a mut U,
}

impl<U: UartTx> Link for UsbLink<'_, U> {
    fn is_connected(&self) -> bool {
        self.active
    }

    fn transmit(&mut self, payload: &[u8]) -> bool {
        let encoded =
            Frame::new(Opcode::TRANSPARENT_DATA, payload).and_then(|f| f.encode_to_vec());
        let Ok(bytes) = encoded else {
            return false;
        };
        self.uart.write_blocking(&bytes).is_ok() && self.uart.flush().is_ok()
    }
}

enum ChannelLink<'a, R, U> {
    Usb(UsbLink<'a, U>),
    Bluetooth(DataLink<'a, R>),
}

impl<R: UartTx, U: UartTx> Link for ChannelLink<'_, R, U> {
    fn is_connected(&self) -> bool {
        match self {
            ChannelLink::Usb(link) => link.is_connected(),
            ChannelLink::Bluetooth(link) => link.is_connected(),
        }
    }

    fn transmit(&mut self, payload: &[u8]) -> bool {
        match self {
            ChannelLink::Usb(link) => link.transmit(payload),
            ChannelLink::Bluetooth(link) => link.transmit(payload),
        }
    }
}

fn channel_link<'a, R: UartTx, U: UartTx>(
    radio: &Radio,
    usb_active: bool,
    radio_uart: &'a mut R,
    usb_uart: &'a mut U,
    channel: ChannelId,
) -> ChannelLink<'a, R, U> {
    match channel {
        ChannelId::Usb => ChannelLink::Usb(UsbLink {
            active: usb_active,
            uart: usb_uart,
        }),
        ChannelId::Bluetooth => ChannelLink::Bluetooth(radio.data_link(radio_uart)),
    }
}

/// Sends interpreter and peer actions to the board and the radio
struct ActionRouter<'a, R, P> {
    radio: &'a mut Radio,
    uart: &'a mut R,
    peripherals: &'a mut P,
    queues: &'a mut [MessageQueue; CHANNEL_COUNT],
    connected: [bool; CHANNEL_COUNT],
    error: Option<NodeError>,
}

impl<R, P> ActionRouter<'_, R, P> {
    /// Queue `kind` on every connected channel
    fn notify(&mut self, kind: Kind, param: Option<u8>) {
        for channel in ChannelId::ALL {
            if self.connected[channel.index()] {
                self.queues[channel.index()].enqueue(kind, param);
            }
        }
    }

    fn fail(&mut self, error: NodeError) {
        self.error.get_or_insert(error);
    }
}

impl<R: UartTx, P: Peripherals> ActionSink for ActionRouter<'_, R, P> {
    fn execute(&mut self, device: Device, value: &[u8]) {
        match device {
            Device::ConnectionEstablished => {
                self.notify(Kind::Identity, None);
                self.notify(Kind::ProgramState, None);
            }
            Device::ConnectionTrigger => {
                if !self.radio.is_ready() {
                    return;
                }
                let visible = value.first().is_some_and(|&v| v != 0);
                let mut sent = self.radio.set_visible(&mut *self.uart, visible);
                if !visible {
                    sent = sent.and_then(|()| self.radio.disconnect(&mut *self.uart));
                }
                if let Err(e) = sent {
                    self.fail(e.into());
                }
            }
            device if device.is_peripheral() => match self.peripherals.execute(device, value) {
                Ok(()) => {
                    if let Some((kind, param)) = state_report(device, value) {
                        self.notify(kind, param);
                    }
                }
                Err(e) => self.fail(NodeError::Peripheral(e)),
            },
            _ => {}
        }
    }
}

/// Message reporting a peripheral's new state after an action
fn state_report(device: Device, value: &[u8]) -> Option<(Kind, Option<u8>)> {
    match device {
        Device::Output(_) => Some((Kind::Outputs, None)),
        Device::Led(index) => Some((Kind::Led, Some(index))),
        Device::DisplayMessage => Some((Kind::DisplayLine, value.first().copied())),
        Device::DisplayClear | Device::DisplayReset => Some((Kind::DisplayLine, None)),
        _ => None,
    }
}

/// Builder for every kind the core serves
struct NodeKinds<'a, M, P> {
    memory: &'a M,
    peripherals: &'a P,
    radio: &'a Radio,
    interpreter: &'a Interpreter,
    debug: [u8; 4],
}

impl<M: ProgramMemory, P: Peripherals> NodeKinds<'_, M, P> {
    /// Write the body of `kind` item `item`, returning its length and
    /// whether it is the last item of its list
    fn body(&self, kind: Kind, item: u8, body: &mut [u8; MAX_BODY_SIZE]) -> Option<(usize, bool)> {
        let next = usize::from(item) + 1;
        match kind {
            Kind::Identity => {
                let status = self.radio.status().to_byte();
                let [major, minor, patch] = FIRMWARE_VERSION;
                body[..4].copy_from_slice(&[major, minor, patch, status]);
                let name = self.radio.bringup().config().name.as_bytes();
                let n = name.len().min(MAX_NAME_LEN);
                body[4..4 + n].copy_from_slice(&name[..n]);
                Some((4 + n, true))
            }
            Kind::Consistency => {
                let check = transfer::consistency(self.memory).ok()?;
                body[..3].copy_from_slice(&check);
                Some((3, true))
            }
            Kind::Chunk => {
                let len = transfer::read_chunk(self.memory, item, body).ok()??;
                Some((len, next >= usize::from(transfer::chunk_count(self.memory))))
            }
            Kind::ProgramState => {
                body[0] = self.memory.read_u8(STATUS_ADDR).unwrap_or(STATUS_DISABLED);
                body[1] = self.interpreter.current_state().unwrap_or(NO_STATE);
                Some((2, true))
            }
            Kind::Outputs => {
                body[..4].copy_from_slice(&self.peripherals.outputs().to_be_bytes());
                Some((4, true))
            }
            Kind::Led => {
                let count = self.peripherals.led_count();
                if item >= count {
                    return None;
                }
                let rgb = self.peripherals.led(item)?;
                body[0] = item;
                body[1..4].copy_from_slice(&rgb);
                Some((4, next >= usize::from(count)))
            }
            Kind::DisplayLine => {
                let lines = self.peripherals.display_lines();
                if item >= lines {
                    return None;
                }
                let text = self.peripherals.display_line(item)?.as_bytes();
                let n = text.len().min(MAX_BODY_SIZE - 1);
                body[0] = item;
                body[1..=n].copy_from_slice(&text[..n]);
                Some((1 + n, next >= usize::from(lines)))
            }
            Kind::Sensor => {
                let reading = self.peripherals.sensor()?;
                body[0] = reading.humidity;
                body[1] = reading.temperature as u8;
                Some((2, true))
            }
            Kind::PairedDevice => {
                let paired = &self.radio.info().paired;
                let device = paired.get(usize::from(item))?;
                body[0] = device.index;
                body[1..7].copy_from_slice(&device.address);
                Some((7, next >= paired.len()))
            }
            Kind::Debug => {
                body[..4].copy_from_slice(&self.debug);
                Some((4, true))
            }
            _ => None,
        }
    }
}

impl<M: ProgramMemory, P: Peripherals> PacketBuilder for NodeKinds<'_, M, P> {
    fn build(&mut self, kind: Kind, param: Option<u8>, index: u8, out: &mut [u8]) -> Built {
        let served = matches!(
            kind,
            Kind::Identity
                | Kind::Consistency
                | Kind::Chunk
                | Kind::ProgramState
                | Kind::Outputs
                | Kind::Led
                | Kind::DisplayLine
                | Kind::Sensor
                | Kind::PairedDevice
                | Kind::Debug
        );
        if !served {
            return Built::NotHandled;
        }

        let mut body = [0u8; MAX_BODY_SIZE];
        let Some((len, last)) = self.body(kind, param.unwrap_or(index), &mut body) else {
            return Built::Exhausted;
        };
        match encode_into(kind, &body[..len], out) {
            Ok(len) => Built::Packet { len, last },
            Err(_) => Built::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::interpreter::{ProgramBuilder, ALWAYS, STATUS_ENABLED};
    use crate::radio::correlator::testing::RecordingUart;
    use homenode_hal::RamProgramMemory;
    use homenode_protocol::radio::STATUS_SUCCESS;
    use homenode_protocol::{ModuleStatus, Response};

    #[derive(Default)]
    struct Board {
        outputs: u32,
        leds: [[u8; 3]; 2],
        executed: std::vec::Vec<(Device, std::vec::Vec<u8>)>,
    }

    impl Peripherals for Board {
        fn execute(&mut self, device: Device, value: &[u8]) -> Result<(), PeripheralError> {
            self.executed.push((device, value.to_vec()));
            match device {
                Device::Output(pin) => {
                    let bit = 1u32 << pin;
                    if value.first().is_some_and(|&v| v != 0) {
                        self.outputs |= bit;
                    } else {
                        self.outputs &= !bit;
                    }
                    Ok(())
                }
                Device::Led(index) => {
                    let led = self
                        .leds
                        .get_mut(usize::from(index))
                        .ok_or(PeripheralError::NoSuchDevice)?;
                    let rgb = value.get(..3).ok_or(PeripheralError::InvalidValue)?;
                    led.copy_from_slice(rgb);
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn outputs(&self) -> u32 {
            self.outputs
        }

        fn led_count(&self) -> u8 {
            2
        }

        fn led(&self, index: u8) -> Option<[u8; 3]> {
            self.leds.get(usize::from(index)).copied()
        }
    }

    #[derive(Default)]
    struct Inputs([u8; 3]);

    impl InputSource for Inputs {
        fn sample(&mut self, inputs: &mut [u8]) {
            let n = inputs.len().min(3);
            inputs[..n].copy_from_slice(&self.0[..n]);
        }
    }

    struct Harness {
        node: Node,
        radio: RecordingUart,
        usb: RecordingUart,
        memory: RamProgramMemory<1024>,
        board: Board,
        inputs: Inputs,
    }

    impl Harness {
        fn new() -> Self {
            let mut config = NodeConfig::default();
            config.timing = TimingConfig {
                reset_settle_ticks: 0,
                ..config.timing
            };
            Self {
                node: Node::new(&config),
                radio: RecordingUart::default(),
                usb: RecordingUart::default(),
                memory: RamProgramMemory::new(),
                board: Board::default(),
                inputs: Inputs::default(),
            }
        }

        fn tick(&mut self) -> TickReport {
            let mut extensions = ();
            let mut io = NodeIo {
                radio: &mut self.radio,
                usb: &mut self.usb,
                memory: &mut self.memory,
                peripherals: &mut self.board,
                inputs: &mut self.inputs,
                extensions: &mut extensions,
            };
            self.node.tick(&mut io)
        }

        /// Feed USB bytes, returning the result of the last byte
        fn usb_bytes(&mut self, bytes: &[u8]) -> Result<Option<NodeEvent>, NodeError> {
            let mut extensions = ();
            let mut io = NodeIo {
                radio: &mut self.radio,
                usb: &mut self.usb,
                memory: &mut self.memory,
                peripherals: &mut self.board,
                inputs: &mut self.inputs,
                extensions: &mut extensions,
            };
            let mut last = Ok(None);
            for &byte in bytes {
                last = self.node.on_usb_byte(byte, &mut io);
            }
            last
        }

        fn radio_response(&mut self, response: Response) -> Result<Option<NodeEvent>, NodeError> {
            let bytes = response.to_frame().unwrap().encode_to_vec().unwrap();
            let mut extensions = ();
            let mut io = NodeIo {
                radio: &mut self.radio,
                usb: &mut self.usb,
                memory: &mut self.memory,
                peripherals: &mut self.board,
                inputs: &mut self.inputs,
                extensions: &mut extensions,
            };
            let mut last = Ok(None);
            for byte in bytes {
                last = self.node.on_radio_byte(byte, &mut io);
            }
            last
        }

        fn send_usb(&mut self, kind: Kind, body: &[u8]) -> Result<Option<NodeEvent>, NodeError> {
            let bytes = usb_frame(&message(kind, body));
            self.usb_bytes(&bytes)
        }

        /// Messages written to the USB bridge since the last call
        fn usb_messages(&mut self) -> std::vec::Vec<std::vec::Vec<u8>> {
            let mut parser = FrameParser::new();
            let mut messages = std::vec::Vec::new();
            for &byte in &self.usb.bytes {
                if let Ok(Some(frame)) = parser.feed(byte) {
                    assert_eq!(frame.opcode, Opcode::TRANSPARENT_DATA);
                    messages.push(frame.payload.to_vec());
                }
            }
            self.usb.bytes.clear();
            messages
        }

        /// Echo `sent` back as the peer would
        fn ack_usb(&mut self, sent: &[u8]) {
            self.send_usb(Kind::Echo, &[additive(sent)]).unwrap();
        }

        /// Answer every radio command successfully until bring-up completes
        fn bring_up(&mut self) {
            let _ = self.node.start(&self.memory);
            for _ in 0..60 {
                self.tick();
                let opcodes = self.radio.opcodes();
                self.radio.bytes.clear();
                if let Some(&command) = opcodes.last() {
                    self.radio_response(Response::CommandComplete {
                        command,
                        status: STATUS_SUCCESS,
                        data: heapless::Vec::new(),
                    })
                    .unwrap();
                }
                if self.node.radio().is_ready() {
                    break;
                }
            }
            assert!(self.node.radio().is_ready());
            self.radio.bytes.clear();
        }
    }

    fn message(kind: Kind, body: &[u8]) -> std::vec::Vec<u8> {
        let mut buf = [0u8; 32];
        let len = encode_into(kind, body, &mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn usb_frame(message: &[u8]) -> std::vec::Vec<u8> {
        Frame::new(Opcode::TRANSPARENT_DATA, message)
            .unwrap()
            .encode_to_vec()
            .unwrap()
            .to_vec()
    }

    fn led_program() -> std::vec::Vec<u8> {
        let mut b = ProgramBuilder::new();
        let lamp = b.action(0x80 | 0x20, &[1, 2, 3]).unwrap();
        let pin = b.action(0x04, &[1]).unwrap();
        b.state().unwrap();
        b.evaluation(ALWAYS, &[lamp]).unwrap();
        b.evaluation([(0x01, 0x01), (0, 0), (0, 0), (0, 0)], &[pin]).unwrap();
        let mut image = [0u8; 256];
        let len = b.build(&mut image).unwrap();
        image[..len].to_vec()
    }

    fn upload(h: &mut Harness, program: &[u8]) -> Result<Option<NodeEvent>, NodeError> {
        let total = program.len() as u16;
        h.send_usb(Kind::UploadBegin, &total.to_be_bytes()).unwrap();
        let mut last = Ok(None);
        for (i, chunk) in program.chunks(16).enumerate() {
            let addr = (i * 16) as u16;
            let mut body = std::vec::Vec::new();
            body.extend_from_slice(&addr.to_be_bytes());
            body.push(chunk.len() as u8);
            body.extend_from_slice(chunk);
            last = h.send_usb(Kind::Chunk, &body);
        }
        last
    }

    #[test]
    fn test_request_is_echoed_then_served() {
        let mut h = Harness::new();
        let request = message(Kind::Request, &[Kind::Identity.to_byte(), PARAM_NONE]);
        let event = h.usb_bytes(&usb_frame(&request)).unwrap();
        assert_eq!(
            event,
            Some(NodeEvent::Received {
                channel: ChannelId::Usb,
                kind: Kind::Request
            })
        );
        assert!(h.node.is_usb_active());
        assert_eq!(h.usb_messages(), vec![message(Kind::Echo, &[additive(&request)])]);

        let report = h.tick();
        assert_eq!(report.dispatched[0], Dispatched::Sent(Kind::Identity));
        let sent = h.usb_messages();
        assert_eq!(sent.len(), 1);
        let identity = Message::decode(&sent[0]).unwrap();
        assert_eq!(identity.kind, Kind::Identity);
        assert_eq!(&identity.body[..3], &FIRMWARE_VERSION);
        assert_eq!(identity.body[3], ModuleStatus::Idle.to_byte());
        assert_eq!(&identity.body[4..], b"homenode");
    }

    #[test]
    fn test_echo_confirms_outstanding_message() {
        let mut h = Harness::new();
        h.send_usb(Kind::Request, &[Kind::Outputs.to_byte(), PARAM_NONE])
            .unwrap();
        h.usb_messages();
        h.tick();
        let sent = h.usb_messages();
        assert!(!h.node.transport().is_free(ChannelId::Usb));

        h.ack_usb(&sent[0]);
        // an echo is never echoed
        assert!(h.usb_messages().is_empty());
        let report = h.tick();
        assert_eq!(report.deliveries[0], Some(Delivery::Confirmed));
        assert!(h.node.transport().is_free(ChannelId::Usb));
    }

    #[test]
    fn test_unechoed_message_given_up_and_counted() {
        let mut h = Harness::new();
        h.send_usb(Kind::Request, &[Kind::Outputs.to_byte(), PARAM_NONE])
            .unwrap();
        let mut gave_up = false;
        for _ in 0..100 {
            if h.tick().deliveries[0] == Some(Delivery::GaveUp) {
                gave_up = true;
                break;
            }
        }
        assert!(gave_up);
        assert_eq!(h.node.stats().give_ups, 1);
        assert_eq!(h.node.debug_counters(), [0, 1, 0, 0]);
    }

    #[test]
    fn test_corrupt_message_is_not_echoed() {
        let mut h = Harness::new();
        let mut request = message(Kind::Request, &[Kind::Identity.to_byte(), PARAM_NONE]);
        request[1] ^= 0x01;
        assert_eq!(
            h.usb_bytes(&usb_frame(&request)),
            Err(NodeError::Message(MessageError::InvalidChecksum))
        );
        assert!(h.usb_messages().is_empty());
        assert!(h.node.queue(ChannelId::Usb).is_empty());
    }

    #[test]
    fn test_bad_usb_frame_counted() {
        let mut h = Harness::new();
        let mut frame = usb_frame(&message(Kind::Enter, &[1]));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(
            h.usb_bytes(&frame),
            Err(NodeError::Frame(FrameError::InvalidChecksum))
        );
        assert_eq!(h.node.debug_counters()[0], 1);
    }

    #[test]
    fn test_upload_enables_and_runs_program() {
        let mut h = Harness::new();
        let program = led_program();
        let event = upload(&mut h, &program).unwrap();
        assert_eq!(
            event,
            Some(NodeEvent::ProgramLoaded {
                length: program.len() as u16
            })
        );
        assert_eq!(h.memory.read_u8(0), Ok(STATUS_ENABLED));
        assert_eq!(h.node.interpreter().state(), InterpreterState::Running);
        // every message, including the final chunk, was echoed
        assert_eq!(h.usb_messages().len(), 1 + program.len().div_ceil(16));

        let mut checked = None;
        for _ in 0..TimingConfig::default().eval_interval_ticks {
            if let Some(check) = h.tick().check {
                checked = Some(check);
            }
        }
        assert_eq!(checked, Some(Ok(CheckOutcome::Stable { state: 0 })));
        assert_eq!(h.board.executed, vec![(Device::Led(0), vec![1, 2, 3])]);
        assert_eq!(h.board.leds[0], [1, 2, 3]);
    }

    #[test]
    fn test_duplicate_chunk_is_harmless() {
        let mut h = Harness::new();
        let program = led_program();
        let total = program.len() as u16;
        h.send_usb(Kind::UploadBegin, &total.to_be_bytes()).unwrap();

        let mut first = vec![0, 0, 16];
        first.extend_from_slice(&program[..16]);
        h.send_usb(Kind::Chunk, &first).unwrap();
        h.send_usb(Kind::Chunk, &first).unwrap();
        assert!(h.node.is_uploading());

        let mut rest = vec![0, 16, (program.len() - 16) as u8];
        rest.extend_from_slice(&program[16..]);
        let event = h.send_usb(Kind::Chunk, &rest).unwrap();
        assert!(matches!(event, Some(NodeEvent::ProgramLoaded { .. })));
        assert_eq!(&h.memory.as_bytes()[..program.len()], &program[..]);
    }

    #[test]
    fn test_upload_reports_state_and_consistency() {
        let mut h = Harness::new();
        let program = led_program();
        upload(&mut h, &program).unwrap();
        h.usb_messages();

        h.tick();
        let sent = h.usb_messages();
        let state = Message::decode(&sent[0]).unwrap();
        assert_eq!(state.kind, Kind::ProgramState);
        assert_eq!(&state.body[..], &[STATUS_ENABLED, NO_STATE]);

        h.ack_usb(&sent[0]);
        h.usb_messages();
        h.tick();
        let sent = h.usb_messages();
        let check = Message::decode(&sent[0]).unwrap();
        assert_eq!(check.kind, Kind::Consistency);
        assert_eq!(&check.body[..], &transfer::consistency(&h.memory).unwrap());
        assert_eq!(u16::from_be_bytes([check.body[0], check.body[1]]), program.len() as u16);
    }

    #[test]
    fn test_invalid_upload_stays_disabled() {
        let mut h = Harness::new();
        let mut program = led_program();
        // action table offset past the end
        program[4] = 0xFF;
        let result = upload(&mut h, &program);
        assert_eq!(result, Err(NodeError::Transfer(TransferError::InvalidProgram)));
        assert_eq!(h.memory.read_u8(0), Ok(STATUS_DISABLED));
        assert_eq!(h.node.interpreter().state(), InterpreterState::Idle);
        assert_eq!(h.node.queue(ChannelId::Usb).len(), 2);
    }

    #[test]
    fn test_action_message_drives_output() {
        let mut h = Harness::new();
        h.send_usb(Kind::Action, &[0x03, 1]).unwrap();
        assert_eq!(h.board.outputs, 1 << 3);
        h.usb_messages();

        h.tick();
        let sent = h.usb_messages();
        let outputs = Message::decode(&sent[0]).unwrap();
        assert_eq!(outputs.kind, Kind::Outputs);
        assert_eq!(&outputs.body[..], &8u32.to_be_bytes());
    }

    #[test]
    fn test_action_failure_reported() {
        let mut h = Harness::new();
        assert_eq!(
            h.send_usb(Kind::Action, &[0x25, 1, 2, 3]),
            Err(NodeError::Peripheral(PeripheralError::NoSuchDevice))
        );
    }

    #[test]
    fn test_led_list_sent_item_by_item() {
        let mut h = Harness::new();
        h.board.leds = [[1, 2, 3], [4, 5, 6]];
        h.send_usb(Kind::Request, &[Kind::Led.to_byte(), PARAM_NONE])
            .unwrap();
        h.usb_messages();

        let mut bodies = std::vec::Vec::new();
        for _ in 0..3 {
            h.tick();
            for sent in h.usb_messages() {
                bodies.push(Message::decode(&sent).unwrap().body.to_vec());
                h.ack_usb(&sent);
            }
        }
        assert_eq!(bodies, vec![vec![0, 1, 2, 3], vec![1, 4, 5, 6]]);
        assert!(h.node.queue(ChannelId::Usb).is_empty());
    }

    #[test]
    fn test_input_flags() {
        let mut h = Harness::new();
        assert_eq!(h.node.input_flags(), 0);
        h.send_usb(Kind::Enter, &[0]).unwrap();
        assert_eq!(h.node.input_flags(), FLAG_USB);
        h.node.set_usb_active(false);
        assert_eq!(h.node.input_flags(), 0);
    }

    #[test]
    fn test_bluetooth_session() {
        let mut h = Harness::new();
        h.bring_up();
        assert_eq!(h.node.input_flags(), FLAG_RADIO_READY);

        let event = h.radio_response(Response::ConnectionComplete {
            status: STATUS_SUCCESS,
            handle: 0x20,
            address: [1, 2, 3, 4, 5, 6],
        });
        assert_eq!(
            event,
            Ok(Some(NodeEvent::Radio(RadioEvent::Connected { handle: 0x20 })))
        );
        assert_eq!(h.node.input_flags(), FLAG_RADIO_READY | FLAG_BLUETOOTH);

        for kind in [Kind::Identity, Kind::Debug] {
            let request = message(Kind::Request, &[kind.to_byte(), PARAM_NONE]);
            let event = h.radio_response(Response::TransparentData {
                handle: 0x20,
                data: heapless::Vec::from_slice(&request).unwrap(),
            });
            assert_eq!(
                event,
                Ok(Some(NodeEvent::Received {
                    channel: ChannelId::Bluetooth,
                    kind: Kind::Request
                }))
            );
        }
        // two echoes as transparent data
        assert_eq!(
            h.radio.opcodes(),
            vec![Opcode::SEND_TRANSPARENT_DATA, Opcode::SEND_TRANSPARENT_DATA]
        );
        h.radio.bytes.clear();

        let report = h.tick();
        assert_eq!(report.dispatched[1], Dispatched::Sent(Kind::Identity));
        assert_eq!(h.node.queue(ChannelId::Bluetooth).len(), 1);

        let event = h.radio_response(Response::DisconnectionComplete {
            handle: 0x20,
            reason: 0x13,
        });
        assert_eq!(event, Ok(Some(NodeEvent::Radio(RadioEvent::Disconnected))));
        assert!(h.node.queue(ChannelId::Bluetooth).is_empty());
        assert!(h.node.transport().is_free(ChannelId::Bluetooth));
    }

    #[test]
    fn test_connection_trigger_hides_and_disconnects() {
        let mut h = Harness::new();
        h.bring_up();
        h.radio_response(Response::ConnectionComplete {
            status: STATUS_SUCCESS,
            handle: 0x20,
            address: [0; 6],
        })
        .unwrap();

        h.send_usb(Kind::Action, &[0x51, 0]).unwrap();
        assert_eq!(h.radio.opcodes(), vec![Opcode::SET_ADV_ENABLE]);

        h.radio_response(Response::CommandComplete {
            command: Opcode::SET_ADV_ENABLE,
            status: STATUS_SUCCESS,
            data: heapless::Vec::new(),
        })
        .unwrap();
        assert_eq!(
            h.radio.opcodes(),
            vec![Opcode::SET_ADV_ENABLE, Opcode::DISCONNECT]
        );
    }

    #[test]
    fn test_rejected_upload_keeps_program_running() {
        let mut h = Harness::new();
        let program = led_program();
        upload(&mut h, &program).unwrap();
        assert_eq!(h.node.interpreter().state(), InterpreterState::Running);

        assert_eq!(
            h.send_usb(Kind::UploadBegin, &2u16.to_be_bytes()),
            Err(NodeError::Transfer(TransferError::InvalidLength))
        );
        assert!(!h.node.is_uploading());
        assert_eq!(h.memory.read_u8(0), Ok(STATUS_ENABLED));
        assert_eq!(h.node.interpreter().state(), InterpreterState::Running);
    }

    #[test]
    fn test_usb_loss_aborts_usb_upload() {
        let mut h = Harness::new();
        let total = led_program().len() as u16;
        h.send_usb(Kind::UploadBegin, &total.to_be_bytes()).unwrap();
        assert!(h.node.is_uploading());

        h.node.set_usb_active(false);
        assert!(!h.node.is_uploading());
        assert_ne!(h.memory.read_u8(0), Ok(STATUS_ENABLED));
        assert_eq!(
            h.send_usb(Kind::Chunk, &[0, 0, 1, 0]),
            Err(NodeError::Transfer(TransferError::NotStarted))
        );
    }

    #[test]
    fn test_peer_disconnect_aborts_bluetooth_upload() {
        let mut h = Harness::new();
        h.bring_up();
        h.radio_response(Response::ConnectionComplete {
            status: STATUS_SUCCESS,
            handle: 0x20,
            address: [0; 6],
        })
        .unwrap();

        let total = led_program().len() as u16;
        let begin = message(Kind::UploadBegin, &total.to_be_bytes());
        h.radio_response(Response::TransparentData {
            handle: 0x20,
            data: heapless::Vec::from_slice(&begin).unwrap(),
        })
        .unwrap();
        assert!(h.node.is_uploading());

        // losing the other channel leaves it alone
        h.node.set_usb_active(false);
        assert!(h.node.is_uploading());

        h.radio_response(Response::DisconnectionComplete {
            handle: 0x20,
            reason: 0x13,
        })
        .unwrap();
        assert!(!h.node.is_uploading());
        assert_ne!(h.memory.read_u8(0), Ok(STATUS_ENABLED));
    }
}
