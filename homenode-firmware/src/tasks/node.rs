//! Node task
//!
//! Owns the control core and every peripheral it touches. Received bytes
//! and ticks are handled in arrival order from one loop, so the core never
//! needs locking.

use defmt::*;
use embassy_futures::select::{select, Either};
use embassy_rp::uart::BufferedUartTx;
use portable_atomic::Ordering;

use homenode_core::interpreter::{CheckOutcome, InterpreterError};
use homenode_core::node::{Node, NodeError, NodeEvent, NodeIo, TickReport};
use homenode_core::radio::RadioEvent;
use homenode_core::transport::{ChannelId, Delivery};
use homenode_hal::RamProgramMemory;
use homenode_hal_rp2040::uart::IoUart;

use crate::board::{Board, BoardInputs, PROGRAM_SIZE};
use crate::channels::{ProgramImage, RxSource, PROGRAM_SNAPSHOT, RX_CHANNEL};
use crate::tasks::tick::{TICK_COUNT, TICK_SIGNAL};

/// Most ticks replayed after the loop fell behind
const MAX_CATCH_UP: u32 = 10;

/// Everything the node task owns
pub struct NodeResources {
    pub node: Node,
    pub radio: IoUart<BufferedUartTx>,
    pub usb: IoUart<BufferedUartTx>,
    pub memory: RamProgramMemory<PROGRAM_SIZE>,
    pub board: Board,
    pub inputs: BoardInputs,
}

#[embassy_executor::task]
pub async fn node_task(resources: NodeResources) {
    info!("Node task started");

    let NodeResources {
        mut node,
        mut radio,
        mut usb,
        mut memory,
        mut board,
        mut inputs,
    } = resources;
    let mut extensions = ();
    let mut last_tick = TICK_COUNT.load(Ordering::Relaxed);

    loop {
        let mut io = NodeIo {
            radio: &mut radio,
            usb: &mut usb,
            memory: &mut memory,
            peripherals: &mut board,
            inputs: &mut inputs,
            extensions: &mut extensions,
        };

        match select(RX_CHANNEL.receive(), TICK_SIGNAL.wait()).await {
            Either::First(chunk) => {
                for &byte in &chunk.bytes {
                    let result = match chunk.source {
                        RxSource::Radio => node.on_radio_byte(byte, &mut io),
                        RxSource::Usb => node.on_usb_byte(byte, &mut io),
                    };
                    log_received(chunk.source, result);
                }
            }
            Either::Second(now) => {
                let pending = now.wrapping_sub(last_tick).clamp(1, MAX_CATCH_UP);
                last_tick = now;
                for _ in 0..pending {
                    let report = node.tick(&mut io);
                    log_tick(&report);
                }
            }
        }

        if !node.is_uploading() && memory.take_dirty() {
            let mut image = ProgramImage::new();
            // Capacity matches the memory size
            let _ = image.extend_from_slice(memory.as_bytes());
            PROGRAM_SNAPSHOT.signal(image);
        }
    }
}

fn log_received(source: RxSource, result: Result<Option<NodeEvent>, NodeError>) {
    match result {
        Ok(None) => {}
        Ok(Some(NodeEvent::Received { channel, kind })) => {
            debug!("{:?}: received {:?}", channel, kind);
        }
        Ok(Some(NodeEvent::ProgramLoaded { length })) => {
            info!("Program loaded ({} bytes)", length);
        }
        Ok(Some(NodeEvent::Radio(event))) => log_radio_event(&event),
        Err(e) => warn!("{:?} receive error: {:?}", source, e),
    }
}

fn log_radio_event(event: &RadioEvent) {
    match event {
        RadioEvent::Bringup(step) => info!("Bring-up: {:?}", step),
        RadioEvent::Status(status) => debug!("Module status: {:?}", status),
        RadioEvent::Connected { handle } => info!("Peer connected (handle {})", handle),
        RadioEvent::Disconnected => info!("Peer disconnected"),
        RadioEvent::Data(data) => trace!("Peer data: {} bytes", data.len()),
        RadioEvent::CommandFailed { command, status } => {
            warn!("Command {:#x} failed with status {:#x}", command, status);
        }
        RadioEvent::TestMode(frame) => debug!("Test-mode event: {:?}", frame),
    }
}

fn log_tick(report: &TickReport) {
    match &report.radio {
        Ok(Some(event)) => log_radio_event(event),
        Ok(None) => {}
        Err(e) => error!("Radio: {:?}", e),
    }

    for (channel, delivery) in ChannelId::ALL.iter().zip(report.deliveries.iter()) {
        match delivery {
            Some(Delivery::GaveUp) => warn!("{:?}: no echo, message given up", channel),
            Some(d) => trace!("{:?}: {:?}", channel, d),
            None => {}
        }
    }

    for (channel, dispatched) in ChannelId::ALL.iter().zip(report.dispatched.iter()) {
        trace!("{:?}: {:?}", channel, dispatched);
    }

    match &report.check {
        Some(Ok(CheckOutcome::Moved { state, hops })) => {
            debug!("Entered state {} after {} transitions", state, hops);
        }
        Some(Ok(_)) | None => {}
        Some(Err(InterpreterError::LoopDetected { state, persisted })) => {
            error!(
                "Goto loop at state {}, program disabled (persisted: {})",
                state, persisted
            );
        }
        Some(Err(e)) => error!("Interpreter: {:?}", e),
    }

    if let Some(e) = &report.action_error {
        warn!("Action failed: {:?}", e);
    }
}
