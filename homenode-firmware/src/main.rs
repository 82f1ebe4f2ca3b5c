//! Homenode - Bluetooth Home-Automation Node Firmware
//!
//! Main firmware binary for RP2040-based nodes. The radio module sits on
//! UART0 and a USB serial bridge on UART1; both carry the same
//! application messages into one control core.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::{UART0, UART1};
use embassy_rp::uart::{BufferedInterruptHandler, Config as UartConfig, Uart};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use homenode_core::config::NodeConfig;
use homenode_core::interpreter::ProgramError;
use homenode_core::node::Node;
use homenode_hal::{FlashError, RamProgramMemory};
use homenode_hal_rp2040::flash::Rp2040FlashStorage;
use homenode_hal_rp2040::uart::IoUart;

use crate::board::{Board, BoardInputs, PROGRAM_SIZE};
use crate::config::{parse_config, ConfigError, ConfigPersistence};
use crate::tasks::NodeResources;

/// Embedded default configuration (compiled into firmware)
/// Edit node.toml and rebuild to customize
const EMBEDDED_CONFIG: &str = include_str!("../node.toml");

/// Radio module and USB bridge both run at 115200 baud
const UART_BAUD: u32 = 115_200;

mod board;
mod channels;
mod config;
mod tasks;

bind_interrupts!(struct Irqs {
    UART0_IRQ => BufferedInterruptHandler<UART0>;
    UART1_IRQ => BufferedInterruptHandler<UART1>;
});

// Static cells for UART buffers (must live forever)
static RADIO_TX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static RADIO_RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static USB_TX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static USB_RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Homenode firmware starting...");

    let p = embassy_rp::init(Default::default());
    info!("Peripherals initialized");

    // Configuration and program image from flash
    let mut persistence = ConfigPersistence::new(Rp2040FlashStorage::new(p.FLASH, p.DMA_CH0));
    let config = load_config(&mut persistence).await;

    let mut memory = RamProgramMemory::<PROGRAM_SIZE>::new();
    match persistence.load_program(&mut memory).await {
        Ok(_) => {}
        Err(ConfigError::Flash(FlashError::NotFound)) => info!("No stored program"),
        Err(e) => warn!("Failed to load program image: {:?}", e),
    }
    let storage = persistence.into_storage();

    // UART0: radio module
    let radio_uart = Uart::new_blocking(p.UART0, p.PIN_0, p.PIN_1, uart_config());
    let radio_uart = radio_uart.into_buffered(
        Irqs,
        RADIO_TX_BUF.init([0u8; 256]),
        RADIO_RX_BUF.init([0u8; 256]),
    );
    let (radio_tx, radio_rx) = radio_uart.split();

    // UART1: USB serial bridge
    let usb_uart = Uart::new_blocking(p.UART1, p.PIN_4, p.PIN_5, uart_config());
    let usb_uart = usb_uart.into_buffered(
        Irqs,
        USB_TX_BUF.init([0u8; 256]),
        USB_RX_BUF.init([0u8; 256]),
    );
    let (usb_tx, usb_rx) = usb_uart.split();

    info!("UARTs initialized");

    // Board I/O
    let board = Board::new(
        [
            Output::new(p.PIN_6, Level::Low),
            Output::new(p.PIN_7, Level::Low),
            Output::new(p.PIN_8, Level::Low),
            Output::new(p.PIN_9, Level::Low),
            Output::new(p.PIN_10, Level::Low),
            Output::new(p.PIN_11, Level::Low),
            Output::new(p.PIN_12, Level::Low),
            Output::new(p.PIN_13, Level::Low),
        ],
        Output::new(p.PIN_14, Level::High),
    );
    let inputs = BoardInputs::new([
        Input::new(p.PIN_16, Pull::Down),
        Input::new(p.PIN_17, Pull::Down),
        Input::new(p.PIN_18, Pull::Down),
        Input::new(p.PIN_19, Pull::Down),
        Input::new(p.PIN_20, Pull::Down),
        Input::new(p.PIN_21, Pull::Down),
        Input::new(p.PIN_22, Pull::Down),
        Input::new(p.PIN_26, Pull::Down),
    ]);

    // Control core
    let mut node = Node::new(&config);
    match node.start(&memory) {
        Ok(()) => info!("Program running"),
        Err(ProgramError::NotEnabled) => info!("No enabled program"),
        Err(e) => warn!("Stored program rejected: {:?}", e),
    }

    let resources = NodeResources {
        node,
        radio: IoUart::new(radio_tx),
        usb: IoUart::new(usb_tx),
        memory,
        board,
        inputs,
    };

    // Spawn tasks
    spawner.spawn(tasks::tick_task(config.timing.tick_ms)).unwrap();
    spawner.spawn(tasks::radio_rx_task(radio_rx)).unwrap();
    spawner.spawn(tasks::usb_rx_task(usb_rx)).unwrap();
    spawner.spawn(tasks::persist_task(storage)).unwrap();
    spawner.spawn(tasks::node_task(resources)).unwrap();

    info!("All tasks spawned, firmware running");

    loop {
        embassy_time::Timer::after_secs(60).await;
        trace!("Main loop heartbeat");
    }
}

fn uart_config() -> UartConfig {
    let mut cfg = UartConfig::default();
    cfg.baudrate = UART_BAUD;
    cfg
}

/// Load configuration from flash, falling back to the embedded default
async fn load_config(persistence: &mut ConfigPersistence<'_>) -> NodeConfig {
    match persistence.load().await {
        Ok(config) => {
            info!("Loaded configuration from flash");
            config
        }
        Err(_) => {
            info!("No valid configuration in flash, using embedded defaults");
            create_default_config()
        }
    }
}

/// Parse the node.toml embedded at compile time
fn create_default_config() -> NodeConfig {
    match parse_config(EMBEDDED_CONFIG) {
        Ok(config) => {
            info!("Parsed embedded configuration successfully");
            config::log_config_summary(&config);
            config
        }
        Err(e) => {
            // build.rs validates node.toml, so this means the two checks disagree
            error!("Failed to parse embedded config: {:?}", e);
            error!("Using built-in defaults");
            NodeConfig::default()
        }
    }
}
