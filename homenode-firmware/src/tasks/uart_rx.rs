//! UART receive tasks
//!
//! Read raw bytes from the radio module and the USB bridge and forward
//! them to the node task. Framing happens in the control core.

use defmt::*;
use embassy_rp::uart::BufferedUartRx;
use embedded_io_async::Read;
use heapless::Vec;

use crate::channels::{RxChunk, RxSource, RX_CHANNEL, RX_CHUNK_SIZE};

#[embassy_executor::task]
pub async fn radio_rx_task(rx: BufferedUartRx) {
    info!("Radio RX task started");
    forward(rx, RxSource::Radio).await
}

#[embassy_executor::task]
pub async fn usb_rx_task(rx: BufferedUartRx) {
    info!("USB RX task started");
    forward(rx, RxSource::Usb).await
}

async fn forward(mut rx: BufferedUartRx, source: RxSource) -> ! {
    let mut buf = [0u8; RX_CHUNK_SIZE];

    loop {
        match rx.read(&mut buf).await {
            Ok(n) if n > 0 => {
                trace!("{:?} RX: {} bytes", source, n);
                let mut bytes = Vec::new();
                // n never exceeds the buffer, which matches the capacity
                let _ = bytes.extend_from_slice(&buf[..n]);
                RX_CHANNEL.send(RxChunk { source, bytes }).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("{:?} UART read error: {:?}", source, e);
            }
        }
    }
}
