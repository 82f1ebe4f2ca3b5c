//! Program persistence task
//!
//! Writes the program image to flash after it changes. Writes are
//! debounced so a burst of changes costs one flash write.

use defmt::*;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};

use homenode_hal_rp2040::flash::{Rp2040FlashStorage, StorageKey};
use homenode_hal_rp2040::FlashStorageTrait;

use crate::channels::PROGRAM_SNAPSHOT;

/// Quiet time before a changed image is written
const SETTLE_MS: u64 = 500;

#[embassy_executor::task]
pub async fn persist_task(mut storage: Rp2040FlashStorage<'static>) {
    info!("Persist task started");

    loop {
        let mut image = PROGRAM_SNAPSHOT.wait().await;

        // Keep taking newer snapshots until the image stops changing
        loop {
            match select(
                PROGRAM_SNAPSHOT.wait(),
                Timer::after(Duration::from_millis(SETTLE_MS)),
            )
            .await
            {
                Either::First(newer) => image = newer,
                Either::Second(()) => break,
            }
        }

        match storage.write(StorageKey::Program, &image).await {
            Ok(()) => info!("Program image saved ({} bytes)", image.len()),
            Err(e) => error!("Failed to save program image: {:?}", e),
        }
    }
}
