//! Flash storage driver for RP2040
//!
//! Uses sequential-storage for wear-leveled key-value storage in the last
//! 64KB of flash. Holds the node configuration and the interpreter
//! program image.

use embassy_rp::dma::Channel;
use embassy_rp::flash::{Async, Flash};
use embassy_rp::peripherals::FLASH;
use embassy_rp::Peri;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

pub use homenode_hal::flash::{FlashError, StorageKey};

/// Total flash on the board (W25Q16)
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Size of the storage partition at the end of flash
pub const STORAGE_PARTITION_SIZE: usize = 64 * 1024;

pub const STORAGE_PARTITION_START: usize = FLASH_SIZE - STORAGE_PARTITION_SIZE;

/// Flash range handed to sequential-storage
pub const STORAGE_RANGE: core::ops::Range<u32> =
    (STORAGE_PARTITION_START as u32)..(FLASH_SIZE as u32);

/// Largest stored item (TOML config text)
pub const MAX_ITEM_SIZE: usize = 2048;

/// Scratch buffer: key byte, item and sequential-storage item header
const DATA_BUFFER_SIZE: usize = MAX_ITEM_SIZE + 32;

/// RP2040 flash storage
pub struct Rp2040FlashStorage<'d> {
    flash: Flash<'d, FLASH, Async, FLASH_SIZE>,
    data_buffer: [u8; DATA_BUFFER_SIZE],
}

impl<'d> Rp2040FlashStorage<'d> {
    pub fn new(flash: Peri<'d, FLASH>, dma: Peri<'d, impl Channel>) -> Self {
        Self {
            flash: Flash::new(flash, dma),
            data_buffer: [0; DATA_BUFFER_SIZE],
        }
    }

    /// Erase the whole storage partition
    pub async fn erase_all(&mut self) -> Result<(), FlashError> {
        self.flash
            .erase(STORAGE_RANGE.start, STORAGE_RANGE.end)
            .await
            .map_err(|_| FlashError::Flash)
    }
}

impl homenode_hal::FlashStorage for Rp2040FlashStorage<'_> {
    async fn read(&mut self, key: StorageKey, buffer: &mut [u8]) -> Result<usize, FlashError> {
        let item = map::fetch_item::<StorageKey, &[u8], _>(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut self.data_buffer,
            &key,
        )
        .await
        .map_err(|_| FlashError::Storage)?;

        let data = item.ok_or(FlashError::NotFound)?;
        let out = buffer
            .get_mut(..data.len())
            .ok_or(FlashError::BufferTooSmall)?;
        out.copy_from_slice(data);
        Ok(data.len())
    }

    async fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), FlashError> {
        if data.len() > MAX_ITEM_SIZE {
            return Err(FlashError::BufferTooSmall);
        }
        map::store_item(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut self.data_buffer,
            &key,
            &data,
        )
        .await
        .map_err(|_| FlashError::Storage)
    }
}
