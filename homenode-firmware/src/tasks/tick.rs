//! Tick task
//!
//! Drives the control core's periodic step: bring-up timers, transport
//! retries, queue dispatch and interpreter evaluation all count ticks.

use defmt::*;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use portable_atomic::{AtomicU32, Ordering};

/// Ticks elapsed since boot
pub static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Signal to notify the node task of a tick, carrying the tick count
pub static TICK_SIGNAL: Signal<CriticalSectionRawMutex, u32> = Signal::new();

#[embassy_executor::task]
pub async fn tick_task(tick_ms: u16) {
    info!("Tick task started ({}ms)", tick_ms);

    let mut ticker = Ticker::every(Duration::from_millis(u64::from(tick_ms)));

    loop {
        ticker.next().await;

        let now = TICK_COUNT.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        TICK_SIGNAL.signal(now);
    }
}
