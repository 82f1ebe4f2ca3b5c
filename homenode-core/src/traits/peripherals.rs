//! Peripheral driver trait
//!
//! Register-level access to the I/O expanders, the LED strip, the text
//! display and the sensor lives outside the core. The core only asks the
//! board to apply an action and to report cached state back for the
//! outbound state messages.

use crate::interpreter::Device;

/// Bytes in an LED colour value
pub const RGB_LEN: usize = 3;

/// Errors reported by a peripheral driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralError {
    /// No such pin, LED or display line on this board
    NoSuchDevice,
    /// Value bytes do not fit the device
    InvalidValue,
    /// Driver reported a bus failure
    Bus,
}

/// One humidity/temperature sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorReading {
    /// Relative humidity in percent
    pub humidity: u8,
    /// Temperature in whole degrees Celsius
    pub temperature: i8,
}

/// Board peripherals driven by interpreter actions
pub trait Peripherals {
    /// Apply one action to a peripheral
    ///
    /// Only peripheral devices are passed here: expander pins, LEDs and
    /// the display. Connection and flow-control devices are handled by
    /// the core.
    fn execute(&mut self, device: Device, value: &[u8]) -> Result<(), PeripheralError>;

    /// Current expander output levels, one bit per pin
    fn outputs(&self) -> u32;

    /// Number of LEDs on the board
    fn led_count(&self) -> u8 {
        0
    }

    /// Cached colour of one LED
    fn led(&self, _index: u8) -> Option<[u8; RGB_LEN]> {
        None
    }

    /// Number of display lines
    fn display_lines(&self) -> u8 {
        0
    }

    /// Cached text of one display line
    fn display_line(&self, _line: u8) -> Option<&str> {
        None
    }

    /// Latest sensor sample, if the board has a sensor
    fn sensor(&self) -> Option<SensorReading> {
        None
    }
}
