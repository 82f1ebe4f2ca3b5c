//! Board peripheral shim
//!
//! Drives eight GPIO outputs in place of the I/O expander and a GPIO
//! display backlight. LED colours and display text are cached here for
//! the state reports; pixel and LCD drivers are not part of this board.

use embassy_rp::gpio::{Input, Output};
use heapless::String;

use homenode_core::interpreter::Device;
use homenode_core::traits::{InputSource, PeripheralError, Peripherals, RGB_LEN};

/// Program memory image size
pub const PROGRAM_SIZE: usize = 1024;

/// GPIO outputs standing in for expander pins
pub const OUTPUT_COUNT: usize = 8;

/// GPIO inputs sampled into the first input port
pub const INPUT_COUNT: usize = 8;

pub const LED_COUNT: usize = 8;

pub const DISPLAY_LINES: usize = 2;

/// Characters per display line
pub const DISPLAY_WIDTH: usize = 20;

pub struct Board {
    outputs: [Output<'static>; OUTPUT_COUNT],
    backlight: Output<'static>,
    leds: [[u8; RGB_LEN]; LED_COUNT],
    lines: [String<DISPLAY_WIDTH>; DISPLAY_LINES],
}

impl Board {
    pub fn new(outputs: [Output<'static>; OUTPUT_COUNT], backlight: Output<'static>) -> Self {
        Self {
            outputs,
            backlight,
            leds: [[0; RGB_LEN]; LED_COUNT],
            lines: Default::default(),
        }
    }

    fn show(&mut self, value: &[u8]) -> Result<(), PeripheralError> {
        let (&line, text) = value.split_first().ok_or(PeripheralError::InvalidValue)?;
        let slot = self
            .lines
            .get_mut(usize::from(line))
            .ok_or(PeripheralError::NoSuchDevice)?;
        let text = &text[..text.len().min(DISPLAY_WIDTH)];
        let text = core::str::from_utf8(text).map_err(|_| PeripheralError::InvalidValue)?;
        slot.clear();
        slot.push_str(text).map_err(|_| PeripheralError::InvalidValue)
    }

    fn clear(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }
}

impl Peripherals for Board {
    fn execute(&mut self, device: Device, value: &[u8]) -> Result<(), PeripheralError> {
        match device {
            Device::Output(pin) => {
                let output = self
                    .outputs
                    .get_mut(usize::from(pin))
                    .ok_or(PeripheralError::NoSuchDevice)?;
                let high = value.first().is_some_and(|&v| v != 0);
                output.set_level(high.into());
                Ok(())
            }
            Device::Led(index) => {
                let led = self
                    .leds
                    .get_mut(usize::from(index))
                    .ok_or(PeripheralError::NoSuchDevice)?;
                let rgb = value.get(..RGB_LEN).ok_or(PeripheralError::InvalidValue)?;
                led.copy_from_slice(rgb);
                Ok(())
            }
            Device::DisplayMessage => self.show(value),
            Device::DisplayBacklight => {
                let level = value.first().ok_or(PeripheralError::InvalidValue)?;
                self.backlight.set_level((*level != 0).into());
                Ok(())
            }
            Device::DisplayClear => {
                self.clear();
                Ok(())
            }
            Device::DisplayReset => {
                self.clear();
                self.backlight.set_high();
                Ok(())
            }
            _ => Err(PeripheralError::NoSuchDevice),
        }
    }

    fn outputs(&self) -> u32 {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, pin)| pin.is_set_high())
            .fold(0, |bits, (i, _)| bits | 1 << i)
    }

    fn led_count(&self) -> u8 {
        LED_COUNT as u8
    }

    fn led(&self, index: u8) -> Option<[u8; RGB_LEN]> {
        self.leds.get(usize::from(index)).copied()
    }

    fn display_lines(&self) -> u8 {
        DISPLAY_LINES as u8
    }

    fn display_line(&self, line: u8) -> Option<&str> {
        self.lines.get(usize::from(line)).map(String::as_str)
    }
}

/// GPIO inputs packed into the first input port, one bit per pin
pub struct BoardInputs {
    pins: [Input<'static>; INPUT_COUNT],
}

impl BoardInputs {
    pub fn new(pins: [Input<'static>; INPUT_COUNT]) -> Self {
        Self { pins }
    }
}

impl InputSource for BoardInputs {
    fn sample(&mut self, inputs: &mut [u8]) {
        inputs.fill(0);
        if let Some(port) = inputs.first_mut() {
            *port = self
                .pins
                .iter()
                .enumerate()
                .filter(|(_, pin)| pin.is_high())
                .fold(0, |bits, (i, _)| bits | 1 << i);
        }
    }
}
