//! Device-id partition
//!
//! An action's device byte selects what the action drives. The low seven
//! bits are the device id; the high bit marks an action that also fires
//! when its state is entered without an input change.

/// High bit of the device byte: fire on state entry
pub const ENTRY_FLAG: u8 = 0x80;

/// First expander pin id
pub const OUTPUT_BASE: u8 = 0x00;
/// Last expander pin id
pub const OUTPUT_LAST: u8 = 0x1F;
/// First LED id
pub const LED_BASE: u8 = 0x20;
/// Last LED id
pub const LED_LAST: u8 = 0x3F;
pub const DISPLAY_MESSAGE: u8 = 0x40;
pub const DISPLAY_BACKLIGHT: u8 = 0x41;
pub const DISPLAY_RESET: u8 = 0x42;
pub const DISPLAY_CLEAR: u8 = 0x43;
pub const CONNECTION_ESTABLISHED: u8 = 0x50;
pub const CONNECTION_TRIGGER: u8 = 0x51;
pub const GOTO: u8 = 0x7E;
pub const ENTER: u8 = 0x7F;

/// Decoded device id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Device {
    /// I/O-expander output pin
    Output(u8),
    /// LED by index
    Led(u8),
    /// Show `[line, text...]` on the display
    DisplayMessage,
    /// Backlight level
    DisplayBacklight,
    DisplayReset,
    DisplayClear,
    /// Announce identity and program state to connected peers
    ConnectionEstablished,
    /// Hide/disconnect (0) or become visible (1)
    ConnectionTrigger,
    /// Transition to another state within the current check
    Goto,
    /// Enter a state on the next check
    Enter,
    /// Unassigned id
    Reserved(u8),
}

impl Device {
    /// Decode a device byte, ignoring the entry flag
    pub fn from_byte(byte: u8) -> Self {
        match byte & !ENTRY_FLAG {
            id @ OUTPUT_BASE..=OUTPUT_LAST => Device::Output(id - OUTPUT_BASE),
            id @ LED_BASE..=LED_LAST => Device::Led(id - LED_BASE),
            DISPLAY_MESSAGE => Device::DisplayMessage,
            DISPLAY_BACKLIGHT => Device::DisplayBacklight,
            DISPLAY_RESET => Device::DisplayReset,
            DISPLAY_CLEAR => Device::DisplayClear,
            CONNECTION_ESTABLISHED => Device::ConnectionEstablished,
            CONNECTION_TRIGGER => Device::ConnectionTrigger,
            GOTO => Device::Goto,
            ENTER => Device::Enter,
            id => Device::Reserved(id),
        }
    }

    /// Encode back to a device id (entry flag clear)
    pub fn to_byte(self) -> u8 {
        match self {
            Device::Output(pin) => OUTPUT_BASE + (pin & 0x1F),
            Device::Led(index) => LED_BASE + (index & 0x1F),
            Device::DisplayMessage => DISPLAY_MESSAGE,
            Device::DisplayBacklight => DISPLAY_BACKLIGHT,
            Device::DisplayReset => DISPLAY_RESET,
            Device::DisplayClear => DISPLAY_CLEAR,
            Device::ConnectionEstablished => CONNECTION_ESTABLISHED,
            Device::ConnectionTrigger => CONNECTION_TRIGGER,
            Device::Goto => GOTO,
            Device::Enter => ENTER,
            Device::Reserved(id) => id & !ENTRY_FLAG,
        }
    }

    /// Whether this device is handled by the board's peripheral driver
    pub fn is_peripheral(self) -> bool {
        matches!(
            self,
            Device::Output(_)
                | Device::Led(_)
                | Device::DisplayMessage
                | Device::DisplayBacklight
                | Device::DisplayReset
                | Device::DisplayClear
        )
    }
}

/// Whether a device byte carries the entry flag
pub fn fires_on_entry(byte: u8) -> bool {
    byte & ENTRY_FLAG != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        assert_eq!(Device::from_byte(0x00), Device::Output(0));
        assert_eq!(Device::from_byte(0x1F), Device::Output(31));
        assert_eq!(Device::from_byte(0x20), Device::Led(0));
        assert_eq!(Device::from_byte(0x25), Device::Led(5));
        assert_eq!(Device::from_byte(0x40), Device::DisplayMessage);
        assert_eq!(Device::from_byte(0x51), Device::ConnectionTrigger);
        assert_eq!(Device::from_byte(0x7E), Device::Goto);
        assert_eq!(Device::from_byte(0x7F), Device::Enter);
        assert_eq!(Device::from_byte(0x60), Device::Reserved(0x60));
    }

    #[test]
    fn test_entry_flag_ignored_in_id() {
        assert_eq!(Device::from_byte(0x80 | 0x25), Device::Led(5));
        assert_eq!(Device::from_byte(0xFE), Device::Goto);
        assert!(fires_on_entry(0xA5));
        assert!(!fires_on_entry(0x25));
    }

    #[test]
    fn test_to_byte_inverts_from_byte() {
        for byte in 0u8..0x80 {
            assert_eq!(Device::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn test_peripheral_split() {
        assert!(Device::Output(3).is_peripheral());
        assert!(Device::DisplayClear.is_peripheral());
        assert!(!Device::Goto.is_peripheral());
        assert!(!Device::ConnectionTrigger.is_peripheral());
        assert!(!Device::Reserved(0x60).is_peripheral());
    }
}
