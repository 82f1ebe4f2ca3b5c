//! Transport channels

/// Number of transport channels
pub const CHANNEL_COUNT: usize = 2;

/// A path to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    /// Wired USB-serial bridge
    Usb,
    /// Bluetooth link through the radio module
    Bluetooth,
}

impl ChannelId {
    /// Every channel, in index order
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [ChannelId::Usb, ChannelId::Bluetooth];

    /// Array index of this channel
    pub const fn index(self) -> usize {
        match self {
            ChannelId::Usb => 0,
            ChannelId::Bluetooth => 1,
        }
    }
}

/// Lower layer of one channel
pub trait Link {
    /// Whether the peer is reachable on this channel
    fn is_connected(&self) -> bool;

    /// Send raw message bytes, returning false if the link refused them
    fn transmit(&mut self, payload: &[u8]) -> bool;
}

impl<T: Link + ?Sized> Link for &mut T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn transmit(&mut self, payload: &[u8]) -> bool {
        (**self).transmit(payload)
    }
}
