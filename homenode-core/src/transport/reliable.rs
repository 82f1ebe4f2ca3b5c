//! Outstanding-message tracking and retransmission

use heapless::Vec;
use homenode_protocol::{additive, MESSAGE_CAPACITY};

use super::channel::{ChannelId, Link, CHANNEL_COUNT};

/// Transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// A message is already outstanding on this channel
    Busy,
    /// Payload is empty or exceeds the message capacity
    InvalidLength,
}

/// How an outstanding message left the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// The peer echoed the expected checksum
    Confirmed,
    /// Retries exhausted; the message is treated as sent
    GaveUp,
    /// The channel disconnected
    Cancelled,
}

/// Retransmission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportConfig {
    /// Ticks to wait for an echo before retransmitting
    pub retry_timeout_ticks: u16,
    /// Retransmissions before giving up
    pub max_retries: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_timeout_ticks: 20,
            max_retries: 3,
        }
    }
}

/// A committed message awaiting its echo
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutstandingMessage {
    payload: Vec<u8, MESSAGE_CAPACITY>,
    checksum_expected: u8,
    checksum_received: u8,
    timeout: u16,
    retries: u8,
}

impl OutstandingMessage {
    /// Message bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum the peer must echo
    pub fn checksum_expected(&self) -> u8 {
        self.checksum_expected
    }

    /// Retransmissions left
    pub fn retries(&self) -> u8 {
        self.retries
    }

    fn is_acknowledged(&self) -> bool {
        self.checksum_received == self.checksum_expected
    }
}

/// Per-channel reliable transport
#[derive(Debug, Clone, Default)]
pub struct Transport {
    config: TransportConfig,
    outstanding: [Option<OutstandingMessage>; CHANNEL_COUNT],
}

impl Transport {
    /// Create a transport with nothing outstanding
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            outstanding: Default::default(),
        }
    }

    /// Whether `channel` can accept a new message
    pub fn is_free(&self, channel: ChannelId) -> bool {
        self.outstanding[channel.index()].is_none()
    }

    /// The message outstanding on `channel`
    pub fn outstanding(&self, channel: ChannelId) -> Option<&OutstandingMessage> {
        self.outstanding[channel.index()].as_ref()
    }

    /// Commit a message and transmit it immediately
    pub fn commit<L: Link + ?Sized>(
        &mut self,
        channel: ChannelId,
        payload: &[u8],
        link: &mut L,
    ) -> Result<(), TransportError> {
        let slot = &mut self.outstanding[channel.index()];
        if slot.is_some() {
            return Err(TransportError::Busy);
        }
        if payload.is_empty() {
            return Err(TransportError::InvalidLength);
        }
        let payload = Vec::from_slice(payload).map_err(|_| TransportError::InvalidLength)?;
        let checksum_expected = additive(&payload);

        let message = slot.insert(OutstandingMessage {
            payload,
            checksum_expected,
            checksum_received: checksum_expected.wrapping_add(1),
            timeout: self.config.retry_timeout_ticks,
            retries: self.config.max_retries,
        });
        // a refused transmit is retried on timeout like a lost one
        let _ = link.transmit(&message.payload);
        Ok(())
    }

    /// Record an echoed checksum from the peer
    pub fn acknowledge(&mut self, channel: ChannelId, checksum: u8) {
        if let Some(message) = &mut self.outstanding[channel.index()] {
            message.checksum_received = checksum;
        }
    }

    /// Per-tick retry check for one channel
    ///
    /// Returns how the outstanding message finished, if it did.
    pub fn retry_trigger<L: Link + ?Sized>(
        &mut self,
        channel: ChannelId,
        link: &mut L,
    ) -> Option<Delivery> {
        let slot = &mut self.outstanding[channel.index()];
        let message = slot.as_mut()?;

        if !link.is_connected() {
            *slot = None;
            return Some(Delivery::Cancelled);
        }
        if message.is_acknowledged() {
            *slot = None;
            return Some(Delivery::Confirmed);
        }
        if message.timeout > 0 {
            message.timeout -= 1;
            return None;
        }
        if message.retries == 0 {
            *slot = None;
            return Some(Delivery::GaveUp);
        }

        message.retries -= 1;
        message.timeout = self.config.retry_timeout_ticks;
        let _ = link.transmit(&message.payload);
        None
    }

    /// Drop whatever is outstanding on `channel`
    pub fn cancel(&mut self, channel: ChannelId) -> bool {
        self.outstanding[channel.index()].take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLink {
        connected: bool,
        sent: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl TestLink {
        fn new() -> Self {
            Self {
                connected: true,
                sent: std::vec::Vec::new(),
            }
        }
    }

    impl Link for TestLink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn transmit(&mut self, payload: &[u8]) -> bool {
            self.sent.push(payload.to_vec());
            true
        }
    }

    const MESSAGE: [u8; 5] = [0x05, 0x03, 0x01, 0x01, 0x01];

    fn config() -> TransportConfig {
        TransportConfig {
            retry_timeout_ticks: 4,
            max_retries: 3,
        }
    }

    #[test]
    fn test_commit_transmits_immediately() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        transport.commit(ChannelId::Bluetooth, &MESSAGE, &mut link).unwrap();
        assert_eq!(link.sent.len(), 1);
        assert!(!transport.is_free(ChannelId::Bluetooth));
        assert!(transport.is_free(ChannelId::Usb));
        assert_eq!(
            transport.outstanding(ChannelId::Bluetooth).unwrap().checksum_expected(),
            additive(&MESSAGE)
        );
    }

    #[test]
    fn test_commit_busy() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        transport.commit(ChannelId::Usb, &MESSAGE, &mut link).unwrap();
        assert_eq!(
            transport.commit(ChannelId::Usb, &MESSAGE, &mut link),
            Err(TransportError::Busy)
        );
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_commit_rejects_bad_lengths() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        assert_eq!(
            transport.commit(ChannelId::Usb, &[], &mut link),
            Err(TransportError::InvalidLength)
        );
        assert_eq!(
            transport.commit(ChannelId::Usb, &[0u8; MESSAGE_CAPACITY + 1], &mut link),
            Err(TransportError::InvalidLength)
        );
        assert!(transport.is_free(ChannelId::Usb));
    }

    #[test]
    fn test_echo_confirms() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        transport.commit(ChannelId::Bluetooth, &MESSAGE, &mut link).unwrap();

        // wrong checksum does not confirm
        transport.acknowledge(ChannelId::Bluetooth, additive(&MESSAGE).wrapping_add(7));
        assert_eq!(transport.retry_trigger(ChannelId::Bluetooth, &mut link), None);

        transport.acknowledge(ChannelId::Bluetooth, additive(&MESSAGE));
        assert_eq!(
            transport.retry_trigger(ChannelId::Bluetooth, &mut link),
            Some(Delivery::Confirmed)
        );
        assert!(transport.is_free(ChannelId::Bluetooth));
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_gives_up_after_retries() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        transport.commit(ChannelId::Bluetooth, &MESSAGE, &mut link).unwrap();

        let mut outcome = None;
        let mut ticks = 0;
        while outcome.is_none() && ticks < 100 {
            outcome = transport.retry_trigger(ChannelId::Bluetooth, &mut link);
            ticks += 1;
        }
        assert_eq!(outcome, Some(Delivery::GaveUp));
        // initial send plus three retransmissions of the same bytes
        assert_eq!(link.sent.len(), 4);
        assert!(link.sent.iter().all(|p| p[..] == MESSAGE[..]));
        // each window is the timeout plus the tick that fires it
        assert_eq!(ticks, 4 * 5);
        assert!(transport.is_free(ChannelId::Bluetooth));
    }

    #[test]
    fn test_disconnect_cancels() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        transport.commit(ChannelId::Bluetooth, &MESSAGE, &mut link).unwrap();
        link.connected = false;
        assert_eq!(
            transport.retry_trigger(ChannelId::Bluetooth, &mut link),
            Some(Delivery::Cancelled)
        );
        assert!(transport.is_free(ChannelId::Bluetooth));
    }

    #[test]
    fn test_cancel() {
        let mut transport = Transport::new(config());
        let mut link = TestLink::new();
        assert!(!transport.cancel(ChannelId::Usb));
        transport.commit(ChannelId::Usb, &MESSAGE, &mut link).unwrap();
        assert!(transport.cancel(ChannelId::Usb));
        assert_eq!(transport.retry_trigger(ChannelId::Usb, &mut link), None);
    }
}
