//! Per-channel message queue

use heapless::Deque;
use homenode_protocol::Kind;

/// Items held per channel
pub const QUEUE_DEPTH: usize = 10;

/// A pending outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueItem {
    /// Kind to build
    pub kind: Kind,
    /// Kind-specific parameter; `None` for list kinds means "every item"
    pub param: Option<u8>,
}

/// FIFO of pending outbound messages with de-duplication
///
/// An item with a parameter is a duplicate of a queued item with the same
/// kind and parameter; an item without one is a duplicate of any queued
/// item of the same kind. Duplicates and items arriving when the queue is
/// full are dropped without telling the caller; the drop count is kept
/// for the debug message.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    items: Deque<QueueItem, QUEUE_DEPTH>,
    cursor: u8,
    dropped: u16,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            items: Deque::new(),
            cursor: 0,
            dropped: 0,
        }
    }

    /// Queue an item unless it duplicates one already queued
    pub fn enqueue(&mut self, kind: Kind, param: Option<u8>) {
        let duplicate = self
            .items
            .iter()
            .any(|item| item.kind == kind && (param.is_none() || item.param == param));
        if duplicate {
            return;
        }
        if self.items.push_back(QueueItem { kind, param }).is_err() {
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    /// Item at the head of the queue
    pub fn head(&self) -> Option<QueueItem> {
        self.items.front().copied()
    }

    /// Next list index to send for the head item
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    /// Move to the next list item of the head
    pub fn advance(&mut self) {
        self.cursor = self.cursor.saturating_add(1);
    }

    /// Remove the head item
    pub fn pop(&mut self) -> Option<QueueItem> {
        self.cursor = 0;
        self.items.pop_front()
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items dropped because the queue was full
    pub fn dropped(&self) -> u16 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new();
        queue.enqueue(Kind::Identity, None);
        queue.enqueue(Kind::Led, Some(2));
        queue.enqueue(Kind::Outputs, None);
        assert_eq!(queue.pop().unwrap().kind, Kind::Identity);
        assert_eq!(queue.pop(), Some(QueueItem { kind: Kind::Led, param: Some(2) }));
        assert_eq!(queue.pop().unwrap().kind, Kind::Outputs);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_duplicate_rules() {
        let mut queue = MessageQueue::new();
        queue.enqueue(Kind::Led, Some(1));
        queue.enqueue(Kind::Led, Some(1));
        assert_eq!(queue.len(), 1);

        queue.enqueue(Kind::Led, Some(2));
        assert_eq!(queue.len(), 2);

        // parameterless item collides with any item of its kind
        queue.enqueue(Kind::Led, None);
        assert_eq!(queue.len(), 2);

        queue.enqueue(Kind::Identity, None);
        queue.enqueue(Kind::Identity, None);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_full_queue_drops_silently() {
        let mut queue = MessageQueue::new();
        for i in 0..QUEUE_DEPTH as u8 {
            queue.enqueue(Kind::DisplayLine, Some(i));
        }
        queue.enqueue(Kind::Identity, None);
        assert_eq!(queue.len(), QUEUE_DEPTH);
        assert_eq!(queue.dropped(), 1);
        assert!(queue.items.iter().all(|i| i.kind == Kind::DisplayLine));
    }

    #[test]
    fn test_cursor_resets_on_pop() {
        let mut queue = MessageQueue::new();
        queue.enqueue(Kind::Led, None);
        queue.advance();
        queue.advance();
        assert_eq!(queue.cursor(), 2);
        queue.pop();
        assert_eq!(queue.cursor(), 0);
    }

    fn kind_strategy() -> impl Strategy<Value = (u8, Option<u8>)> {
        (0x10u8..0x15, proptest::option::of(0u8..4))
    }

    proptest! {
        #[test]
        fn test_no_duplicates(items in proptest::collection::vec(kind_strategy(), 0..40)) {
            let mut queue = MessageQueue::new();
            for (kind, param) in items {
                queue.enqueue(Kind::from_byte(kind), param);
            }
            let queued: std::vec::Vec<_> = queue.items.iter().copied().collect();
            prop_assert!(queued.len() <= QUEUE_DEPTH);
            for (i, a) in queued.iter().enumerate() {
                for b in &queued[i + 1..] {
                    prop_assert!(!(a.kind == b.kind && a.param == b.param));
                }
            }
        }
    }
}
