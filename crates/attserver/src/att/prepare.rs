//! Prepared (queued) writes of one connection
use super::constants::ATT_PREPARE_WRITE_QUEUE_SIZE;
use super::error::{AttError, AttResult};
use log::debug;
use std::collections::VecDeque;

/// One queued Prepare Write Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWrite {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Accumulating,
    /// The connection is gone; nothing is queued any more
    Closed,
}

/// FIFO of prepared writes awaiting Execute Write
#[derive(Debug)]
pub struct PreparedWriteQueue {
    entries: VecDeque<PreparedWrite>,
    capacity: usize,
    closed: bool,
}

impl PreparedWriteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            closed: false,
        }
    }

    /// Append a write. Rejected with `PrepareQueueFull` once the queue holds
    /// `capacity` entries. Dropped once the connection has closed.
    pub fn prepare(&mut self, handle: u16, offset: u16, value: &[u8]) -> AttResult<()> {
        if self.closed {
            debug!("(ATT) prepared write to 0x{:04X} after disconnect dropped", handle);
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(AttError::PrepareQueueFull(handle));
        }

        self.entries.push_back(PreparedWrite {
            handle,
            offset,
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Drain every entry in arrival order for commit
    pub fn take(&mut self) -> Vec<PreparedWrite> {
        self.entries.drain(..).collect()
    }

    /// Discard every entry
    pub fn cancel(&mut self) {
        self.entries.clear();
    }

    pub fn clear_on_disconnect(&mut self) {
        if !self.entries.is_empty() {
            debug!("(ATT) dropping {} prepared writes", self.entries.len());
        }
        self.entries.clear();
        self.closed = true;
    }

    pub fn state(&self) -> QueueState {
        if self.closed {
            QueueState::Closed
        } else if self.entries.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Accumulating
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PreparedWriteQueue {
    fn default() -> Self {
        Self::new(ATT_PREPARE_WRITE_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_preserves_arrival_order() {
        let mut queue = PreparedWriteQueue::default();
        queue.prepare(0x0010, 0, b"AB").unwrap();
        queue.prepare(0x0010, 2, b"CD").unwrap();
        queue.prepare(0x0011, 0, b"x").unwrap();
        assert_eq!(queue.state(), QueueState::Accumulating);

        let writes = queue.take();
        let order: Vec<(u16, u16)> = writes.iter().map(|w| (w.handle, w.offset)).collect();
        assert_eq!(order, vec![(0x0010, 0), (0x0010, 2), (0x0011, 0)]);
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut queue = PreparedWriteQueue::new(2);
        queue.prepare(1, 0, &[1]).unwrap();
        queue.prepare(1, 1, &[2]).unwrap();
        assert_eq!(queue.prepare(1, 2, &[3]), Err(AttError::PrepareQueueFull(1)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cancel_and_disconnect_empty_the_queue() {
        let mut queue = PreparedWriteQueue::default();
        queue.prepare(1, 0, &[1]).unwrap();
        queue.cancel();
        assert!(queue.is_empty());

        queue.prepare(1, 0, &[1]).unwrap();
        queue.clear_on_disconnect();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_drops_writes() {
        let mut queue = PreparedWriteQueue::default();
        queue.prepare(1, 0, &[1]).unwrap();
        queue.clear_on_disconnect();
        assert_eq!(queue.state(), QueueState::Closed);

        queue.prepare(1, 0, &[2]).unwrap();
        assert!(queue.is_empty());
        assert!(queue.take().is_empty());
        assert_eq!(queue.state(), QueueState::Closed);
    }
}
