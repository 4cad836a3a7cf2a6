//! Bounded queue that evicts the oldest item when full.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

/// Single-producer/single-consumer buffer favouring recency over completeness.
///
/// `push` never blocks: when the queue is full the head is evicted first.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue `item`, returning how many older items were evicted to make room.
    pub fn push(&self, item: T) -> usize {
        let mut item = item;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                    item = back;
                }
                // Both ends live in `self`, so the channel cannot be disconnected.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Dequeue one item. `None` timeout means do not wait at all.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<T> {
        match timeout {
            None => self.rx.try_recv().ok(),
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(item) => Some(item),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything currently buffered.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_keeps_most_recent() {
        let queue = DropOldestQueue::new(3);
        let mut evicted = 0;
        for i in 0..4 {
            evicted += queue.push(i);
        }
        assert_eq!(evicted, 1);
        assert_eq!(queue.len(), 3);

        let drained: Vec<i32> = std::iter::from_fn(|| queue.pop(None)).collect();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn test_many_overflows() {
        let queue = DropOldestQueue::new(5);
        for i in 0..100 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        let drained: Vec<i32> = std::iter::from_fn(|| queue.pop(None)).collect();
        assert_eq!(drained, vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn test_pop_on_empty_returns_none() {
        let queue: DropOldestQueue<u8> = DropOldestQueue::new(2);
        assert!(queue.pop(None).is_none());
        assert!(queue.pop(Some(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn test_pop_waits_for_producer() {
        let queue = DropOldestQueue::new(2);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(7u32);
        });
        assert_eq!(queue.pop(Some(Duration::from_secs(2))), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear() {
        let queue = DropOldestQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
    }
}
