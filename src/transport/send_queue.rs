//! Outbound FIFO shared by any number of producers and one consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Thread-safe FIFO of outbound messages.
///
/// Producers call [`SendQueue::push`]; the single sender thread blocks in
/// [`SendQueue::wait_drain`] instead of being polled by a host loop.
#[derive(Debug, Default)]
pub struct SendQueue {
    items: Mutex<VecDeque<String>>,
    ready: Condvar,
}

impl SendQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake the consumer.
    pub fn push(&self, message: String) {
        self.items
            .lock()
            .expect("send queue mutex poisoned")
            .push_back(message);
        self.ready.notify_one();
    }

    /// Take everything queued so far, oldest first, without waiting.
    pub fn drain(&self) -> Vec<String> {
        self.items
            .lock()
            .expect("send queue mutex poisoned")
            .drain(..)
            .collect()
    }

    /// Wait up to `timeout` for at least one message, then take everything.
    ///
    /// Returns an empty vector on timeout.
    pub fn wait_drain(&self, timeout: Duration) -> Vec<String> {
        let guard = self.items.lock().expect("send queue mutex poisoned");
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |items| items.is_empty())
            .expect("send queue mutex poisoned");
        guard.drain(..).collect()
    }

    /// Drop every pending message.
    pub fn clear(&self) {
        self.items.lock().expect("send queue mutex poisoned").clear();
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.items.lock().expect("send queue mutex poisoned").len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake a consumer blocked in [`SendQueue::wait_drain`].
    pub(crate) fn wake(&self) {
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = SendQueue::new();
        queue.push("a".to_string());
        queue.push("b".to_string());
        queue.push("c".to_string());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_drain_times_out_empty() {
        let queue = SendQueue::new();
        assert!(queue.wait_drain(Duration::from_millis(20)).is_empty());
    }

    #[test]
    fn test_producers_preserve_per_thread_order() {
        let queue = Arc::new(SendQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.push(format!("{p}:{i}"));
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().expect("producer");
        }

        let all = queue.drain();
        assert_eq!(all.len(), 200);
        for p in 0..4 {
            let seen: Vec<usize> = all
                .iter()
                .filter_map(|m| m.strip_prefix(&format!("{p}:")))
                .map(|i| i.parse().expect("index"))
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_wait_drain_wakes_on_push() {
        let queue = Arc::new(SendQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.wait_drain(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push("hello".to_string());
        assert_eq!(consumer.join().expect("consumer"), vec!["hello"]);
    }
}
