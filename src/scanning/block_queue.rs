//! Bounded blocking FIFO between the download and process stages
//!
//! `push` waits while the queue is full and `pop` waits while it is empty.
//! `stop` wakes every waiter: after it, `push` drops the item and returns
//! `false`, and `pop` returns `None`. `start` makes the queue usable again.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

#[derive(Debug)]
pub struct BlockQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled when an item is pushed
    not_empty: Condvar,
    /// Signalled when an item is popped
    not_full: Condvar,
    capacity: usize,
}

impl<T> BlockQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the queue is at capacity.
    ///
    /// Returns `false` if the queue was stopped before the item could be added.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();

        while !state.stopped && state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }

        if state.stopped {
            return false;
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Take the oldest item, blocking while the queue is empty.
    ///
    /// `None` means the queue was stopped; callers shut down rather than
    /// treating it as data.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();

        while !state.stopped && state.items.is_empty() {
            self.not_empty.wait(&mut state);
        }

        if state.stopped {
            return None;
        }

        let item = state.items.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    /// Wake every blocked caller and make further push/pop return immediately
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn start(&self) {
        self.state.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Drop every queued item, waking a producer blocked on a full queue
    pub fn clear(&self) {
        self.state.lock().items.clear();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = BlockQueue::new(10);
        for i in 0..5 {
            assert!(queue.push(i));
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure_blocks_until_pop() {
        let queue = Arc::new(BlockQueue::new(1000));
        for i in 0..1000 {
            assert!(queue.push(i));
        }
        assert_eq!(queue.len(), 1000);

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                let result = queue.push(1000);
                pushed.store(true, Ordering::SeqCst);
                result
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!pushed.load(Ordering::SeqCst), "1001st push must block");
        assert_eq!(queue.len(), 1000);

        assert_eq!(queue.pop(), Some(0));
        assert!(producer.join().unwrap());
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 1000);
    }

    #[test]
    fn test_stop_wakes_blocked_pop() {
        let queue: Arc<BlockQueue<u64>> = Arc::new(BlockQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_stop_wakes_blocked_push() {
        let queue = Arc::new(BlockQueue::new(1));
        assert!(queue.push(1u64));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_stopped_queue_returns_immediately_until_started() {
        let queue = BlockQueue::new(2);
        queue.push(1u64);
        queue.stop();

        assert!(!queue.push(2));
        assert_eq!(queue.pop(), None);

        queue.start();
        assert!(!queue.is_stopped());
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn test_clear_unblocks_producer() {
        let queue = Arc::new(BlockQueue::new(1));
        queue.push(1u64);
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.clear();
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
    }

    proptest! {
        #[test]
        fn prop_capacity_and_order(capacity in 1usize..32, ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let queue = BlockQueue::new(capacity);
            let mut next_push = 0u64;
            let mut next_pop = 0u64;

            for push in ops {
                if push && queue.len() < capacity {
                    prop_assert!(queue.push(next_push));
                    next_push += 1;
                } else if !push && !queue.is_empty() {
                    prop_assert_eq!(queue.pop(), Some(next_pop));
                    next_pop += 1;
                }
                prop_assert!(queue.len() <= capacity);
            }
        }
    }
}
