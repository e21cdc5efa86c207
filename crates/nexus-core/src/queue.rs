use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time;

use crate::task::Task;

/// Items a [`TaskQueue`] can order. Smaller keys pop first.
pub trait DeadlineOrdered {
    fn deadline_key(&self) -> (Instant, u64);
}

impl DeadlineOrdered for Arc<Task> {
    fn deadline_key(&self) -> (Instant, u64) {
        (self.deadline, self.tid)
    }
}

struct Entry<T>(T);

impl<T: DeadlineOrdered> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline_key() == other.0.deadline_key()
    }
}

impl<T: DeadlineOrdered> Eq for Entry<T> {}

impl<T: DeadlineOrdered> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: DeadlineOrdered> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop earliest deadline first.
        other.0.deadline_key().cmp(&self.0.deadline_key())
    }
}

/// Multi-producer multi-consumer queue ordered by deadline. Pushes are
/// synchronous; pops are async so postprocess workers can park on it.
pub struct TaskQueue<T: DeadlineOrdered> {
    heap: Mutex<BinaryHeap<Entry<T>>>,
    notify: Notify,
}

impl<T: DeadlineOrdered> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.heap.lock().unwrap().push(Entry(item));
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> T {
        loop {
            if let Some(Entry(item)) = self.heap.lock().unwrap().pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        time::timeout(timeout, self.pop()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }
}

impl<T: DeadlineOrdered> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(Instant, u64);

    impl DeadlineOrdered for Item {
        fn deadline_key(&self) -> (Instant, u64) {
            (self.0, self.1)
        }
    }

    #[tokio::test]
    async fn pops_earliest_deadline_first() {
        let q = TaskQueue::new();
        let now = Instant::now();
        q.push(Item(now + Duration::from_millis(30), 1));
        q.push(Item(now + Duration::from_millis(10), 2));
        q.push(Item(now + Duration::from_millis(20), 3));

        assert_eq!(q.pop().await.1, 2);
        assert_eq!(q.pop().await.1, 3);
        assert_eq!(q.pop().await.1, 1);
    }

    #[tokio::test]
    async fn ties_break_by_id() {
        let q = TaskQueue::new();
        let now = Instant::now();
        q.push(Item(now, 7));
        q.push(Item(now, 3));
        assert_eq!(q.pop().await.1, 3);
    }

    #[tokio::test]
    async fn pop_timeout_on_empty_queue() {
        let q: TaskQueue<Item> = TaskQueue::new();
        assert!(q.pop_timeout(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = Arc::new(TaskQueue::<Item>::new());
        let q2 = q.clone();
        let popper = tokio::spawn(async move { q2.pop().await.1 });
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(Item(Instant::now(), 42));
        assert_eq!(popper.await.unwrap(), 42);
    }
}
