//! In-memory FIFO of task ids awaiting a worker.
//!
//! Not durable: it is rebuilt from the pending tasks of the state store on
//! every start. The queue knows nothing about dependencies; workers re-check
//! eligibility and hand tasks back.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Uuid>,
    queued: HashSet<Uuid>,
}

/// Unbounded, many-consumer FIFO of task references.
///
/// An id already waiting in the queue is not added a second time, so a
/// repeated completion notification can never duplicate work.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id`. Returns `false` if it was already queued.
    pub async fn enqueue(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.queued.insert(id) {
            return false;
        }
        inner.items.push_back(id);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Append every id in order. Returns how many were new.
    pub async fn extend(&self, ids: impl IntoIterator<Item = Uuid>) -> usize {
        let mut added = 0;
        for id in ids {
            if self.enqueue(id).await {
                added += 1;
            }
        }
        added
    }

    /// Wait until an item is available and take it.
    pub async fn dequeue(&self) -> Uuid {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.try_dequeue().await {
                return id;
            }
            notified.await;
        }
    }

    pub async fn try_dequeue(&self) -> Option<Uuid> {
        let mut inner = self.inner.lock().await;
        let id = inner.items.pop_front()?;
        inner.queued.remove(&id);
        Some(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().await.queued.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TaskQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        assert_eq!(queue.extend(ids.clone()).await, 3);

        for id in ids {
            assert_eq!(queue.dequeue().await, id);
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_ignored() {
        let queue = TaskQueue::new();
        let id = Uuid::new_v4();
        assert!(queue.enqueue(id).await);
        assert!(!queue.enqueue(id).await);
        assert_eq!(queue.len().await, 1);

        queue.dequeue().await;
        // once handed out it may be queued again
        assert!(queue.enqueue(id).await);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        let id = Uuid::new_v4();
        queue.enqueue(id).await;
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .unwrap();
        assert_eq!(got, id);
    }

    #[tokio::test]
    async fn test_many_consumers_each_get_one() {
        let queue = Arc::new(TaskQueue::new());
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move { queue.dequeue().await }));
        }
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        queue.extend(ids.clone()).await;

        let mut got = Vec::new();
        for consumer in consumers {
            got.push(
                tokio::time::timeout(Duration::from_secs(1), consumer)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        got.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(got, expected);
    }
}
