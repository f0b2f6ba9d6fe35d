use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    RecomputeScore { session_id: String },
}

impl Job {
    fn dedup_key(&self) -> &str {
        match self {
            Job::RecomputeScore { session_id } => session_id,
        }
    }
}

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()>;
}

/// In-memory queue over a Tokio channel. A job for a session that is
/// already waiting is dropped, since the pending job will read the newest
/// graph anyway.
pub struct ChannelJobQueue {
    sender: mpsc::Sender<Job>,
    pending: Arc<DashMap<String, ()>>,
}

impl ChannelJobQueue {
    /// Returns the queue and the receiving half to hand to a [`crate::Worker`].
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let pending = Arc::new(DashMap::new());
        (
            Self {
                sender,
                pending: pending.clone(),
            },
            JobReceiver { receiver, pending },
        )
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait::async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()> {
        let key = job.dedup_key().to_string();
        if self.pending.insert(key.clone(), ()).is_some() {
            debug!(key = %key, "job already pending, coalesced");
            return Ok(());
        }

        if let Err(e) = self.sender.send(job).await {
            self.pending.remove(&key);
            return Err(anyhow::anyhow!("Queue send error: {}", e));
        }
        Ok(())
    }
}

pub struct JobReceiver {
    receiver: mpsc::Receiver<Job>,
    pending: Arc<DashMap<String, ()>>,
}

impl JobReceiver {
    /// Next job; clears its pending marker so later updates queue again.
    pub async fn recv(&mut self) -> Option<Job> {
        let job = self.receiver.recv().await?;
        self.pending.remove(job.dedup_key());
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recompute(id: &str) -> Job {
        Job::RecomputeScore {
            session_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_pending_jobs_are_coalesced() {
        let (queue, mut receiver) = ChannelJobQueue::new(8);

        queue.enqueue(recompute("s1")).await.unwrap();
        queue.enqueue(recompute("s1")).await.unwrap();
        queue.enqueue(recompute("s2")).await.unwrap();
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(receiver.recv().await, Some(recompute("s1")));
        assert_eq!(receiver.recv().await, Some(recompute("s2")));
        assert_eq!(queue.pending_len(), 0);

        // Once drained, the same session can be queued again.
        queue.enqueue(recompute("s1")).await.unwrap();
        assert_eq!(receiver.recv().await, Some(recompute("s1")));
    }

    #[tokio::test]
    async fn send_failure_clears_pending_marker() {
        let (queue, receiver) = ChannelJobQueue::new(1);
        drop(receiver);

        assert!(queue.enqueue(recompute("s1")).await.is_err());
        assert_eq!(queue.pending_len(), 0);
    }
}
