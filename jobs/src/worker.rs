use crate::queue::{Job, JobReceiver};
use scoring::ScoreEngine;
use std::sync::Arc;
use tracing::{error, info};

pub struct Worker {
    receiver: JobReceiver,
    engine: Arc<ScoreEngine>,
}

impl Worker {
    pub fn new(receiver: JobReceiver, engine: Arc<ScoreEngine>) -> Self {
        Self { receiver, engine }
    }

    /// Runs until every queue handle is dropped. Failed jobs are logged and skipped.
    pub async fn run(mut self) {
        info!("Worker started");
        while let Some(job) = self.receiver.recv().await {
            match job {
                Job::RecomputeScore { session_id } => {
                    info!("Recomputing score for session {}", session_id);
                    if let Err(e) = self.engine.calculate(&session_id).await {
                        error!("Failed to recompute score for session {}: {}", session_id, e);
                    }
                }
            }
        }
        info!("Worker stopped");
    }
}
