use crate::aggregate::{score_stack_with, ScoringPolicy};
use std::sync::Arc;
use std::time::Instant;
use storage::repo::{RepoError, SessionRepository};
use thiserror::Error;
use tracing::{info, warn};
use vibebuff_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use vibebuff_core::error::{ErrorCode, VibebuffError};
use vibebuff_core::metrics::{MetricsSnapshot, ScoringMetrics};
use vibebuff_core::model::{ScoreSnapshot, StackScore};
use vibebuff_core::now_millis;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("repository error: {0}")]
    Repository(#[from] RepoError),
}

impl VibebuffError for ScoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ScoreError::SessionNotFound(_) => ErrorCode::NotFound,
            ScoreError::Repository(err) => err.error_code(),
        }
    }
}

/// Recomputes a session's stack score from its current graph and caches it
/// on the session record.
///
/// Calculations for the same session are not coordinated: each one scores
/// the snapshot it read and the last write wins.
pub struct ScoreEngine {
    repo: Arc<SessionRepository>,
    policy: ScoringPolicy,
    metrics: ScoringMetrics,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl ScoreEngine {
    pub fn new(repo: Arc<SessionRepository>) -> Self {
        Self {
            repo,
            policy: ScoringPolicy::default(),
            metrics: ScoringMetrics::default(),
            audit_sink: None,
        }
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn calculate(&self, session_id: &str) -> Result<StackScore, ScoreError> {
        let started = Instant::now();
        let result = self.calculate_inner(session_id).await;

        match &result {
            Ok(score) => {
                let latency_us = started.elapsed().as_micros() as u64;
                self.metrics.record_scoring(latency_us, score.overall);
                info!(
                    session_id,
                    overall = score.overall,
                    latency_us,
                    "stack score updated"
                );
                self.audit(session_id, AuditOutcome::Succeeded);
            }
            Err(ScoreError::SessionNotFound(_)) => {
                self.metrics.record_not_found();
                warn!(session_id, "score requested for missing session");
                self.audit(session_id, AuditOutcome::Failed);
            }
            Err(err) => {
                warn!(session_id, error = %err, "stack score update failed");
                self.audit(session_id, AuditOutcome::Failed);
            }
        }

        result
    }

    async fn calculate_inner(&self, session_id: &str) -> Result<StackScore, ScoreError> {
        let session = match self.repo.get_session(session_id).await {
            Ok(session) if session.is_active => session,
            Ok(_) | Err(RepoError::NotFound) => {
                return Err(ScoreError::SessionNotFound(session_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let score = score_stack_with(&self.policy, &session.nodes, &session.edges);

        let now = now_millis();
        let snapshot = ScoreSnapshot {
            score: score.clone(),
            last_updated: now,
        };

        // The session may have been ended or removed since it was read.
        self.repo
            .update_session(session_id, |stored| {
                if !stored.is_active {
                    return Err(ScoreError::SessionNotFound(session_id.to_string()));
                }
                stored.score = Some(snapshot);
                stored.updated_at = now;
                Ok(())
            })
            .await
            .map_err(|err| match err {
                ScoreError::Repository(RepoError::NotFound) => {
                    ScoreError::SessionNotFound(session_id.to_string())
                }
                other => other,
            })?;

        Ok(score)
    }

    fn audit(&self, session_id: &str, outcome: AuditOutcome) {
        let Some(sink) = &self.audit_sink else {
            return;
        };
        let event = AuditEvent::new(AuditOperation::ScoreSession, outcome).with_session(session_id);
        if let Err(err) = sink.record(event) {
            warn!(error = %err, "failed to record audit event");
        }
    }
}
