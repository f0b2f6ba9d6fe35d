use crate::codes::{claim_unique_code, ClaimError, CodeGenerator};
use jobs::queue::{Job, JobQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::repo::{Mutation, RepoError, SessionRepository};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use vibebuff_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use vibebuff_core::config::SessionConfig;
use vibebuff_core::error::{ErrorCode, VibebuffError};
use vibebuff_core::model::{BuildSession, Participant, Position, StackEdge, StackNode};
use vibebuff_core::now_millis;

/// Cursor colours handed out to participants. The host always gets the first.
pub const CURSOR_COLORS: [&str; 10] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#14b8a6", "#3b82f6", "#8b5cf6", "#ec4899",
    "#06b6d4", "#84cc16",
];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found or inactive")]
    NotFound,
    #[error("session is full")]
    SessionFull,
    #[error("only the host can end the session")]
    NotHost,
    #[error("no unused share code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error("repository error: {0}")]
    Repository(RepoError),
}

impl From<RepoError> for SessionError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => SessionError::NotFound,
            other => SessionError::Repository(other),
        }
    }
}

impl From<ClaimError> for SessionError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Exhausted(attempts) => SessionError::CodeSpaceExhausted(attempts),
            ClaimError::Repository(err) => err.into(),
        }
    }
}

impl VibebuffError for SessionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SessionError::NotFound => ErrorCode::NotFound,
            SessionError::SessionFull => ErrorCode::ResourceExhausted,
            SessionError::NotHost => ErrorCode::PermissionDenied,
            SessionError::CodeSpaceExhausted(_) => ErrorCode::ResourceExhausted,
            SessionError::Repository(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub host_user_id: String,
    pub host_name: String,
    #[serde(default)]
    pub host_avatar_url: Option<String>,
    #[serde(default)]
    pub initial_nodes: Vec<StackNode>,
    #[serde(default)]
    pub initial_edges: Vec<StackEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub share_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionRequest {
    pub share_code: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedSession {
    pub session_id: String,
    pub participant_id: String,
}

/// Lifecycle of collaborative stack-builder sessions.
pub struct SessionService {
    repo: Arc<SessionRepository>,
    config: SessionConfig,
    codes: CodeGenerator,
    job_queue: Option<Arc<dyn JobQueue>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl SessionService {
    pub fn new(repo: Arc<SessionRepository>, config: SessionConfig) -> Self {
        Self {
            repo,
            config,
            codes: CodeGenerator::default(),
            job_queue: None,
            audit_sink: None,
        }
    }

    pub fn with_code_generator(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    /// Graph updates enqueue a score recompute on this queue.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, SessionError> {
        let now = now_millis();
        let session_id = Uuid::new_v4().to_string();

        let template = BuildSession {
            id: session_id.clone(),
            name: request.name,
            host_user_id: request.host_user_id.clone(),
            host_name: request.host_name.clone(),
            host_avatar_url: request.host_avatar_url.clone(),
            share_code: String::new(),
            nodes: request.initial_nodes,
            edges: request.initial_edges,
            score: None,
            is_active: true,
            max_participants: self.config.max_participants,
            created_at: now,
            updated_at: now,
        };
        let host = Participant {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            user_id: request.host_user_id.clone(),
            user_name: request.host_name,
            user_avatar_url: request.host_avatar_url,
            cursor: None,
            cursor_color: CURSOR_COLORS[0].to_string(),
            is_active: true,
            last_seen: now,
            joined_at: now,
        };

        let claimed = claim_unique_code(
            &self.codes,
            self.config.share_code_length,
            self.config.max_code_attempts,
            |code| {
                let repo = self.repo.clone();
                let mut session = template.clone();
                session.share_code = code.clone();
                let host = host.clone();
                async move {
                    repo.apply(vec![
                        Mutation::PutSession(session),
                        Mutation::PutParticipant(host),
                    ])
                    .await
                    .map(|_| code)
                }
            },
        )
        .await;

        let share_code = match claimed {
            Ok(code) => code,
            Err(err) => {
                let err = SessionError::from(err);
                warn!(error = %err, "failed to create session");
                self.audit(
                    AuditEvent::new(AuditOperation::CreateSession, AuditOutcome::Failed)
                        .with_actor(&request.host_user_id),
                );
                return Err(err);
            }
        };

        info!(session_id = %session_id, share_code = %share_code, "session created");
        self.audit(
            AuditEvent::new(AuditOperation::CreateSession, AuditOutcome::Succeeded)
                .with_actor(&request.host_user_id)
                .with_session(&session_id),
        );

        Ok(CreatedSession {
            session_id,
            share_code,
        })
    }

    /// Active session by id; ended or unknown sessions read as `None`.
    pub async fn get_session(&self, session_id: &str) -> Option<BuildSession> {
        self.repo
            .get_session(session_id)
            .await
            .ok()
            .filter(|session| session.is_active)
    }

    /// Share codes are matched case-insensitively.
    pub async fn get_session_by_share_code(&self, share_code: &str) -> Option<BuildSession> {
        self.repo
            .session_by_share_code(&share_code.to_uppercase())
            .await
            .filter(|session| session.is_active)
    }

    pub async fn join_session(
        &self,
        request: JoinSessionRequest,
    ) -> Result<JoinedSession, SessionError> {
        let share_code = request.share_code.to_uppercase();
        let now = now_millis();

        let result = self
            .repo
            .transact(|state| {
                let session = state
                    .session_by_share_code(&share_code)
                    .filter(|session| session.is_active)
                    .ok_or(SessionError::NotFound)?;

                if let Some(existing) = state.participant(&session.id, &request.user_id) {
                    let mut returning = existing.clone();
                    returning.is_active = true;
                    returning.last_seen = now;
                    returning.user_name = request.user_name.clone();
                    returning.user_avatar_url = request.user_avatar_url.clone();
                    let joined = JoinedSession {
                        session_id: session.id.clone(),
                        participant_id: returning.id.clone(),
                    };
                    return Ok((joined, vec![Mutation::PutParticipant(returning)]));
                }

                let active: Vec<&Participant> = state
                    .participants(&session.id)
                    .into_iter()
                    .filter(|p| p.is_active)
                    .collect();
                if active.len() >= session.max_participants as usize {
                    return Err(SessionError::SessionFull);
                }

                let used: Vec<&str> = active.iter().map(|p| p.cursor_color.as_str()).collect();
                let participant = Participant {
                    id: Uuid::new_v4().to_string(),
                    session_id: session.id.clone(),
                    user_id: request.user_id.clone(),
                    user_name: request.user_name.clone(),
                    user_avatar_url: request.user_avatar_url.clone(),
                    cursor: None,
                    cursor_color: self.pick_cursor_color(&used),
                    is_active: true,
                    last_seen: now,
                    joined_at: now,
                };
                let joined = JoinedSession {
                    session_id: session.id.clone(),
                    participant_id: participant.id.clone(),
                };
                Ok((joined, vec![Mutation::PutParticipant(participant)]))
            })
            .await;

        let outcome = match &result {
            Ok(joined) => {
                info!(session_id = %joined.session_id, user_id = %request.user_id, "participant joined");
                AuditOutcome::Succeeded
            }
            Err(SessionError::SessionFull) => AuditOutcome::Denied,
            Err(_) => AuditOutcome::Failed,
        };
        let mut event =
            AuditEvent::new(AuditOperation::JoinSession, outcome).with_actor(&request.user_id);
        if let Ok(joined) = &result {
            event = event.with_session(&joined.session_id);
        }
        self.audit(event);

        result
    }

    /// Marks the participant inactive. Unknown participants are ignored.
    pub async fn leave_session(&self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        let now = now_millis();
        self.repo
            .update_participant(session_id, user_id, |p| {
                p.is_active = false;
                p.last_seen = now;
            })
            .await?;
        Ok(())
    }

    /// Host only. Deactivates the session and every participant at once.
    pub async fn end_session(&self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        let now = now_millis();

        let result = self
            .repo
            .transact(|state| {
                let session = state.session(session_id).ok_or(SessionError::NotFound)?;
                if session.host_user_id != user_id {
                    return Err(SessionError::NotHost);
                }

                let mut ended = session.clone();
                ended.is_active = false;
                ended.updated_at = now;

                let mut mutations = vec![Mutation::PutSession(ended)];
                for participant in state.participants(session_id) {
                    let mut participant = participant.clone();
                    participant.is_active = false;
                    participant.last_seen = now;
                    mutations.push(Mutation::PutParticipant(participant));
                }
                Ok(((), mutations))
            })
            .await;

        let outcome = match &result {
            Ok(()) => {
                info!(session_id, "session ended");
                AuditOutcome::Succeeded
            }
            Err(SessionError::NotHost) => AuditOutcome::Denied,
            Err(_) => AuditOutcome::Failed,
        };
        self.audit(
            AuditEvent::new(AuditOperation::EndSession, outcome)
                .with_actor(user_id)
                .with_session(session_id),
        );

        result
    }

    pub async fn active_participants(&self, session_id: &str) -> Vec<Participant> {
        self.repo
            .participants(session_id)
            .await
            .into_iter()
            .filter(|p| p.is_active)
            .collect()
    }

    pub async fn update_cursor(
        &self,
        session_id: &str,
        user_id: &str,
        position: Position,
    ) -> Result<(), SessionError> {
        let now = now_millis();
        self.repo
            .update_participant(session_id, user_id, |p| {
                p.cursor = Some(position);
                p.last_seen = now;
            })
            .await?;
        Ok(())
    }

    pub async fn update_nodes(
        &self,
        session_id: &str,
        nodes: Vec<StackNode>,
    ) -> Result<(), SessionError> {
        self.replace_graph(session_id, Some(nodes), None).await
    }

    pub async fn update_edges(
        &self,
        session_id: &str,
        edges: Vec<StackEdge>,
    ) -> Result<(), SessionError> {
        self.replace_graph(session_id, None, Some(edges)).await
    }

    pub async fn update_state(
        &self,
        session_id: &str,
        nodes: Vec<StackNode>,
        edges: Vec<StackEdge>,
    ) -> Result<(), SessionError> {
        self.replace_graph(session_id, Some(nodes), Some(edges)).await
    }

    /// Wholesale replacement; concurrent saves are last-write-wins.
    async fn replace_graph(
        &self,
        session_id: &str,
        nodes: Option<Vec<StackNode>>,
        edges: Option<Vec<StackEdge>>,
    ) -> Result<(), SessionError> {
        let now = now_millis();
        self.repo
            .update_session(session_id, |session| {
                if !session.is_active {
                    return Err(SessionError::NotFound);
                }
                if let Some(nodes) = nodes {
                    session.nodes = nodes;
                }
                if let Some(edges) = edges {
                    session.edges = edges;
                }
                session.updated_at = now;
                Ok(())
            })
            .await?;

        self.schedule_rescore(session_id).await;
        Ok(())
    }

    async fn schedule_rescore(&self, session_id: &str) {
        let Some(queue) = &self.job_queue else {
            return;
        };
        let job = Job::RecomputeScore {
            session_id: session_id.to_string(),
        };
        if let Err(err) = queue.enqueue(job).await {
            warn!(session_id, error = %err, "failed to enqueue score recompute");
        }
    }

    /// Active sessions hosted by `user_id`, most recently updated first.
    pub async fn user_sessions(&self, user_id: &str) -> Vec<BuildSession> {
        let mut sessions: Vec<BuildSession> = self
            .repo
            .sessions_by_host(user_id)
            .await
            .into_iter()
            .filter(|session| session.is_active)
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub async fn heartbeat(&self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        let now = now_millis();
        self.repo
            .update_participant(session_id, user_id, |p| {
                p.last_seen = now;
                p.is_active = true;
            })
            .await?;
        Ok(())
    }

    pub async fn cleanup_inactive_participants(
        &self,
        session_id: &str,
    ) -> Result<usize, SessionError> {
        self.cleanup_inactive_participants_at(session_id, now_millis())
            .await
    }

    /// Deactivates active participants not seen for longer than the
    /// inactivity threshold as of `now`. Returns how many were deactivated.
    pub async fn cleanup_inactive_participants_at(
        &self,
        session_id: &str,
        now: u64,
    ) -> Result<usize, SessionError> {
        let threshold = self.config.inactive_threshold_ms;
        let deactivated = self
            .repo
            .transact(|state| {
                let mutations: Vec<Mutation> = state
                    .participants(session_id)
                    .into_iter()
                    .filter(|p| p.is_active && now.saturating_sub(p.last_seen) > threshold)
                    .map(|p| {
                        let mut stale = p.clone();
                        stale.is_active = false;
                        Mutation::PutParticipant(stale)
                    })
                    .collect();
                Ok::<_, SessionError>((mutations.len(), mutations))
            })
            .await?;

        if deactivated > 0 {
            info!(session_id, deactivated, "inactive participants cleaned up");
        }
        Ok(deactivated)
    }

    fn pick_cursor_color(&self, used: &[&str]) -> String {
        let available: Vec<&str> = CURSOR_COLORS
            .iter()
            .copied()
            .filter(|color| !used.contains(color))
            .collect();
        let pool: &[&str] = if available.is_empty() {
            &CURSOR_COLORS
        } else {
            &available
        };
        self.codes
            .pick(pool)
            .copied()
            .unwrap_or(CURSOR_COLORS[0])
            .to_string()
    }

    fn audit(&self, event: AuditEvent) {
        let Some(sink) = &self.audit_sink else {
            return;
        };
        if let Err(err) = sink.record(event) {
            warn!(error = %err, "failed to record audit event");
        }
    }
}
