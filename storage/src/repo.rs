use crate::wal::{Wal, WalError};
use rkyv::ser::{serializers::AllocSerializer, Serializer};
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use vibebuff_core::error::{ErrorCode, VibebuffError};
use vibebuff_core::model::{BuildSession, Participant, Referral, ReferralCode};

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("Serialization error")]
    Serialization,
    #[error("Deserialization error")]
    Deserialization,
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl VibebuffError for RepoError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RepoError::NotFound => ErrorCode::NotFound,
            RepoError::Conflict(_) => ErrorCode::InvalidArgument,
            RepoError::Wal(_) | RepoError::Serialization | RepoError::Deserialization => {
                ErrorCode::Internal
            }
        }
    }
}

/// One record-level write. Records are replaced whole.
#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum Mutation {
    PutSession(BuildSession),
    PutParticipant(Participant),
    PutReferral(ReferralCode),
    RecordReferral(Referral),
}

/// WAL entry types for durability
#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum WalEntry {
    Mutation(Mutation),
    Transaction(Vec<Mutation>),
}

/// In-memory view of every record, rebuilt from the WAL on open.
#[derive(Default)]
pub struct RepoState {
    sessions: HashMap<String, BuildSession>,
    share_codes: HashMap<String, String>,
    // session id -> user id -> participant
    participants: HashMap<String, HashMap<String, Participant>>,
    referrals_by_user: HashMap<String, ReferralCode>,
    referral_codes: HashMap<String, String>,
    // referred user id -> the referral they used
    referrals: HashMap<String, Referral>,
}

impl RepoState {
    pub fn session(&self, id: &str) -> Option<&BuildSession> {
        self.sessions.get(id)
    }

    pub fn session_by_share_code(&self, code: &str) -> Option<&BuildSession> {
        self.share_codes
            .get(code)
            .and_then(|id| self.sessions.get(id))
    }

    pub fn participant(&self, session_id: &str, user_id: &str) -> Option<&Participant> {
        self.participants
            .get(session_id)
            .and_then(|by_user| by_user.get(user_id))
    }

    /// Participants of a session in join order.
    pub fn participants(&self, session_id: &str) -> Vec<&Participant> {
        let mut out: Vec<&Participant> = self
            .participants
            .get(session_id)
            .map(|by_user| by_user.values().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn referral_for_user(&self, user_id: &str) -> Option<&ReferralCode> {
        self.referrals_by_user.get(user_id)
    }

    pub fn referral_by_code(&self, code: &str) -> Option<&ReferralCode> {
        self.referral_codes
            .get(code)
            .and_then(|user| self.referrals_by_user.get(user))
    }

    pub fn referral_of(&self, referred_user_id: &str) -> Option<&Referral> {
        self.referrals.get(referred_user_id)
    }

    /// Referrals credited to `referrer_id`, oldest first.
    pub fn referrals_by_referrer(&self, referrer_id: &str) -> Vec<&Referral> {
        let mut out: Vec<&Referral> = self
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id)
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.referred_user_id.cmp(&b.referred_user_id))
        });
        out
    }

    fn validate(&self, mutations: &[Mutation]) -> Result<(), RepoError> {
        // Codes claimed earlier in the same batch count as taken.
        let mut claimed_share_codes: HashMap<&str, &str> = HashMap::new();
        let mut claimed_referrals: HashMap<&str, &str> = HashMap::new();
        let mut referred_users: Vec<&str> = Vec::new();

        for mutation in mutations {
            match mutation {
                Mutation::PutSession(session) => {
                    let owner = claimed_share_codes
                        .get(session.share_code.as_str())
                        .copied()
                        .or_else(|| self.share_codes.get(&session.share_code).map(String::as_str));
                    if owner.is_some_and(|owner| owner != session.id) {
                        return Err(RepoError::Conflict(format!(
                            "share code {} already in use",
                            session.share_code
                        )));
                    }
                    if let Some(existing) = self.sessions.get(&session.id) {
                        if existing.share_code != session.share_code {
                            return Err(RepoError::Conflict(format!(
                                "share code of session {} is immutable",
                                session.id
                            )));
                        }
                    }
                    claimed_share_codes.insert(&session.share_code, &session.id);
                }
                Mutation::PutParticipant(participant) => {
                    let known = self.sessions.contains_key(&participant.session_id)
                        || mutations.iter().any(|m| {
                            matches!(m, Mutation::PutSession(s) if s.id == participant.session_id)
                        });
                    if !known {
                        return Err(RepoError::NotFound);
                    }
                }
                Mutation::PutReferral(referral) => {
                    let owner = claimed_referrals
                        .get(referral.code.as_str())
                        .copied()
                        .or_else(|| self.referral_codes.get(&referral.code).map(String::as_str));
                    if owner.is_some_and(|owner| owner != referral.user_id) {
                        return Err(RepoError::Conflict(format!(
                            "referral code {} already in use",
                            referral.code
                        )));
                    }
                    if let Some(existing) = self.referrals_by_user.get(&referral.user_id) {
                        if existing.code != referral.code {
                            return Err(RepoError::Conflict(format!(
                                "user {} already has a referral code",
                                referral.user_id
                            )));
                        }
                    }
                    claimed_referrals.insert(&referral.code, &referral.user_id);
                }
                Mutation::RecordReferral(referral) => {
                    if referral.referrer_id == referral.referred_user_id {
                        return Err(RepoError::Conflict(format!(
                            "user {} cannot refer themselves",
                            referral.referred_user_id
                        )));
                    }
                    if self.referrals.contains_key(&referral.referred_user_id)
                        || referred_users.contains(&referral.referred_user_id.as_str())
                    {
                        return Err(RepoError::Conflict(format!(
                            "user {} already used a referral code",
                            referral.referred_user_id
                        )));
                    }
                    referred_users.push(&referral.referred_user_id);
                }
            }
        }

        Ok(())
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutSession(session) => {
                self.share_codes
                    .insert(session.share_code.clone(), session.id.clone());
                self.sessions.insert(session.id.clone(), session);
            }
            Mutation::PutParticipant(participant) => {
                self.participants
                    .entry(participant.session_id.clone())
                    .or_default()
                    .insert(participant.user_id.clone(), participant);
            }
            Mutation::PutReferral(referral) => {
                self.referral_codes
                    .insert(referral.code.clone(), referral.user_id.clone());
                self.referrals_by_user
                    .insert(referral.user_id.clone(), referral);
            }
            Mutation::RecordReferral(referral) => {
                self.referrals
                    .insert(referral.referred_user_id.clone(), referral);
            }
        }
    }
}

/// Durable store for stack-builder sessions, their participants and
/// referral codes.
pub struct SessionRepository {
    wal: Mutex<Wal>,
    state: RwLock<RepoState>,
}

impl SessionRepository {
    /// Open a repository, replaying the WAL to restore previous state.
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let mut wal = Wal::open(&wal_path).await?;
        let mut state = RepoState::default();

        let last_lsn = wal
            .replay(|_lsn, data| {
                let entry = deserialize_wal_entry(&data)?;
                match entry {
                    WalEntry::Mutation(mutation) => state.apply(mutation),
                    WalEntry::Transaction(mutations) => {
                        for mutation in mutations {
                            state.apply(mutation);
                        }
                    }
                }
                Ok(())
            })
            .await?;
        debug!(last_lsn, sessions = state.sessions.len(), "session repository replayed");

        Ok(Self {
            wal: Mutex::new(wal),
            state: RwLock::new(state),
        })
    }

    /// Runs `plan` against the current state and durably applies the
    /// mutations it returns as one WAL record. The write lock is held from
    /// planning until the in-memory apply, so plans never act on stale reads.
    /// If `plan` or validation fails, nothing is written.
    pub async fn transact<T, E, F>(&self, plan: F) -> Result<T, E>
    where
        F: FnOnce(&RepoState) -> Result<(T, Vec<Mutation>), E>,
        E: From<RepoError>,
    {
        let mut state = self.state.write().await;
        let (out, mutations) = plan(&state)?;
        if mutations.is_empty() {
            return Ok(out);
        }

        state.validate(&mutations)?;

        let entry = if mutations.len() == 1 {
            WalEntry::Mutation(mutations[0].clone())
        } else {
            WalEntry::Transaction(mutations.clone())
        };
        let bytes = serialize_wal_entry(&entry)?;

        {
            let mut wal = self.wal.lock().await;
            wal.append(&bytes).await.map_err(RepoError::from)?;
            wal.flush().await.map_err(RepoError::from)?;
        }

        for mutation in mutations {
            state.apply(mutation);
        }

        Ok(out)
    }

    pub async fn apply(&self, mutations: Vec<Mutation>) -> Result<(), RepoError> {
        self.transact(|_| Ok::<_, RepoError>(((), mutations))).await
    }

    /// Insert a new session. Fails with `Conflict` if the id or share code is taken.
    pub async fn insert_session(&self, session: BuildSession) -> Result<(), RepoError> {
        self.transact(|state| {
            if state.session(&session.id).is_some() {
                return Err(RepoError::Conflict(format!(
                    "session {} already exists",
                    session.id
                )));
            }
            Ok(((), vec![Mutation::PutSession(session)]))
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<BuildSession, RepoError> {
        let state = self.state.read().await;
        state.session(id).cloned().ok_or(RepoError::NotFound)
    }

    pub async fn session_by_share_code(&self, code: &str) -> Option<BuildSession> {
        let state = self.state.read().await;
        state.session_by_share_code(code).cloned()
    }

    pub async fn sessions_by_host(&self, user_id: &str) -> Vec<BuildSession> {
        let state = self.state.read().await;
        state
            .sessions
            .values()
            .filter(|session| session.host_user_id == user_id)
            .cloned()
            .collect()
    }

    /// Read-modify-write of one session under the repository write lock.
    pub async fn update_session<E, F>(&self, id: &str, f: F) -> Result<BuildSession, E>
    where
        F: FnOnce(&mut BuildSession) -> Result<(), E>,
        E: From<RepoError>,
    {
        self.transact(|state| {
            let mut session = state.session(id).cloned().ok_or(RepoError::NotFound)?;
            f(&mut session)?;
            Ok((session.clone(), vec![Mutation::PutSession(session)]))
        })
        .await
    }

    pub async fn put_participant(&self, participant: Participant) -> Result<(), RepoError> {
        self.apply(vec![Mutation::PutParticipant(participant)]).await
    }

    pub async fn participant(&self, session_id: &str, user_id: &str) -> Option<Participant> {
        let state = self.state.read().await;
        state.participant(session_id, user_id).cloned()
    }

    pub async fn participants(&self, session_id: &str) -> Vec<Participant> {
        let state = self.state.read().await;
        state.participants(session_id).into_iter().cloned().collect()
    }

    /// Applies `f` to a participant if present. Returns `None` for unknown
    /// participants without writing anything.
    pub async fn update_participant<F>(
        &self,
        session_id: &str,
        user_id: &str,
        f: F,
    ) -> Result<Option<Participant>, RepoError>
    where
        F: FnOnce(&mut Participant),
    {
        self.transact(|state| {
            let Some(existing) = state.participant(session_id, user_id) else {
                return Ok((None, Vec::new()));
            };
            let mut participant = existing.clone();
            f(&mut participant);
            Ok((
                Some(participant.clone()),
                vec![Mutation::PutParticipant(participant)],
            ))
        })
        .await
    }

    /// Insert a referral code. Fails with `Conflict` if the code is taken or
    /// the user already owns a different code.
    pub async fn insert_referral(&self, referral: ReferralCode) -> Result<(), RepoError> {
        self.apply(vec![Mutation::PutReferral(referral)]).await
    }

    pub async fn referral_for_user(&self, user_id: &str) -> Option<ReferralCode> {
        let state = self.state.read().await;
        state.referral_for_user(user_id).cloned()
    }

    pub async fn referral_by_code(&self, code: &str) -> Option<ReferralCode> {
        let state = self.state.read().await;
        state.referral_by_code(code).cloned()
    }

    pub async fn referral_of(&self, referred_user_id: &str) -> Option<Referral> {
        let state = self.state.read().await;
        state.referral_of(referred_user_id).cloned()
    }

    pub async fn referrals_by_referrer(&self, referrer_id: &str) -> Vec<Referral> {
        let state = self.state.read().await;
        state
            .referrals_by_referrer(referrer_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn current_lsn(&self) -> u64 {
        let wal = self.wal.lock().await;
        wal.current_lsn()
    }
}

fn serialize_wal_entry(entry: &WalEntry) -> Result<Vec<u8>, RepoError> {
    let mut serializer = AllocSerializer::<4096>::default();
    serializer
        .serialize_value(entry)
        .map_err(|_| RepoError::Serialization)?;
    Ok(serializer.into_serializer().into_inner().to_vec())
}

fn deserialize_wal_entry(data: &[u8]) -> Result<WalEntry, WalError> {
    let archived =
        rkyv::check_archived_root::<WalEntry>(data).map_err(|_| WalError::CorruptEntry)?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| WalError::CorruptEntry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use vibebuff_core::model::{ReferralStatus, StackEdge, StackNode};

    fn session(id: &str, code: &str) -> BuildSession {
        BuildSession {
            id: id.to_string(),
            name: format!("session {id}"),
            host_user_id: "host".to_string(),
            host_name: "Host".to_string(),
            host_avatar_url: None,
            share_code: code.to_string(),
            nodes: vec![StackNode::new("n1", "frontend", "React")],
            edges: Vec::new(),
            score: None,
            is_active: true,
            max_participants: 10,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn participant(session_id: &str, user_id: &str, joined_at: u64) -> Participant {
        Participant {
            id: format!("{session_id}-{user_id}"),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            user_name: user_id.to_uppercase(),
            user_avatar_url: None,
            cursor: None,
            cursor_color: "#ef4444".to_string(),
            is_active: true,
            last_seen: joined_at,
            joined_at,
        }
    }

    #[tokio::test]
    async fn test_repo_insert_get() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("test.wal"))
            .await
            .unwrap();

        repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

        assert_eq!(repo.get_session("s1").await.unwrap().share_code, "AAAAAA");
        assert_eq!(
            repo.session_by_share_code("AAAAAA").await.unwrap().id,
            "s1"
        );
        assert!(matches!(
            repo.get_session("missing").await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_repo_rejects_duplicate_share_code() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("dup.wal"))
            .await
            .unwrap();

        repo.insert_session(session("s1", "AAAAAA")).await.unwrap();
        let err = repo
            .insert_session(session("s2", "AAAAAA"))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::Conflict(_)));
        assert!(repo.get_session("s2").await.is_err());
        assert_eq!(repo.current_lsn().await, 1);
    }

    #[tokio::test]
    async fn test_repo_replay_on_restart() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("replay.wal");

        {
            let repo = SessionRepository::open(&wal_path).await.unwrap();
            repo.insert_session(session("s1", "AAAAAA")).await.unwrap();
            repo.put_participant(participant("s1", "host", 1))
                .await
                .unwrap();
            repo.update_session("s1", |s| {
                s.edges.push(StackEdge::new("e1", "n1", "n2"));
                Ok::<_, RepoError>(())
            })
            .await
            .unwrap();
            repo.insert_referral(ReferralCode {
                user_id: "host".to_string(),
                code: "REFCODE1".to_string(),
                created_at: 5,
            })
            .await
            .unwrap();
        }

        {
            let repo = SessionRepository::open(&wal_path).await.unwrap();
            let restored = repo.get_session("s1").await.unwrap();
            assert_eq!(restored.edges.len(), 1);
            assert_eq!(repo.participants("s1").await.len(), 1);
            assert_eq!(
                repo.referral_by_code("REFCODE1").await.unwrap().user_id,
                "host"
            );
            assert_eq!(repo.current_lsn().await, 4);
        }
    }

    #[tokio::test]
    async fn test_update_session_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("missing.wal"))
            .await
            .unwrap();

        let result = repo
            .update_session("nope", |_| Ok::<_, RepoError>(()))
            .await;

        assert!(matches!(result, Err(RepoError::NotFound)));
        assert_eq!(repo.current_lsn().await, 0);
    }

    #[tokio::test]
    async fn test_failed_plan_writes_nothing() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("rollback.wal");
        let repo = SessionRepository::open(&wal_path).await.unwrap();
        repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

        // Second mutation collides with s1's share code, so the batch is rejected.
        let result = repo
            .apply(vec![
                Mutation::PutSession(session("s2", "BBBBBB")),
                Mutation::PutSession(session("s3", "AAAAAA")),
            ])
            .await;

        assert!(matches!(result, Err(RepoError::Conflict(_))));
        assert!(repo.get_session("s2").await.is_err());

        drop(repo);
        let reopened = SessionRepository::open(&wal_path).await.unwrap();
        assert!(reopened.get_session("s2").await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_persists_single_wal_record() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("txn_single_record.wal");
        let repo = SessionRepository::open(&wal_path).await.unwrap();

        repo.apply(vec![
            Mutation::PutSession(session("s1", "AAAAAA")),
            Mutation::PutParticipant(participant("s1", "a", 1)),
            Mutation::PutParticipant(participant("s1", "b", 2)),
        ])
        .await
        .unwrap();
        drop(repo);

        let mut wal = Wal::open(&wal_path).await.unwrap();
        let mut record_count = 0usize;
        let mut tx_mutation_count = 0usize;

        wal.replay(|_lsn, payload| {
            record_count += 1;
            match deserialize_wal_entry(&payload)? {
                WalEntry::Transaction(entries) => tx_mutation_count = entries.len(),
                WalEntry::Mutation(_) => return Err(WalError::CorruptEntry),
            }
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(record_count, 1);
        assert_eq!(tx_mutation_count, 3);
    }

    #[tokio::test]
    async fn test_participant_requires_known_session() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("orphan.wal"))
            .await
            .unwrap();

        let result = repo.put_participant(participant("ghost", "a", 1)).await;
        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_participants_listed_in_join_order() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("order.wal"))
            .await
            .unwrap();
        repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

        repo.put_participant(participant("s1", "zed", 1)).await.unwrap();
        repo.put_participant(participant("s1", "amy", 2)).await.unwrap();

        let users: Vec<String> = repo
            .participants("s1")
            .await
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(users, vec!["zed".to_string(), "amy".to_string()]);

        let missing = repo
            .update_participant("s1", "nobody", |p| p.is_active = false)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_referral_uniqueness() {
        let dir = tempdir().unwrap();
        let repo = SessionRepository::open(dir.path().join("referral.wal"))
            .await
            .unwrap();

        let code = |user: &str, code: &str| ReferralCode {
            user_id: user.to_string(),
            code: code.to_string(),
            created_at: 1,
        };

        repo.insert_referral(code("u1", "AAAAAAAA")).await.unwrap();
        assert!(matches!(
            repo.insert_referral(code("u2", "AAAAAAAA")).await,
            Err(RepoError::Conflict(_))
        ));
        assert!(matches!(
            repo.insert_referral(code("u1", "BBBBBBBB")).await,
            Err(RepoError::Conflict(_))
        ));
        assert_eq!(repo.referral_for_user("u1").await.unwrap().code, "AAAAAAAA");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_inserts_never_share_a_code() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(
            SessionRepository::open(dir.path().join("race.wal"))
                .await
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            tasks.push(tokio::spawn(async move {
                repo.insert_session(session(&format!("s{i}"), "SAMECD")).await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_failed_wal_write_is_not_resurrected() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("fault.wal");
        let repo = SessionRepository::open(&wal_path).await.unwrap();
        repo.insert_session(session("s1", "AAAAAA")).await.unwrap();

        repo.wal.lock().await.inject_write_failure();
        let err = repo
            .insert_session(session("s2", "BBBBBB"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Wal(WalError::Io(_))));
        assert!(repo.get_session("s2").await.is_err());
        assert_eq!(repo.current_lsn().await, 1);

        repo.insert_session(session("s3", "CCCCCC")).await.unwrap();
        assert_eq!(repo.current_lsn().await, 2);
        drop(repo);

        let reopened = SessionRepository::open(&wal_path).await.unwrap();
        assert!(reopened.get_session("s1").await.is_ok());
        assert!(reopened.get_session("s2").await.is_err());
        assert!(reopened.session_by_share_code("BBBBBB").await.is_none());
        assert!(reopened.get_session("s3").await.is_ok());
        assert_eq!(reopened.current_lsn().await, 2);
    }

    fn referral(referrer: &str, referred: &str, created_at: u64) -> Referral {
        Referral {
            referrer_id: referrer.to_string(),
            referred_user_id: referred.to_string(),
            referral_code: "AAAAAAAA".to_string(),
            status: ReferralStatus::Completed,
            referrer_reward_xp: 500,
            referred_reward_xp: 250,
            created_at,
            completed_at: Some(created_at),
        }
    }

    #[tokio::test]
    async fn test_each_user_is_referred_at_most_once() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("referred.wal");
        let repo = SessionRepository::open(&wal_path).await.unwrap();

        repo.apply(vec![Mutation::RecordReferral(referral("u1", "u2", 1))])
            .await
            .unwrap();
        assert!(matches!(
            repo.apply(vec![Mutation::RecordReferral(referral("u3", "u2", 2))])
                .await,
            Err(RepoError::Conflict(_))
        ));
        assert!(matches!(
            repo.apply(vec![Mutation::RecordReferral(referral("u4", "u4", 3))])
                .await,
            Err(RepoError::Conflict(_))
        ));
        assert!(matches!(
            repo.apply(vec![
                Mutation::RecordReferral(referral("u1", "u5", 4)),
                Mutation::RecordReferral(referral("u3", "u5", 4)),
            ])
            .await,
            Err(RepoError::Conflict(_))
        ));
        repo.apply(vec![Mutation::RecordReferral(referral("u1", "u6", 5))])
            .await
            .unwrap();
        drop(repo);

        let reopened = SessionRepository::open(&wal_path).await.unwrap();
        assert_eq!(reopened.referral_of("u2").await.unwrap().referrer_id, "u1");
        assert!(reopened.referral_of("u5").await.is_none());
        let referred: Vec<String> = reopened
            .referrals_by_referrer("u1")
            .await
            .into_iter()
            .map(|r| r.referred_user_id)
            .collect();
        assert_eq!(referred, vec!["u2".to_string(), "u6".to_string()]);
    }
}
