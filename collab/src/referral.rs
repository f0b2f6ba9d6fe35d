use crate::codes::{claim_unique_code, ClaimError, CodeGenerator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::repo::{Mutation, RepoError, SessionRepository};
use thiserror::Error;
use tracing::{info, warn};
use vibebuff_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use vibebuff_core::config::SessionConfig;
use vibebuff_core::error::{ErrorCode, VibebuffError};
use vibebuff_core::model::{Referral, ReferralCode, ReferralStatus};
use vibebuff_core::now_millis;

pub const REFERRER_REWARD_XP: u32 = 500;
pub const REFERRED_REWARD_XP: u32 = 250;

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("invalid referral code")]
    InvalidCode,
    #[error("user has already used a referral code")]
    AlreadyReferred,
    #[error("users cannot use their own referral code")]
    SelfReferral,
    #[error("no unused referral code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error("repository error: {0}")]
    Repository(#[from] RepoError),
}

impl From<ClaimError> for ReferralError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Exhausted(attempts) => ReferralError::CodeSpaceExhausted(attempts),
            ClaimError::Repository(err) => ReferralError::Repository(err),
        }
    }
}

impl VibebuffError for ReferralError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ReferralError::InvalidCode => ErrorCode::NotFound,
            ReferralError::AlreadyReferred | ReferralError::SelfReferral => {
                ErrorCode::InvalidArgument
            }
            ReferralError::CodeSpaceExhausted(_) => ErrorCode::ResourceExhausted,
            ReferralError::Repository(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedReferral {
    pub referrer_id: String,
    pub xp_earned: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralStats {
    pub code: Option<String>,
    pub total_referrals: usize,
    pub completed_referrals: usize,
    pub total_xp_earned: u64,
    pub reward_per_referral: u32,
}

/// One stable referral code per user, and at most one referral used per user.
pub struct ReferralService {
    repo: Arc<SessionRepository>,
    code_length: usize,
    max_attempts: usize,
    codes: CodeGenerator,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl ReferralService {
    pub fn new(repo: Arc<SessionRepository>, config: &SessionConfig) -> Self {
        Self {
            repo,
            code_length: config.referral_code_length,
            max_attempts: config.max_code_attempts,
            codes: CodeGenerator::default(),
            audit_sink: None,
        }
    }

    pub fn with_code_generator(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Returns the user's code, issuing one on first call. Concurrent first
    /// calls for the same user all see the same code.
    pub async fn get_or_create(&self, user_id: &str) -> Result<String, ReferralError> {
        if let Some(existing) = self.repo.referral_for_user(user_id).await {
            return Ok(existing.code);
        }

        let claimed = claim_unique_code(&self.codes, self.code_length, self.max_attempts, |code| {
            let repo = self.repo.clone();
            let user_id = user_id.to_string();
            async move {
                repo.transact(|state| {
                    if let Some(existing) = state.referral_for_user(&user_id) {
                        return Ok((existing.code.clone(), Vec::new()));
                    }
                    let referral = ReferralCode {
                        user_id: user_id.clone(),
                        code: code.clone(),
                        created_at: now_millis(),
                    };
                    Ok::<_, RepoError>((code, vec![Mutation::PutReferral(referral)]))
                })
                .await
            }
        })
        .await
        .map_err(ReferralError::from);

        let outcome = match &claimed {
            Ok(code) => {
                info!(user_id, code = %code, "referral code ready");
                AuditOutcome::Succeeded
            }
            Err(err) => {
                warn!(user_id, error = %err, "failed to issue referral code");
                AuditOutcome::Failed
            }
        };
        self.audit(AuditEvent::new(AuditOperation::IssueReferral, outcome).with_actor(user_id));

        claimed
    }

    /// Credits the owner of `code` with referring `user_id`. A user can use
    /// one referral code ever, and never their own.
    pub async fn apply(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<AppliedReferral, ReferralError> {
        let code = code.to_uppercase();
        let now = now_millis();

        let result = self
            .repo
            .transact(|state| {
                if state.referral_of(user_id).is_some() {
                    return Err(ReferralError::AlreadyReferred);
                }
                let owner = state
                    .referral_by_code(&code)
                    .ok_or(ReferralError::InvalidCode)?;
                if owner.user_id == user_id {
                    return Err(ReferralError::SelfReferral);
                }

                let referral = Referral {
                    referrer_id: owner.user_id.clone(),
                    referred_user_id: user_id.to_string(),
                    referral_code: code.clone(),
                    status: ReferralStatus::Completed,
                    referrer_reward_xp: REFERRER_REWARD_XP,
                    referred_reward_xp: REFERRED_REWARD_XP,
                    created_at: now,
                    completed_at: Some(now),
                };
                let applied = AppliedReferral {
                    referrer_id: owner.user_id.clone(),
                    xp_earned: REFERRED_REWARD_XP,
                };
                Ok((applied, vec![Mutation::RecordReferral(referral)]))
            })
            .await;

        let outcome = match &result {
            Ok(_) => AuditOutcome::Succeeded,
            Err(ReferralError::Repository(_)) => AuditOutcome::Failed,
            Err(_) => AuditOutcome::Denied,
        };
        let mut event = AuditEvent::new(AuditOperation::ApplyReferral, outcome)
            .with_actor(user_id)
            .with_metadata("code", &code);
        match &result {
            Ok(applied) => {
                info!(user_id, referrer_id = %applied.referrer_id, "referral applied");
                event = event.with_metadata("referrer_id", &applied.referrer_id);
            }
            Err(err) => warn!(user_id, error = %err, "referral rejected"),
        }
        self.audit(event);

        result
    }

    /// Referral totals for the user as a referrer.
    pub async fn stats(&self, user_id: &str) -> ReferralStats {
        let referrals = self.repo.referrals_by_referrer(user_id).await;
        let completed_referrals = referrals
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    ReferralStatus::Completed | ReferralStatus::Rewarded
                )
            })
            .count();
        let total_xp_earned = referrals
            .iter()
            .map(|r| u64::from(r.referrer_reward_xp))
            .sum();

        ReferralStats {
            code: self
                .repo
                .referral_for_user(user_id)
                .await
                .map(|referral| referral.code),
            total_referrals: referrals.len(),
            completed_referrals,
            total_xp_earned,
            reward_per_referral: REFERRER_REWARD_XP,
        }
    }

    /// Owner of a referral code, matched case-insensitively.
    pub async fn resolve(&self, code: &str) -> Option<String> {
        self.repo
            .referral_by_code(&code.to_uppercase())
            .await
            .map(|referral| referral.user_id)
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
