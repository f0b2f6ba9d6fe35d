pub mod codes;
pub mod referral;
pub mod session;

pub use codes::{CodeGenerator, CODE_ALPHABET};
pub use referral::{
    AppliedReferral, ReferralError, ReferralService, ReferralStats, REFERRED_REWARD_XP,
    REFERRER_REWARD_XP,
};
pub use session::{
    CreateSessionRequest, CreatedSession, JoinSessionRequest, JoinedSession, SessionError,
    SessionService, CURSOR_COLORS,
};
