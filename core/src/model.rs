use rkyv::Archive;

#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
)]
#[archive(check_bytes)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A tool placed on the stack canvas.
#[derive(
    Archive, rkyv::Deserialize, rkyv::Serialize, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq,
)]
#[archive(check_bytes)]
pub struct StackNode {
    pub id: String,
    /// Canvas renderer type, e.g. "tool".
    pub kind: String,
    pub position: Position,
    pub label: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A directed data/dependency flow between two nodes. Endpoints are not
/// validated against the node list.
#[derive(
    Archive, rkyv::Deserialize, rkyv::Serialize, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq,
)]
#[archive(check_bytes)]
pub struct StackEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
)]
#[archive(check_bytes)]
pub struct StackScore {
    pub overall: u8,
    pub completeness: u8,
    pub coherence: u8,
    pub scalability: u8,
    pub cost_efficiency: u8,
    pub feedback: Vec<String>,
}

/// Cached score on a session. Display only, never authoritative.
#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
)]
#[archive(check_bytes)]
pub struct ScoreSnapshot {
    pub score: StackScore,
    pub last_updated: u64,
}

#[derive(
    Archive, rkyv::Deserialize, rkyv::Serialize, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq,
)]
#[archive(check_bytes)]
pub struct BuildSession {
    pub id: String,
    pub name: String,
    pub host_user_id: String,
    pub host_name: String,
    pub host_avatar_url: Option<String>,
    pub share_code: String,
    pub nodes: Vec<StackNode>,
    pub edges: Vec<StackEdge>,
    pub score: Option<ScoreSnapshot>,
    pub is_active: bool,
    pub max_participants: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(
    Archive, rkyv::Deserialize, rkyv::Serialize, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq,
)]
#[archive(check_bytes)]
pub struct Participant {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_avatar_url: Option<String>,
    pub cursor: Option<Position>,
    pub cursor_color: String,
    pub is_active: bool,
    pub last_seen: u64,
    pub joined_at: u64,
}

#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
)]
#[archive(check_bytes)]
pub struct ReferralCode {
    pub user_id: String,
    pub code: String,
    pub created_at: u64,
}

#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Completed,
    Rewarded,
}

/// A referred user's one-time use of someone else's referral code.
#[derive(
    Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
)]
#[archive(check_bytes)]
pub struct Referral {
    pub referrer_id: String,
    pub referred_user_id: String,
    pub referral_code: String,
    pub status: ReferralStatus,
    pub referrer_reward_xp: u32,
    pub referred_reward_xp: u32,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl StackNode {
    pub fn new(id: impl Into<String>, category: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "tool".to_string(),
            position: Position::default(),
            label: label.into(),
            category: category.into(),
            tool_id: None,
            description: None,
        }
    }
}

impl StackEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            animated: false,
        }
    }
}
