pub mod aggregate;
pub mod dimensions;
pub mod engine;
pub mod synergy;

pub use aggregate::{headline, score_stack, score_stack_with, ScoringPolicy};
pub use dimensions::DimensionScore;
pub use engine::{ScoreEngine, ScoreError};
pub use synergy::{DeckSynergy, SynergyKind, SynergyTable, ToolSynergy};
