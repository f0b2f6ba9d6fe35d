use crate::dimensions::{coherence, completeness, cost_efficiency, scalability};
use vibebuff_core::config::ScoringConfig;
use vibebuff_core::model::{StackEdge, StackNode, StackScore};

pub const COMPLETENESS_WEIGHT: f64 = 0.30;
pub const COHERENCE_WEIGHT: f64 = 0.25;
pub const SCALABILITY_WEIGHT: f64 = 0.25;
pub const COST_EFFICIENCY_WEIGHT: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub max_feedback: usize,
    pub tool_sprawl_threshold: usize,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringPolicy {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            max_feedback: config.max_feedback,
            tool_sprawl_threshold: config.tool_sprawl_threshold,
        }
    }
}

pub fn headline(overall: u8) -> &'static str {
    match overall {
        80.. => "Excellent stack architecture!",
        60..=79 => "Good foundation, some improvements possible",
        40..=59 => "Stack needs more components",
        _ => "Add more tools to build a complete stack",
    }
}

/// Scores a stack graph with the default policy.
pub fn score_stack(nodes: &[StackNode], edges: &[StackEdge]) -> StackScore {
    score_stack_with(&ScoringPolicy::default(), nodes, edges)
}

/// Weighted sum of the four dimensions. The overall score is computed from
/// the unrounded dimension values; each dimension is rounded on its own.
pub fn score_stack_with(
    policy: &ScoringPolicy,
    nodes: &[StackNode],
    edges: &[StackEdge],
) -> StackScore {
    let completeness = completeness(nodes);
    let coherence = coherence(nodes, edges);
    let scalability = scalability(nodes);
    let cost_efficiency = cost_efficiency(nodes, policy.tool_sprawl_threshold);

    let overall = to_percent(
        completeness.value * COMPLETENESS_WEIGHT
            + coherence.value * COHERENCE_WEIGHT
            + scalability.value * SCALABILITY_WEIGHT
            + cost_efficiency.value * COST_EFFICIENCY_WEIGHT,
    );

    let mut feedback = vec![headline(overall).to_string()];
    feedback.extend(
        [
            &completeness.feedback,
            &coherence.feedback,
            &scalability.feedback,
            &cost_efficiency.feedback,
        ]
        .into_iter()
        .flatten()
        .cloned(),
    );
    feedback.truncate(policy.max_feedback);

    StackScore {
        overall,
        completeness: to_percent(completeness.value),
        coherence: to_percent(coherence.value),
        scalability: to_percent(scalability.value),
        cost_efficiency: to_percent(cost_efficiency.value),
        feedback,
    }
}

fn to_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}
