//! The four independent dimension scorers. Each is a pure function of the
//! node/edge lists and returns an unrounded value in `[0, 100]` plus the
//! feedback lines it wants to surface.

use std::collections::HashSet;
use vibebuff_core::model::{StackEdge, StackNode};

pub const DEPLOYMENT_CATEGORY: &str = "deployment";

/// Essential categories and the hint shown when one is missing.
pub const ESSENTIAL_CATEGORIES: [(&str, &str); 3] = [
    ("frontend", "Consider adding a frontend framework"),
    ("backend", "Consider adding a backend solution"),
    ("database", "Consider adding a database"),
];

pub const SCALABLE_DATABASES: &[&str] = &[
    "Supabase",
    "Firebase",
    "MongoDB",
    "PostgreSQL",
    "Convex",
    "PlanetScale",
];
pub const SCALABLE_DATABASE_CATEGORIES: &[&str] = &["database", "backend"];

pub const CLOUD_DEPLOYMENTS: &[&str] = &[
    "Vercel", "AWS", "GCP", "Azure", "Railway", "Fly.io", "Render",
];

pub const OPEN_SOURCE_TOOLS: &[&str] = &[
    "React",
    "Next.js",
    "Vue",
    "Svelte",
    "Node.js",
    "Express",
    "PostgreSQL",
    "MongoDB",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DimensionScore {
    pub value: f64,
    pub feedback: Vec<String>,
}

pub fn completeness(nodes: &[StackNode]) -> DimensionScore {
    let categories: HashSet<&str> = nodes.iter().map(|n| n.category.as_str()).collect();
    let mut feedback = Vec::new();

    let mut present = 0usize;
    for (category, hint) in ESSENTIAL_CATEGORIES {
        if categories.contains(category) {
            present += 1;
        } else {
            feedback.push(hint.to_string());
        }
    }
    if !categories.contains(DEPLOYMENT_CATEGORY) {
        feedback.push("Add a deployment platform for production".to_string());
    }

    let essential_term = present as f64 * 60.0 / ESSENTIAL_CATEGORIES.len() as f64;
    let value = (essential_term + nodes.len() as f64 * 5.0).min(100.0);

    DimensionScore { value, feedback }
}

/// Only edges whose endpoints both exist in `nodes` are counted.
pub fn coherence(nodes: &[StackNode], edges: &[StackEdge]) -> DimensionScore {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let edge_count = edges
        .iter()
        .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
        .count();

    let ratio = if nodes.len() > 1 {
        edge_count as f64 / (nodes.len() - 1) as f64
    } else {
        0.0
    };
    let base = if edge_count > 0 { 30.0 } else { 0.0 };
    let value = (ratio * 50.0 + base).min(100.0);

    let mut feedback = Vec::new();
    if edge_count == 0 && nodes.len() > 1 {
        feedback.push("Connect your tools to show data flow".to_string());
    }

    DimensionScore { value, feedback }
}

pub fn scalability(nodes: &[StackNode]) -> DimensionScore {
    let has_scalable_db = nodes.iter().any(|n| {
        SCALABLE_DATABASE_CATEGORIES.contains(&n.category.as_str())
            && label_mentions(&n.label, SCALABLE_DATABASES)
    });
    let has_cloud_deployment = nodes.iter().any(|n| {
        n.category == DEPLOYMENT_CATEGORY && label_mentions(&n.label, CLOUD_DEPLOYMENTS)
    });

    let mut feedback = Vec::new();
    if !has_scalable_db {
        feedback.push("Consider a scalable database solution".to_string());
    }
    if !has_cloud_deployment {
        feedback.push("Add cloud deployment for scalability".to_string());
    }

    let value = if has_scalable_db { 50.0 } else { 20.0 }
        + if has_cloud_deployment { 50.0 } else { 20.0 };

    DimensionScore { value, feedback }
}

/// `sprawl_threshold`: node counts above this trigger the cost warning.
pub fn cost_efficiency(nodes: &[StackNode], sprawl_threshold: usize) -> DimensionScore {
    let open_source = nodes
        .iter()
        .filter(|n| label_mentions(&n.label, OPEN_SOURCE_TOOLS))
        .count();
    let value = (40.0 + open_source as f64 / nodes.len().max(1) as f64 * 60.0).min(100.0);

    let mut feedback = Vec::new();
    if nodes.len() > sprawl_threshold {
        feedback.push("Consider simplifying - fewer tools can mean lower costs".to_string());
    }

    DimensionScore { value, feedback }
}

/// Case-insensitive substring match against any keyword.
fn label_mentions(label: &str, keywords: &[&str]) -> bool {
    let label = label.to_lowercase();
    keywords
        .iter()
        .any(|keyword| label.contains(&keyword.to_lowercase()))
}
