use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynergyKind {
    Combo,
    Integration,
    Alternative,
    Conflict,
}

/// How well two tools work together. Negative scores mark overlap or conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSynergy {
    pub tool_a: String,
    pub tool_b: String,
    pub kind: SynergyKind,
    pub score: i32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus_effect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedSynergy {
    pub other_tool: String,
    pub synergy: ToolSynergy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeckSynergy {
    pub total_score: i32,
    pub synergies: Vec<ToolSynergy>,
}

/// Synergies keyed by the ordered `(tool_a, tool_b)` pair they were declared with.
#[derive(Debug, Clone, Default)]
pub struct SynergyTable {
    by_pair: HashMap<(String, String), ToolSynergy>,
}

impl SynergyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, synergy: ToolSynergy) {
        self.by_pair
            .insert((synergy.tool_a.clone(), synergy.tool_b.clone()), synergy);
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    /// Looks up `(a, b)` first, then `(b, a)`.
    pub fn between(&self, a: &str, b: &str) -> Option<&ToolSynergy> {
        self.by_pair
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.by_pair.get(&(b.to_string(), a.to_string())))
    }

    /// Every synergy involving `tool`, strongest first.
    pub fn for_tool(&self, tool: &str) -> Vec<RelatedSynergy> {
        let mut out: Vec<RelatedSynergy> = self
            .by_pair
            .values()
            .filter_map(|synergy| {
                let other = if synergy.tool_a == tool {
                    &synergy.tool_b
                } else if synergy.tool_b == tool {
                    &synergy.tool_a
                } else {
                    return None;
                };
                Some(RelatedSynergy {
                    other_tool: other.clone(),
                    synergy: synergy.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.synergy
                .score
                .cmp(&a.synergy.score)
                .then_with(|| a.other_tool.cmp(&b.other_tool))
        });
        out
    }

    /// Sums the synergy of every unordered pair in the deck. Decks with
    /// fewer than two tools score zero.
    pub fn deck_synergy<S: AsRef<str>>(&self, tool_ids: &[S]) -> DeckSynergy {
        if tool_ids.len() < 2 {
            return DeckSynergy::default();
        }

        let mut deck = DeckSynergy::default();
        for (i, a) in tool_ids.iter().enumerate() {
            for b in &tool_ids[i + 1..] {
                if let Some(synergy) = self.between(a.as_ref(), b.as_ref()) {
                    deck.total_score += synergy.score;
                    deck.synergies.push(synergy.clone());
                }
            }
        }
        deck
    }

    /// Table preloaded with the well-known pairings, keyed by tool slug.
    pub fn seeded() -> Self {
        use SynergyKind::*;

        let seeds: [(&str, &str, SynergyKind, i32, &str, Option<&str>); 14] = [
            ("nextjs", "vercel", Integration, 95, "Native integration with zero-config deployment", Some("+100% Deploy Speed")),
            ("nextjs", "react", Combo, 90, "Next.js is built on React", Some("+50% DX")),
            ("supabase", "nextjs", Integration, 85, "Excellent SSR support and auth helpers", Some("+30% Auth Speed")),
            ("convex", "nextjs", Integration, 90, "First-class React hooks and SSR support", Some("+40% Realtime DX")),
            ("clerk", "nextjs", Integration, 95, "Official Next.js SDK with middleware", Some("+50% Auth Setup")),
            ("react", "svelte", Alternative, -20, "Different paradigms - choose one", None),
            ("cursor", "claude", Integration, 85, "Claude powers Cursor's AI features", Some("+30% AI Accuracy")),
            ("vscode", "github-copilot", Integration, 90, "Native extension support", Some("+25% Coding Speed")),
            ("bun", "nodejs", Alternative, 0, "Drop-in replacement - choose based on needs", None),
            ("supabase", "convex", Conflict, -50, "Both serve as backend - typically choose one", None),
            ("neon", "supabase", Alternative, -10, "Both offer Postgres - Supabase includes more", None),
            ("astro", "react", Combo, 80, "Use React components in Astro islands", Some("+20% Performance")),
            ("sveltekit", "svelte", Combo, 95, "SvelteKit is the official Svelte framework", Some("+40% DX")),
            ("nuxt", "vuejs", Combo, 95, "Nuxt is the official Vue meta-framework", Some("+40% DX")),
        ];

        let mut table = Self::new();
        for (tool_a, tool_b, kind, score, description, bonus) in seeds {
            table.insert(ToolSynergy {
                tool_a: tool_a.to_string(),
                tool_b: tool_b.to_string(),
                kind,
                score,
                description: description.to_string(),
                bonus_effect: bonus.map(str::to_string),
            });
        }
        table
    }
}
