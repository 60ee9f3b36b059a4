//! Context window manager: builds the bounded prompt for one turn.
//!
//! Sections, in fixed order:
//!
//! | Section | Source | Trim strategy |
//! |---------|--------|---------------|
//! | System | Persona / configured prompt | Never trimmed |
//! | Summary | `ChatSession.context_summary` | Never trimmed |
//! | History | Recent messages, verbatim | Window cut, then oldest dropped |
//! | Excerpts | Retrieval results | Lowest score dropped, after history |
//! | User message | Current turn | Never trimmed |
//!
//! # Determinism
//!
//! Identical inputs always produce identical output. No random or
//! time-dependent logic is used during assembly.

use inkwell_config::ChatConfig;
use inkwell_core::{ChatMessage, PromptMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::token;
use crate::retrieval::Excerpt;

pub const SUMMARY_HEADER: &str = "[Conversation Summary]";
pub const EXCERPTS_HEADER: &str = "[Journal Excerpts]";

/// Inputs for one prompt assembly.
#[derive(Debug, Clone, Copy)]
pub struct WindowInput<'a> {
    pub system_prompt: &'a str,
    pub summary: Option<&'a str>,
    /// Messages not yet covered by the summary, oldest first.
    pub history: &'a [ChatMessage],
    /// Ranked excerpts, best first.
    pub excerpts: &'a [Excerpt],
    pub user_message: &'a str,
}

/// The assembled prompt, ready for an LLM call.
#[derive(Debug, Clone)]
pub struct PromptAssembly {
    pub messages: Vec<PromptMessage>,
    /// Excerpts that survived budget enforcement, in rank order.
    pub included_excerpts: Vec<Excerpt>,
    /// Number of verbatim history messages in the prompt.
    pub history_included: usize,
    pub metadata: AssemblyMetadata,
}

impl PromptAssembly {
    /// Canonical text rendering, used for comparisons and debugging.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("<{}>\n{}\n</{}>", m.role.as_str(), m.content, m.role.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Detailed metadata about the assembly process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub total_tokens: usize,
    pub budget: usize,
    /// Budget utilization percentage.
    pub utilization_pct: f32,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
    /// System prompt, summary, and user message alone exceed the budget.
    pub over_budget: bool,
}

/// Statistics for a single prompt section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Items removed from a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// Stateless. Create one per config snapshot and reuse it.
#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    budget: usize,
    /// `None` when windowing is disabled.
    window: Option<usize>,
}

impl ContextWindowManager {
    pub fn new(config: &ChatConfig) -> Self {
        let window = config
            .use_context_windowing
            .then(|| config.context_window_size.min(config.max_history));
        Self {
            budget: config.max_context_tokens,
            window,
        }
    }

    /// Index of the first message kept verbatim; everything before it is
    /// windowed out.
    pub fn window_start(&self, history_len: usize) -> usize {
        match self.window {
            Some(size) => history_len.saturating_sub(size),
            None => 0,
        }
    }

    /// Assemble the prompt.
    ///
    /// # Algorithm
    ///
    /// 1. Cut history to the window (when windowing is enabled)
    /// 2. Reserve system prompt, summary, and user message
    /// 3. While over budget, drop the oldest verbatim message
    /// 4. While still over budget, drop the lowest-scoring excerpt
    /// 5. Flag `over_budget` if the reserved sections alone do not fit
    pub fn build_prompt(&self, input: &WindowInput<'_>) -> PromptAssembly {
        let mut stats: Vec<LayerStats> = Vec::new();
        let mut drops: Vec<DropInfo> = Vec::new();

        // ── Reserved sections ─────────────────────────────────────────────
        let system = PromptMessage::system(input.system_prompt);
        let system_tokens = token::estimate_prompt_tokens(&system);

        let summary = input
            .summary
            .filter(|s| !s.trim().is_empty())
            .map(|s| PromptMessage::system(format!("{SUMMARY_HEADER}\n{s}")));
        let summary_tokens = summary.as_ref().map_or(0, token::estimate_prompt_tokens);

        let user = PromptMessage::user(input.user_message);
        let user_tokens = token::estimate_prompt_tokens(&user);

        let reserved = system_tokens + summary_tokens + user_tokens;

        // ── Window cut ────────────────────────────────────────────────────
        let start = self.window_start(input.history.len());
        if start > 0 {
            drops.push(DropInfo {
                layer: "history".into(),
                items_dropped: start,
                tokens_dropped: token::estimate_messages_tokens(&input.history[..start]),
                reason: "Outside context window".into(),
            });
        }
        let windowed = &input.history[start..];
        let history_costs: Vec<usize> = windowed
            .iter()
            .map(token::estimate_message_tokens)
            .collect();

        // ── Budget enforcement ────────────────────────────────────────────
        let mut kept: Vec<&Excerpt> = input.excerpts.iter().collect();
        let mut first_kept = 0;
        let mut history_tokens: usize = history_costs.iter().sum();
        let mut excerpt_tokens = excerpt_block_tokens(&kept);

        while reserved + history_tokens + excerpt_tokens > self.budget && first_kept < windowed.len()
        {
            history_tokens -= history_costs[first_kept];
            first_kept += 1;
        }
        if first_kept > 0 {
            drops.push(DropInfo {
                layer: "history".into(),
                items_dropped: first_kept,
                tokens_dropped: history_costs[..first_kept].iter().sum(),
                reason: "Oldest messages dropped for token budget".into(),
            });
        }

        let mut excerpts_dropped = 0;
        let mut excerpt_tokens_dropped = 0;
        while reserved + history_tokens + excerpt_tokens > self.budget && !kept.is_empty() {
            let before = excerpt_tokens;
            kept.remove(lowest_scoring(&kept));
            excerpt_tokens = excerpt_block_tokens(&kept);
            excerpts_dropped += 1;
            excerpt_tokens_dropped += before.saturating_sub(excerpt_tokens);
        }
        if excerpts_dropped > 0 {
            drops.push(DropInfo {
                layer: "excerpts".into(),
                items_dropped: excerpts_dropped,
                tokens_dropped: excerpt_tokens_dropped,
                reason: "Lowest-scoring excerpts dropped for token budget".into(),
            });
        }

        let total_tokens = reserved + history_tokens + excerpt_tokens;
        let over_budget = total_tokens > self.budget;
        if over_budget {
            warn!(
                reserved,
                budget = self.budget,
                "System prompt, summary and user message exceed the context budget"
            );
        }

        // ── Assemble messages in fixed order ──────────────────────────────
        let mut messages = Vec::with_capacity(windowed.len() + 4);
        messages.push(system);
        stats.push(layer("system", system_tokens, 1, 1));

        let has_summary = summary.is_some();
        if let Some(summary) = summary {
            messages.push(summary);
        }
        stats.push(layer(
            "summary",
            summary_tokens,
            usize::from(has_summary),
            usize::from(has_summary),
        ));

        let verbatim = &windowed[first_kept..];
        messages.extend(verbatim.iter().map(|m| PromptMessage {
            role: m.role,
            content: m.content.clone(),
        }));
        stats.push(layer(
            "history",
            history_tokens,
            verbatim.len(),
            input.history.len(),
        ));

        let included_excerpts: Vec<Excerpt> = kept.iter().map(|e| (*e).clone()).collect();
        if let Some(block) = render_excerpts(&kept) {
            messages.push(PromptMessage::system(block));
        }
        stats.push(layer(
            "excerpts",
            excerpt_tokens,
            included_excerpts.len(),
            input.excerpts.len(),
        ));

        messages.push(user);
        stats.push(layer("user_message", user_tokens, 1, 1));

        let utilization_pct = if self.budget == 0 {
            0.0
        } else {
            (total_tokens as f32 / self.budget as f32) * 100.0
        };

        debug!(
            total_tokens,
            budget = self.budget,
            history = verbatim.len(),
            excerpts = included_excerpts.len(),
            "Prompt assembled"
        );

        PromptAssembly {
            messages,
            included_excerpts,
            history_included: verbatim.len(),
            metadata: AssemblyMetadata {
                total_tokens,
                budget: self.budget,
                utilization_pct,
                per_layer: stats,
                drops,
                over_budget,
            },
        }
    }
}

fn layer(name: &str, tokens: usize, items_included: usize, items_total: usize) -> LayerStats {
    LayerStats {
        name: name.into(),
        tokens,
        items_included,
        items_total,
    }
}

/// Position of the excerpt to drop next: lowest score, later rank on ties.
fn lowest_scoring(excerpts: &[&Excerpt]) -> usize {
    let mut worst = 0;
    for (i, e) in excerpts.iter().enumerate() {
        if e.score <= excerpts[worst].score {
            worst = i;
        }
    }
    worst
}

/// One excerpt line: `[Entry <id> | chunk <n> | score 0.87] <title>: <text>`.
pub fn excerpt_line(excerpt: &Excerpt) -> String {
    let chunk = excerpt
        .chunk_index
        .map(|n| format!(" | chunk {n}"))
        .unwrap_or_default();
    format!(
        "[Entry {}{} | score {:.2}] {}: {}",
        excerpt.entry_id, chunk, excerpt.score, excerpt.entry_title, excerpt.text
    )
}

fn render_excerpts(excerpts: &[&Excerpt]) -> Option<String> {
    if excerpts.is_empty() {
        return None;
    }
    let lines: Vec<String> = excerpts.iter().map(|e| excerpt_line(e)).collect();
    Some(format!("{EXCERPTS_HEADER}\n{}", lines.join("\n")))
}

fn excerpt_block_tokens(excerpts: &[&Excerpt]) -> usize {
    render_excerpts(excerpts).map_or(0, |block| {
        token::MESSAGE_OVERHEAD + token::estimate_tokens(&block)
    })
}
