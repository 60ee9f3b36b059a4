//! Summarization trigger: decides when older turns get compressed into the
//! session's rolling summary, and produces that summary.
//!
//! The trigger looks at the history a turn's prompt was built from. Messages
//! older than the verbatim window that the current summary does not cover
//! yet are the *windowed-out portion*. A pass runs when the history holds at
//! least `min_messages_for_summary` messages and the windowed-out portion is
//! estimated at `conversation_summary_threshold` tokens or more.

use inkwell_config::{ChatConfig, LlmConfig};
use inkwell_core::error::ChatError;
use inkwell_core::{ChatMessage, ChatSession, PromptMessage, Provider, ProviderRequest, Role};
use tracing::{debug, info};

use crate::context::token;
use crate::retry::RetryPolicy;

/// Messages selected for one summarization pass.
#[derive(Debug, Clone)]
pub struct SummaryPlan {
    /// The windowed-out messages not yet covered, oldest first.
    pub messages: Vec<ChatMessage>,
    /// New value for `ChatSession.summarized_message_count` on success.
    pub covers_through: usize,
    pub dropped_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct SummarizationTrigger {
    window: usize,
    min_messages: usize,
    threshold: usize,
    prompt: String,
}

impl SummarizationTrigger {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            window: config.context_window_size.min(config.max_history),
            min_messages: config.min_messages_for_summary,
            threshold: config.conversation_summary_threshold,
            prompt: config.summary_prompt.clone(),
        }
    }

    /// The pass to run for `history`, if the trigger fires.
    pub fn plan(&self, session: &ChatSession, history: &[ChatMessage]) -> Option<SummaryPlan> {
        if history.len() < self.min_messages {
            return None;
        }

        let covered = session.summarized_prefix(history.len());
        let cut = history.len().saturating_sub(self.window);
        if cut <= covered {
            return None;
        }

        let pending = &history[covered..cut];
        let dropped_tokens = token::estimate_messages_tokens(pending);
        if dropped_tokens < self.threshold {
            debug!(
                dropped_tokens,
                threshold = self.threshold,
                "Windowed-out history below summary threshold"
            );
            return None;
        }

        Some(SummaryPlan {
            messages: pending.to_vec(),
            covers_through: cut,
            dropped_tokens,
        })
    }

    pub fn should_summarize(&self, session: &ChatSession, history: &[ChatMessage]) -> bool {
        self.plan(session, history).is_some()
    }

    /// Non-streaming request that folds the prior summary and the pending
    /// transcript into one replacement summary.
    pub fn request(
        &self,
        plan: &SummaryPlan,
        prior_summary: Option<&str>,
        llm: &LlmConfig,
    ) -> ProviderRequest {
        let mut body = self.prompt.clone();
        if let Some(prior) = prior_summary.filter(|s| !s.trim().is_empty()) {
            body.push_str("\n\nPrevious summary:\n");
            body.push_str(prior);
        }
        body.push_str("\n\nConversation:\n");
        for message in &plan.messages {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            body.push_str(&format!("{speaker}: {}\n", message.content));
        }

        ProviderRequest {
            model: llm.analysis_model().to_string(),
            messages: vec![PromptMessage::user(body.trim_end())],
            temperature: llm.temperature,
            max_tokens: Some(llm.max_tokens),
            stream: false,
        }
    }

    /// Ask the LLM for a replacement summary.
    pub async fn summarize(
        &self,
        provider: &dyn Provider,
        plan: &SummaryPlan,
        prior_summary: Option<&str>,
        llm: &LlmConfig,
    ) -> Result<String, ChatError> {
        let request = self.request(plan, prior_summary, llm);
        let response = RetryPolicy::from_config(llm)
            .run("summarize", || provider.complete(request.clone()))
            .await
            .map_err(|e| ChatError::SummarizationFailed(e.to_string()))?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(ChatError::SummarizationFailed(
                "model returned an empty summary".into(),
            ));
        }

        info!(
            messages = plan.messages.len(),
            covers_through = plan.covers_through,
            "Conversation summarized"
        );
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use inkwell_core::error::ProviderError;

    fn history(pairs: usize, words: usize) -> Vec<ChatMessage> {
        let text = vec!["word"; words].join(" ");
        (0..pairs)
            .flat_map(|i| {
                [
                    ChatMessage::user("chat-1", format!("q{} {text}", i + 1)),
                    ChatMessage::assistant("chat-1", format!("a{} {text}", i + 1)),
                ]
            })
            .collect()
    }

    fn trigger(window: usize, min_messages: usize, threshold: usize) -> SummarizationTrigger {
        SummarizationTrigger::new(&ChatConfig {
            context_window_size: window,
            min_messages_for_summary: min_messages,
            conversation_summary_threshold: threshold,
            ..ChatConfig::default()
        })
    }

    fn llm() -> LlmConfig {
        LlmConfig {
            retry_delay: 0.0,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn compresses_everything_outside_the_window() {
        let hist = history(5, 1);
        let plan = trigger(2, 6, 1).plan(&ChatSession::new(), &hist).unwrap();

        assert_eq!(plan.messages.len(), 8);
        assert_eq!(plan.messages[0].content, "q1 word");
        assert_eq!(plan.messages[7].content, "a4 word");
        assert_eq!(plan.covers_through, 8);
    }

    #[test]
    fn requires_minimum_message_count() {
        let hist = history(2, 50);
        let t = trigger(2, 6, 1);
        assert!(!t.should_summarize(&ChatSession::new(), &hist));
        assert!(t.should_summarize(&ChatSession::new(), &history(3, 50)));
    }

    #[test]
    fn fires_exactly_at_token_threshold() {
        let hist = history(5, 1);
        // "q1 word" is 7 chars: 2 + 4 overhead = 6 tokens per message
        let dropped: usize = token::estimate_messages_tokens(&hist[..8]);
        assert_eq!(dropped, 48);

        assert!(trigger(2, 6, dropped).should_summarize(&ChatSession::new(), &hist));
        assert!(!trigger(2, 6, dropped + 1).should_summarize(&ChatSession::new(), &hist));
    }

    #[test]
    fn skips_messages_already_covered() {
        let hist = history(5, 1);
        let mut session = ChatSession::new();
        session.context_summary = Some("earlier".into());
        session.summarized_message_count = 8;
        let t = trigger(2, 6, 1);
        assert!(t.plan(&session, &hist).is_none());

        let longer = history(6, 1);
        let plan = t.plan(&session, &longer).unwrap();
        assert_eq!(plan.messages.len(), 2);
        assert_eq!(plan.messages[0].content, "q5 word");
        assert_eq!(plan.covers_through, 10);
    }

    #[test]
    fn count_without_summary_is_ignored() {
        let hist = history(5, 1);
        let mut session = ChatSession::new();
        session.summarized_message_count = 8;
        assert_eq!(trigger(2, 6, 1).plan(&session, &hist).unwrap().messages.len(), 8);
    }

    #[test]
    fn request_carries_prior_summary_and_transcript() {
        let hist = history(5, 1);
        let t = trigger(2, 6, 1);
        let plan = t.plan(&ChatSession::new(), &hist).unwrap();
        let llm = LlmConfig {
            analysis_model: Some("qwen3:14b".into()),
            ..llm()
        };

        let request = t.request(&plan, Some("We discussed hiking."), &llm);
        assert_eq!(request.model, "qwen3:14b");
        assert!(!request.stream);
        let body = &request.messages[0].content;
        assert!(body.starts_with("Summarize the key points"));
        assert!(body.contains("Previous summary:\nWe discussed hiking."));
        assert!(body.contains("User: q1 word"));
        assert!(body.contains("Assistant: a4 word"));
        assert!(!body.contains("q5 word"));
    }

    #[tokio::test]
    async fn summarize_returns_trimmed_text() {
        let provider = ScriptedProvider::new();
        provider.push_summary(Ok("  The user reflected on work.  ".into()));
        let t = trigger(2, 6, 1);
        let plan = t.plan(&ChatSession::new(), &history(5, 1)).unwrap();

        let summary = t.summarize(&provider, &plan, None, &llm()).await.unwrap();
        assert_eq!(summary, "The user reflected on work.");
    }

    #[tokio::test]
    async fn summarize_failure_after_retries() {
        let provider = ScriptedProvider::new();
        for _ in 0..3 {
            provider.push_summary(Err(ProviderError::Network("down".into())));
        }
        let t = trigger(2, 6, 1);
        let plan = t.plan(&ChatSession::new(), &history(5, 1)).unwrap();

        let err = t.summarize(&provider, &plan, None, &llm()).await.unwrap_err();
        assert!(matches!(err, ChatError::SummarizationFailed(_)));
        assert_eq!(provider.requests().len(), 3);
    }
}
