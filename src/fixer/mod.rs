pub mod llm;
pub mod prompt;
pub mod types;
pub mod verdict;

pub use llm::{ChatModel, ChatRequest, LlmError, OpenAiClient};
pub use types::{FileSnapshot, FileText, ParseFailure, ProposedChange, Verdict};

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::github::{FileDiffEntry, PullRequest};
use crate::webhook::Comment;

pub const FALLBACK_SUMMARY: &str = "Applied the automated fix requested in the review comment.";
const SUMMARY_MAX_TOKENS: u32 = 300;
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Why the engine could not produce a trusted verdict.
#[derive(Debug, Error)]
pub enum DecisionFailure {
    #[error("AI service unavailable: {0}")]
    Service(#[from] LlmError),

    #[error(transparent)]
    Malformed(#[from] ParseFailure),
}

impl DecisionFailure {
    /// Stable class name for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DecisionFailure::Service(_) => "AIServiceError",
            DecisionFailure::Malformed(_) => "AIResponseMalformed",
        }
    }
}

/// Asks the model whether a comment describes a safe, unambiguous fix.
pub struct FixDecisionEngine {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    max_tokens: u32,
}

impl FixDecisionEngine {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model,
            temperature,
            max_tokens,
        }
    }

    /// Query the model and validate its reply, keeping the failure cause.
    #[instrument(skip_all, fields(pr = pr.number, comment = comment.id, files = files.len()))]
    pub async fn decide(
        &self,
        comment: &Comment,
        pr: &PullRequest,
        files: &[FileDiffEntry],
        snapshots: &[FileSnapshot],
    ) -> Result<Verdict, DecisionFailure> {
        let request = ChatRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            user: prompt::build_context(comment, pr, files, snapshots),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let reply = self.model.complete(&request).await?;
        debug!(reply_len = reply.len(), "model replied");
        let verdict = verdict::parse_verdict(&reply)?;
        debug!(
            should_apply = verdict.should_apply,
            confidence = verdict.confidence,
            changes = verdict.changes.len(),
            "verdict validated"
        );
        Ok(verdict)
    }

    /// Like [`decide`](Self::decide) but never fails: any failure becomes a
    /// declined verdict whose reasoning is the failure.
    pub async fn evaluate(
        &self,
        comment: &Comment,
        pr: &PullRequest,
        files: &[FileDiffEntry],
        snapshots: &[FileSnapshot],
    ) -> Verdict {
        match self.decide(comment, pr, files, snapshots).await {
            Ok(verdict) => verdict,
            Err(failure) => {
                warn!(kind = failure.kind(), error = %failure, "falling back to declined verdict");
                Verdict::declined(failure.to_string())
            }
        }
    }

    /// Best-effort one-paragraph summary of applied changes.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub async fn summarize(&self, changes: &[ProposedChange]) -> String {
        let request = ChatRequest {
            system: prompt::SUMMARY_PROMPT.to_string(),
            user: prompt::build_summary_request(changes),
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: SUMMARY_MAX_TOKENS,
        };
        match self.model.complete(&request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => FALLBACK_SUMMARY.to_string(),
            Err(e) => {
                debug!(error = %e, "summary unavailable, using fallback");
                FALLBACK_SUMMARY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_comment, sample_pr, ScriptedModel};

    fn engine(model: Arc<ScriptedModel>) -> FixDecisionEngine {
        FixDecisionEngine::new(model, 0.1, 4000)
    }

    #[tokio::test]
    async fn test_evaluate_parses_model_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            r#"{"shouldApply": true, "confidence": 0.9, "reasoning": "typo",
                "changes": [{"filename": "src/net.rs", "content": "receive", "description": "fix"}]}"#
                .to_string(),
        )]));
        let verdict = engine(model.clone())
            .evaluate(&sample_comment("fix typo"), &sample_pr(), &[], &[])
            .await;
        assert!(verdict.should_apply);
        assert_eq!(verdict.changes.len(), 1);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, prompt::SYSTEM_PROMPT);
        assert!(requests[0].user.contains("fix typo"));
        assert_eq!(requests[0].max_tokens, 4000);
    }

    #[tokio::test]
    async fn test_malformed_replies_become_safe_verdicts() {
        let replies = [
            "not json at all",
            "{\"shouldApply\": true",
            r#"{"shouldApply": true, "confidence": 2, "reasoning": "r", "changes": []}"#,
            r#"{"shouldApply": 1, "confidence": 0.5, "reasoning": "r", "changes": []}"#,
            r#"{"shouldApply": true, "confidence": 0.5, "reasoning": "r", "changes": [{"filename": "a"}]}"#,
            r#"{"confidence": 0.5, "reasoning": "r", "changes": []}"#,
        ];
        for reply in replies {
            let model = Arc::new(ScriptedModel::new(vec![Ok(reply.to_string())]));
            let verdict = engine(model)
                .evaluate(&sample_comment("x"), &sample_pr(), &[], &[])
                .await;
            assert!(!verdict.should_apply, "{reply}");
            assert!(verdict.changes.is_empty(), "{reply}");
            assert_eq!(verdict.confidence, 0.0);
            assert!(verdict.reasoning.contains("AI response rejected"));
        }
    }

    #[tokio::test]
    async fn test_service_failure_becomes_safe_verdict() {
        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::Status {
            status: 503,
            snippet: "overloaded".to_string(),
        })]));
        let engine = engine(model);
        let failure = engine
            .decide(&sample_comment("x"), &sample_pr(), &[], &[])
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), "AIServiceError");

        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::EmptyChoices)]));
        let verdict = FixDecisionEngine::new(model, 0.1, 100)
            .evaluate(&sample_comment("x"), &sample_pr(), &[], &[])
            .await;
        assert!(!verdict.should_apply);
        assert!(verdict.reasoning.contains("AI service unavailable"));
    }

    #[tokio::test]
    async fn test_summarize_falls_back() {
        let change = ProposedChange {
            filename: "a.rs".to_string(),
            content: String::new(),
            line_number: None,
            description: "fix".to_string(),
        };

        let model = Arc::new(ScriptedModel::new(vec![Ok("  Fixed a typo in a.rs.  ".to_string())]));
        assert_eq!(engine(model).summarize(&[change.clone()]).await, "Fixed a typo in a.rs.");

        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::EmptyChoices)]));
        assert_eq!(engine(model).summarize(&[change.clone()]).await, FALLBACK_SUMMARY);

        let model = Arc::new(ScriptedModel::new(vec![Ok("   ".to_string())]));
        assert_eq!(engine(model).summarize(&[change]).await, FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn test_evaluate_declines_when_service_times_out() {
        let base = crate::testing::slow_chat_server(std::time::Duration::from_secs(3)).await;
        let client = OpenAiClient::new(
            &base,
            "sk-test",
            "gpt-test",
            std::time::Duration::from_millis(100),
        )
        .unwrap();
        let engine = FixDecisionEngine::new(Arc::new(client), 0.1, 64);
        let verdict = engine
            .evaluate(&sample_comment("fix typo"), &sample_pr(), &[], &[])
            .await;
        assert!(!verdict.should_apply);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.changes.is_empty());
        assert!(verdict.reasoning.contains("AI service unavailable"));
    }
}
