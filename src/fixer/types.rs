/// A full-file replacement proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedChange {
    /// Path relative to the repository root
    pub filename: String,
    /// Complete new file content (not a patch)
    pub content: String,
    /// Line the change is centred on, if the model gave one
    #[allow(dead_code)]
    pub line_number: Option<u64>,
    pub description: String,
}

/// The engine's decision for one comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub should_apply: bool,
    /// Always empty when `should_apply` is false.
    pub changes: Vec<ProposedChange>,
    pub reasoning: String,
    /// In `[0, 1]`
    pub confidence: f64,
}

impl Verdict {
    /// The conservative "do not apply" verdict used whenever the model cannot be
    /// trusted or reached.
    pub fn declined(reasoning: impl Into<String>) -> Self {
        Self {
            should_apply: false,
            changes: Vec::new(),
            reasoning: reasoning.into(),
            confidence: 0.0,
        }
    }

    /// Confidence as a whole percentage for display.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Why a model reply was rejected: the offending field path plus the raw reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("AI response rejected at `{field}`: {reason}")]
pub struct ParseFailure {
    pub field: String,
    pub reason: String,
    #[allow(dead_code)]
    pub raw: String,
}

/// Text of one changed file as handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum FileText {
    Text(String),
    /// The PR deletes the file
    Removed,
    /// The fetch failed; the reason is logged, not shown to the model
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    pub filename: String,
    pub text: FileText,
}
