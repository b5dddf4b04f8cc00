/// Coarse confidence band shown next to the model's percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::Low => write!(f, "LOW"),
            ConfidenceLevel::Medium => write!(f, "MEDIUM"),
            ConfidenceLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Totals from comparing the fix branch against its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffStats {
    pub files: usize,
    pub additions: usize,
    pub deletions: usize,
}

/// Everything the success comment shows.
#[derive(Debug, Clone)]
pub struct FixReport {
    pub branch: String,
    /// Branch the fix was cut from
    pub base: String,
    pub commit: String,
    pub summary: String,
    /// `(filename, description)` per applied change
    pub changes: Vec<(String, String)>,
    pub stats: Option<DiffStats>,
    /// Link to open a pull request from the fix branch
    pub compare_url: Option<String>,
}
