use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::github::types::{PullRequest, Repository, User};

/// Event kinds named by the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PullRequestReviewComment,
    IssueComment,
    Ping,
    Other(String),
}

impl EventKind {
    pub fn from_header(value: &str) -> Self {
        match value.trim() {
            "pull_request_review_comment" => EventKind::PullRequestReviewComment,
            "issue_comment" => EventKind::IssueComment,
            "ping" => EventKind::Ping,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Whether deliveries of this kind are handed to the fix pipeline.
    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            EventKind::PullRequestReviewComment | EventKind::IssueComment
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::PullRequestReviewComment => f.write_str("pull_request_review_comment"),
            EventKind::IssueComment => f.write_str("issue_comment"),
            EventKind::Ping => f.write_str("ping"),
            EventKind::Other(name) => f.write_str(name),
        }
    }
}

/// A verified webhook payload. Only the fields the pipeline reads are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub comment: Option<Comment>,
    /// Present on review-comment deliveries.
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    /// Present on issue-comment deliveries; PR conversations carry a link.
    #[serde(default)]
    pub issue: Option<Issue>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    #[allow(dead_code)]
    pub sender: Option<User>,
}

impl InboundEvent {
    /// PR number the comment belongs to, from either delivery shape.
    pub fn pull_request_number(&self) -> Option<u64> {
        if let Some(pr) = &self.pull_request {
            return Some(pr.number);
        }
        self.issue
            .as_ref()
            .filter(|issue| issue.pull_request.is_some())
            .map(|issue| issue.number)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    pub user: User,
    #[serde(default)]
    #[allow(dead_code)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[allow(dead_code)]
    pub updated_at: Option<DateTime<Utc>>,
    /// File a review comment is anchored to
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestLink {
    #[serde(default)]
    #[allow(dead_code)] // Only its presence marks an issue as a PR
    pub url: Option<String>,
}
