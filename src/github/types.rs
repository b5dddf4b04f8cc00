use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitHub account as it appears in API payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub id: Option<u64>,
}

/// Repository identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

/// One side of a pull request (head or base).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    /// Originating repository; `None` when the fork has been deleted.
    #[serde(default)]
    pub repo: Option<Repository>,
}

/// Pull request metadata, shared by webhook payloads and the REST API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequest {
    /// PR number (e.g., 42)
    pub number: u64,
    pub title: String,
    /// PR description
    #[serde(default)]
    pub body: Option<String>,
    pub head: GitRef,
    pub base: GitRef,
    /// "open" or "closed"
    pub state: String,
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Change status of a file in a PR, as reported by the files endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
    Changed,
    Unchanged,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::Changed => "changed",
            FileStatus::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// A single entry of `GET /pulls/{n}/files`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileDiffEntry {
    pub filename: String,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
    /// Unified diff hunk text; absent for binary or very large files.
    #[serde(default)]
    pub patch: Option<String>,
}

/// A comment as returned after creation or update.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Condensed view of `GET /commits/{sha}`.
#[derive(Debug, Clone)]
#[allow(dead_code)] // Read by callers inspecting a pushed fix, not by the pipeline
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub authored_at: Option<DateTime<Utc>>,
    pub files: Vec<String>,
}

/// A single file within a unified diff.
#[derive(Debug, Clone)]
#[allow(dead_code)] // Structural fields populated by the parser; reports only sum the counts
pub struct DiffFile {
    /// File path (e.g., "src/auth/config.rs")
    pub path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub additions: usize,
    pub deletions: usize,
    /// Hunks (contiguous changed regions)
    pub hunks: Vec<Hunk>,
}

/// A contiguous region of changes within a file.
#[derive(Debug, Clone)]
#[allow(dead_code)] // Structural diff fields populated by parser, consumed as API grows
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Raw lines of the hunk (prefixed with +, -, or space)
    pub lines: Vec<String>,
}

/// Result of comparing two refs.
#[derive(Debug, Clone)]
pub struct Comparison {
    #[allow(dead_code)]
    pub base: String,
    #[allow(dead_code)]
    pub head: String,
    pub files: Vec<DiffFile>,
}

impl Comparison {
    pub fn additions(&self) -> usize {
        self.files.iter().map(|f| f.additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.files.iter().map(|f| f.deletions).sum()
    }
}
