//! Local working copies of target repositories.
//!
//! One checkout per `{owner}/{repo}` lives under the workspace root and is reused
//! across pipeline runs. All access goes through a [`RepoLease`], which holds that
//! repository's lock until dropped, so two runs never touch the same checkout at
//! once.

pub mod git;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument};

use crate::fixer::ProposedChange;
use crate::github::diff::parse_diff;
use crate::github::types::DiffFile;
use git::Git;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("No changes to commit: the proposed content is identical to the existing files")]
    NoChanges,

    #[error("`{command}` exited with status {code}: {stderr}")]
    Git {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Refusing to write outside the working copy: {0}")]
    InvalidPath(String),

    #[error("Working copy I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read working copy diff: {0}")]
    #[allow(dead_code)]
    Diff(String),
}

impl WorkspaceError {
    /// Stable class name for user-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::NoChanges => "NoChangesError",
            WorkspaceError::Git { .. } | WorkspaceError::Diff(_) => "GitOperationError",
            WorkspaceError::Timeout { .. } => "TimeoutError",
            WorkspaceError::InvalidPath(_) => "InvalidPathError",
            WorkspaceError::Io(_) => "IoError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    /// `https://github.com` style host, or a local directory of bare repositories
    pub clone_base: String,
    pub token: String,
    pub author_name: String,
    pub author_email: String,
    pub git_timeout: Duration,
}

/// Hands out exclusive leases on per-repository working copies.
pub struct WorkingCopyManager {
    settings: WorkspaceSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkingCopyManager {
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self {
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to the working copy of `owner/repo`.
    #[instrument(skip(self))]
    pub async fn lease(&self, owner: &str, repo: &str) -> Result<RepoLease, WorkspaceError> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        let key = format!("{owner}/{repo}");
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        debug!(%key, "working copy lease acquired");

        Ok(RepoLease {
            _guard: guard,
            copy: WorkingCopy {
                path: self.settings.root.join(owner).join(repo),
                remote_url: self.remote_url(owner, repo),
                git: Git::new(self.settings.git_timeout, &self.settings.token),
                author_name: self.settings.author_name.clone(),
                author_email: self.settings.author_email.clone(),
            },
        })
    }

    /// Clone URL with the bot credentials embedded for HTTPS hosts.
    pub fn remote_url(&self, owner: &str, repo: &str) -> String {
        let base = self.settings.clone_base.trim_end_matches('/');
        for scheme in ["https://", "http://"] {
            if let Some(host) = base.strip_prefix(scheme) {
                return format!(
                    "{scheme}x-access-token:{}@{host}/{owner}/{repo}.git",
                    self.settings.token
                );
            }
        }
        format!("{base}/{owner}/{repo}.git")
    }
}

fn validate_segment(segment: &str) -> Result<(), WorkspaceError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(WorkspaceError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

/// Exclusive access to one working copy; the lock is released on drop.
pub struct RepoLease {
    _guard: OwnedMutexGuard<()>,
    copy: WorkingCopy,
}

impl std::ops::Deref for RepoLease {
    type Target = WorkingCopy;

    fn deref(&self) -> &WorkingCopy {
        &self.copy
    }
}

/// A local checkout. Only reachable through a [`RepoLease`].
pub struct WorkingCopy {
    path: PathBuf,
    remote_url: String,
    git: Git,
    author_name: String,
    author_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct LogEntry {
    pub sha: String,
    pub subject: String,
}

impl WorkingCopy {
    /// Clone when absent, otherwise fetch; configure the author; discard any
    /// leftovers from earlier runs; check out `base_branch`.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn ensure_repository(&self, base_branch: &str) -> Result<(), WorkspaceError> {
        if self.path.join(".git").is_dir() {
            self.git(&["remote", "set-url", "origin", &self.remote_url]).await?;
            self.git(&["fetch", "origin", "--prune"]).await?;
        } else {
            if self.path.exists() {
                tokio::fs::remove_dir_all(&self.path).await?;
            }
            let parent = self.path.parent().unwrap_or(Path::new("."));
            tokio::fs::create_dir_all(parent).await?;
            let target = self.path.to_string_lossy().to_string();
            info!("cloning repository");
            self.git
                .run(parent, &["clone", &self.remote_url, &target])
                .await?;
        }

        self.git(&["config", "user.name", &self.author_name]).await?;
        self.git(&["config", "user.email", &self.author_email]).await?;

        if self.has_head().await? {
            // uncommitted or unpushed work from an interrupted run
            self.git(&["reset", "--hard"]).await?;
        }
        self.git(&["clean", "-fd"]).await?;

        // leave whatever branch an earlier run was on before touching the base
        let anchor = self.origin_default().await?;
        if let Some(anchor) = anchor {
            self.git(&["checkout", "--detach", anchor]).await?;
            self.prune_fix_branches().await?;
        }

        self.checkout_base(base_branch, anchor).await
    }

    /// Create `fix/pr-<n>-<millis>` from a freshly updated base branch.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn create_fix_branch(
        &self,
        base_branch: &str,
        pr_number: u64,
    ) -> Result<String, WorkspaceError> {
        self.git(&["fetch", "origin", "--prune"]).await?;
        let anchor = self.origin_default().await?;
        self.checkout_base(base_branch, anchor).await?;

        let millis = chrono::Utc::now().timestamp_millis();
        let branch = fix_branch_name(pr_number, millis, base_branch);
        self.git(&["checkout", "-b", &branch]).await?;
        info!(%branch, "created fix branch");
        Ok(branch)
    }

    /// Overwrite each target file with its proposed content.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub async fn apply_changes(&self, changes: &[ProposedChange]) -> Result<(), WorkspaceError> {
        // validate everything before touching the disk
        let targets = changes
            .iter()
            .map(|c| safe_join(&self.path, &c.filename))
            .collect::<Result<Vec<_>, _>>()?;
        for change in changes {
            reject_symlinks(&self.path, &change.filename).await?;
        }

        for (change, target) in changes.iter().zip(targets) {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &change.content).await?;
            debug!(file = %change.filename, bytes = change.content.len(), "wrote file");
        }
        Ok(())
    }

    /// Stage exactly the changed files and commit them.
    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    pub async fn commit(
        &self,
        pr_number: u64,
        comment_id: u64,
        changes: &[ProposedChange],
    ) -> Result<String, WorkspaceError> {
        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(changes.iter().map(|c| c.filename.as_str()));
        self.git(&add).await?;

        let staged = self.git(&["diff", "--cached", "--name-only"]).await?;
        if staged.trim().is_empty() {
            return Err(WorkspaceError::NoChanges);
        }

        let message = commit_message(pr_number, comment_id, changes);
        self.git(&["commit", "-m", &message]).await?;
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        info!(%sha, "committed fix");
        Ok(sha)
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn push(&self, branch: &str) -> Result<(), WorkspaceError> {
        self.git(&["push", "--set-upstream", "origin", branch]).await?;
        info!(%branch, "pushed fix branch");
        Ok(())
    }

    /// Check out `base_branch` at its origin tip. A branch origin does not have is
    /// (re)started from `anchor`, so it never inherits local commits.
    async fn checkout_base(
        &self,
        base_branch: &str,
        anchor: Option<&str>,
    ) -> Result<(), WorkspaceError> {
        let remote_ref = format!("refs/remotes/origin/{base_branch}");
        if self.verify(&remote_ref).await? {
            let upstream = format!("origin/{base_branch}");
            self.git(&["checkout", "-B", base_branch, &upstream]).await?;
            return Ok(());
        }

        debug!(%base_branch, "base branch missing on origin, creating it locally");
        match anchor {
            Some(anchor) => {
                self.git(&["checkout", "-B", base_branch, anchor]).await?;
            }
            // empty remote: nothing to anchor to
            None if self.verify(&format!("refs/heads/{base_branch}")).await? => {
                self.git(&["checkout", base_branch]).await?;
            }
            None => {
                self.git(&["checkout", "-b", base_branch]).await?;
            }
        }
        Ok(())
    }

    /// `origin/HEAD`, asking the remote for it when the clone did not record it.
    /// `None` only for a remote without any branch.
    async fn origin_default(&self) -> Result<Option<&'static str>, WorkspaceError> {
        const ORIGIN_HEAD: &str = "refs/remotes/origin/HEAD";
        if !self.verify(ORIGIN_HEAD).await? {
            // fails on an empty remote, which the second check reports
            self.git
                .succeeds(&self.path, &["remote", "set-head", "origin", "--auto"])
                .await?;
        }
        Ok(self.verify(ORIGIN_HEAD).await?.then_some(ORIGIN_HEAD))
    }

    /// Delete local `fix/*` branches; pushed ones live on at origin. HEAD must
    /// be detached.
    async fn prune_fix_branches(&self) -> Result<(), WorkspaceError> {
        let branches = self
            .git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/fix/"])
            .await?;
        for branch in branches.lines().map(str::trim).filter(|b| !b.is_empty()) {
            self.git(&["branch", "-D", branch]).await?;
            debug!(%branch, "deleted stale fix branch");
        }
        Ok(())
    }

    async fn has_head(&self) -> Result<bool, WorkspaceError> {
        self.verify("HEAD").await
    }

    async fn verify(&self, reference: &str) -> Result<bool, WorkspaceError> {
        self.git
            .succeeds(&self.path, &["rev-parse", "--verify", "--quiet", reference])
            .await
    }

    async fn git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        self.git.run(&self.path, args).await
    }
}

/// Read-only inspection of a checkout, for operators and tests; the pipeline
/// itself only writes.
#[allow(dead_code)]
impl WorkingCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), WorkspaceError> {
        self.git(&["checkout", branch]).await.map(|_| ())
    }

    pub async fn current_branch(&self) -> Result<String, WorkspaceError> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// `git status --porcelain` lines.
    pub async fn status(&self) -> Result<Vec<String>, WorkspaceError> {
        let out = self.git(&["status", "--porcelain"]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub async fn is_clean(&self) -> Result<bool, WorkspaceError> {
        Ok(self.status().await?.is_empty())
    }

    /// Uncommitted changes to tracked files, relative to HEAD.
    pub async fn diff(&self) -> Result<Vec<DiffFile>, WorkspaceError> {
        let text = self.git(&["diff", "HEAD"]).await?;
        parse_diff(&text).map_err(|e| WorkspaceError::Diff(e.to_string()))
    }

    pub async fn log(&self, limit: usize) -> Result<Vec<LogEntry>, WorkspaceError> {
        let count = limit.to_string();
        let out = self
            .git(&["log", "-n", &count, "--format=%H%x1f%s"])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\u{1f}'))
            .map(|(sha, subject)| LogEntry {
                sha: sha.to_string(),
                subject: subject.to_string(),
            })
            .collect())
    }
}

/// `fix/pr-<n>-<millis>`; bumps the timestamp in the absurd case that the result
/// equals the base branch.
pub fn fix_branch_name(pr_number: u64, millis: i64, base_branch: &str) -> String {
    let name = format!("fix/pr-{pr_number}-{millis}");
    if name == base_branch {
        format!("fix/pr-{pr_number}-{}", millis + 1)
    } else {
        name
    }
}

pub fn commit_message(pr_number: u64, comment_id: u64, changes: &[ProposedChange]) -> String {
    let mut message = format!(
        "fix: apply automated fix for PR #{pr_number}\n\nRequested in comment {comment_id}.\n\nChanges:\n"
    );
    for change in changes {
        message.push_str(&format!("- {}: {}\n", change.filename, change.description));
    }
    message
}

/// Resolve `relative` under `root`, rejecting anything that could escape it.
fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let candidate = Path::new(relative);
    let mut parts = 0;
    for component in candidate.components() {
        match component {
            Component::Normal(part) if part == ".git" => {
                return Err(WorkspaceError::InvalidPath(relative.to_string()))
            }
            Component::Normal(_) => parts += 1,
            Component::CurDir => {}
            _ => return Err(WorkspaceError::InvalidPath(relative.to_string())),
        }
    }
    if parts == 0 {
        return Err(WorkspaceError::InvalidPath(relative.to_string()));
    }
    Ok(root.join(candidate))
}

/// Refuse to write through a symlink: each existing prefix of `relative`
/// under `root`, the file itself included, must be a real directory or file.
async fn reject_symlinks(root: &Path, relative: &str) -> Result<(), WorkspaceError> {
    let mut current = root.to_path_buf();
    for component in Path::new(relative).components() {
        current.push(component);
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(WorkspaceError::InvalidPath(relative.to_string()))
            }
            Ok(_) => {}
            // nothing below a missing entry can be a link yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
