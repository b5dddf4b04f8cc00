//! Comment-to-fix orchestration.
//!
//! One [`Orchestrator::handle`] call processes one verified delivery:
//! skip checks, context gathering, the model's verdict, the git sequence, and
//! exactly one result comment for every run that is not skipped.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::fixer::{FileSnapshot, FileText, FixDecisionEngine, ProposedChange};
use crate::github::{FileDiffEntry, FileStatus, PullRequest, RemoteError, RepositoryApi};
use crate::report::{self, DiffStats, FixReport};
use crate::webhook::{Comment, InboundEvent};
use crate::workspace::{WorkingCopyManager, WorkspaceError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Remote(_) => "RemoteError",
            PipelineError::Workspace(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Edits and deletions are ignored
    Action(String),
    NoComment,
    NoPullRequest,
    OwnComment,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Action(action) => write!(f, "action `{action}` is not `created`"),
            SkipReason::NoComment => f.write_str("event carries no comment"),
            SkipReason::NoPullRequest => f.write_str("comment is not on a pull request"),
            SkipReason::OwnComment => f.write_str("comment was written by the bot"),
        }
    }
}

/// How a run ended. Every variant except `Skipped` posted one comment.
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)] // Fields surface through the dispatcher's Debug log
pub enum Outcome {
    Skipped(SkipReason),
    Declined { confidence: f64 },
    Applied { branch: String, commit: String },
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Comments by this login are never processed
    pub bot_username: String,
    /// Used when the event carries no repository
    pub default_owner: String,
    pub default_repo: String,
    /// Web root for compare links, e.g. https://github.com; `None` disables them
    pub web_url: Option<String>,
}

pub struct Orchestrator {
    api: Arc<dyn RepositoryApi>,
    engine: FixDecisionEngine,
    workspaces: WorkingCopyManager,
    settings: PipelineSettings,
}

struct Target<'a> {
    owner: &'a str,
    repo: &'a str,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn RepositoryApi>,
        engine: FixDecisionEngine,
        workspaces: WorkingCopyManager,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            api,
            engine,
            workspaces,
            settings,
        }
    }

    /// Why `event` needs no processing, or the comment and PR number to process.
    pub fn screen<'e>(&self, event: &'e InboundEvent) -> Result<(&'e Comment, u64), SkipReason> {
        let action = event.action.as_deref().unwrap_or_default();
        if action != "created" {
            return Err(SkipReason::Action(action.to_string()));
        }
        let comment = event.comment.as_ref().ok_or(SkipReason::NoComment)?;
        let number = event
            .pull_request_number()
            .ok_or(SkipReason::NoPullRequest)?;
        if comment
            .user
            .login
            .eq_ignore_ascii_case(&self.settings.bot_username)
        {
            return Err(SkipReason::OwnComment);
        }
        Ok((comment, number))
    }

    /// Process one verified event end to end.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Outcome, PipelineError> {
        let (comment, number) = match self.screen(event) {
            Ok(found) => found,
            Err(reason) => {
                debug!(%reason, "skipping event");
                return Ok(Outcome::Skipped(reason));
            }
        };

        let (owner, repo) = match &event.repository {
            Some(r) => (r.owner.login.as_str(), r.name.as_str()),
            None => (
                self.settings.default_owner.as_str(),
                self.settings.default_repo.as_str(),
            ),
        };
        let target = Target { owner, repo };

        let span = info_span!("pipeline", repo = %format!("{owner}/{repo}"), pr = number, comment = comment.id);
        self.run(&target, comment, number, event.pull_request.as_ref())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        target: &Target<'_>,
        comment: &Comment,
        number: u64,
        embedded: Option<&PullRequest>,
    ) -> Result<Outcome, PipelineError> {
        info!(author = %comment.user.login, "processing comment");

        let pr = match embedded {
            Some(pr) => pr.clone(),
            None => {
                self.api
                    .get_pull_request(target.owner, target.repo, number)
                    .await?
            }
        };
        let files = self
            .api
            .list_pull_request_files(target.owner, target.repo, number)
            .await?;
        let snapshots = self.snapshots(target, &pr, &files).await;

        let verdict = self.engine.evaluate(comment, &pr, &files, &snapshots).await;
        info!(
            should_apply = verdict.should_apply,
            confidence = verdict.confidence,
            changes = verdict.changes.len(),
            "verdict"
        );

        let (body, outcome) = if !verdict.should_apply {
            (
                report::analysis_comment(&verdict),
                Outcome::Declined {
                    confidence: verdict.confidence,
                },
            )
        } else {
            let base = fix_base(&pr, target.owner, target.repo);
            match self
                .apply(target, &pr, &base, comment.id, &verdict.changes)
                .await
            {
                Ok((branch, commit)) => {
                    let report = self
                        .fix_report(target, &base, &branch, &commit, &verdict.changes)
                        .await;
                    (
                        report::success_comment(&report),
                        Outcome::Applied { branch, commit },
                    )
                }
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "applying fix failed");
                    (
                        report::failure_comment(e.kind(), &e.to_string()),
                        Outcome::Failed {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    )
                }
            }
        };

        self.api
            .create_comment(target.owner, target.repo, pr.number, &body)
            .await?;
        info!(?outcome, "result comment posted");
        Ok(outcome)
    }

    /// File contents at the PR head. A failed fetch degrades to a placeholder.
    async fn snapshots(
        &self,
        target: &Target<'_>,
        pr: &PullRequest,
        files: &[FileDiffEntry],
    ) -> Vec<FileSnapshot> {
        let mut snapshots = Vec::with_capacity(files.len());
        for file in files {
            let text = if file.status == FileStatus::Removed {
                FileText::Removed
            } else {
                match self
                    .api
                    .get_file_content(target.owner, target.repo, &file.filename, &pr.head.sha)
                    .await
                {
                    Ok(text) => FileText::Text(text),
                    Err(e) => {
                        warn!(file = %file.filename, error = %e, "file content unavailable");
                        FileText::Unavailable
                    }
                }
            };
            snapshots.push(FileSnapshot {
                filename: file.filename.clone(),
                text,
            });
        }
        snapshots
    }

    /// Branch, write, commit, push under the repository lease.
    #[instrument(skip_all, fields(base = %base, changes = changes.len()))]
    async fn apply(
        &self,
        target: &Target<'_>,
        pr: &PullRequest,
        base: &str,
        comment_id: u64,
        changes: &[ProposedChange],
    ) -> Result<(String, String), WorkspaceError> {
        let lease = self.workspaces.lease(target.owner, target.repo).await?;
        lease.ensure_repository(base).await?;
        let branch = lease.create_fix_branch(base, pr.number).await?;
        lease.apply_changes(changes).await?;
        let commit = lease.commit(pr.number, comment_id, changes).await?;
        lease.push(&branch).await?;
        Ok((branch, commit))
    }

    async fn fix_report(
        &self,
        target: &Target<'_>,
        base: &str,
        branch: &str,
        commit: &str,
        changes: &[ProposedChange],
    ) -> FixReport {
        let summary = self.engine.summarize(changes).await;
        let stats = match self
            .api
            .compare(target.owner, target.repo, base, branch)
            .await
        {
            Ok(cmp) => Some(DiffStats {
                files: cmp.files.len(),
                additions: cmp.additions(),
                deletions: cmp.deletions(),
            }),
            Err(e) => {
                debug!(error = %e, "diff stats unavailable");
                None
            }
        };
        let compare_url = self.settings.web_url.as_deref().map(|web| {
            format!(
                "{}/{}/{}/compare/{}...{}?expand=1",
                web.trim_end_matches('/'),
                target.owner,
                target.repo,
                base,
                branch
            )
        });

        FixReport {
            branch: branch.to_string(),
            base: base.to_string(),
            commit: commit.to_string(),
            summary,
            changes: changes
                .iter()
                .map(|c| (c.filename.clone(), c.description.clone()))
                .collect(),
            stats,
            compare_url,
        }
    }
}

/// The PR head branch when it lives in the target repository, else the base.
pub fn fix_base(pr: &PullRequest, owner: &str, repo: &str) -> String {
    let same_repo = pr
        .head
        .repo
        .as_ref()
        .is_some_and(|r| r.full_name.eq_ignore_ascii_case(&format!("{owner}/{repo}")));
    if same_repo {
        pr.head.ref_name.clone()
    } else {
        pr.base.ref_name.clone()
    }
}
