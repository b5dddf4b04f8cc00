use std::fmt::Write;

use super::types::{FileSnapshot, FileText, ProposedChange};
use crate::github::{FileDiffEntry, PullRequest};
use crate::webhook::Comment;

pub const SYSTEM_PROMPT: &str = r#"You are an automated code-fix assistant attached to GitHub pull requests.
You read one reviewer comment together with the pull request's changed files and decide whether the comment asks for a fix that can be applied safely without human judgement.

Apply a fix ONLY when it is an unambiguous technical correction:
- a bug fix with a single obvious remedy
- a syntax or compile error
- a spelling mistake in code, comments, or strings
- a clear security issue with a standard fix

Do NOT apply a fix when the comment is:
- a style or naming preference, or otherwise subjective
- a business-logic or product decision
- a question, discussion, or vague suggestion
- ambiguous about what exactly should change
When in doubt, do not apply.

Reply with exactly one JSON object and nothing else, in this shape:
{
  "shouldApply": boolean,
  "confidence": number between 0 and 1,
  "reasoning": "short explanation of the decision",
  "changes": [
    {
      "filename": "path/relative/to/repository/root",
      "content": "the COMPLETE new content of the file",
      "description": "what was changed in this file",
      "lineNumber": optional integer
    }
  ]
}
Each change must contain the entire file, not a diff. Only touch files that need the fix. When shouldApply is false, "changes" must be an empty array."#;

pub const SUMMARY_PROMPT: &str = "You write one or two plain sentences summarizing code changes for a pull request comment. No markdown headings, no lists.";

/// User message for the decision call: PR, comment, and every changed file.
pub fn build_context(
    comment: &Comment,
    pr: &PullRequest,
    files: &[FileDiffEntry],
    snapshots: &[FileSnapshot],
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Pull request #{}: {}", pr.number, pr.title);
    let description = pr.body.as_deref().map(str::trim).filter(|b| !b.is_empty());
    let _ = writeln!(out, "{}\n", description.unwrap_or("(no description)"));
    let _ = writeln!(
        out,
        "Head branch: {} ({})\nBase branch: {}\n",
        pr.head.ref_name, pr.head.sha, pr.base.ref_name
    );

    let _ = writeln!(out, "## Comment by @{}", comment.user.login);
    if let Some(path) = &comment.path {
        match comment.line {
            Some(line) => {
                let _ = writeln!(out, "(on {path}, line {line})");
            }
            None => {
                let _ = writeln!(out, "(on {path})");
            }
        }
    }
    let _ = writeln!(out, "{}\n", comment.body.trim());

    let _ = writeln!(out, "## Changed files");
    for file in files {
        let _ = writeln!(
            out,
            "- {} ({}, +{} -{})",
            file.filename, file.status, file.additions, file.deletions
        );
    }
    out.push('\n');

    for snapshot in snapshots {
        let _ = writeln!(out, "### File: {}", snapshot.filename);
        match &snapshot.text {
            FileText::Text(text) => {
                let _ = writeln!(out, "```\n{}\n```\n", text.trim_end_matches('\n'));
            }
            FileText::Removed => {
                let _ = writeln!(out, "[file removed in this pull request]\n");
            }
            FileText::Unavailable => {
                let _ = writeln!(out, "[content not available]\n");
            }
        }
    }

    out
}

/// User message for the summary call.
pub fn build_summary_request(changes: &[ProposedChange]) -> String {
    let mut out = String::from("Summarize these applied changes:\n");
    for change in changes {
        let _ = writeln!(out, "- {}: {}", change.filename, change.description);
    }
    out
}
