pub mod types;

pub use types::{ConfidenceLevel, DiffStats, FixReport};

use colored::Colorize;

use crate::config::Config;
use crate::fixer::Verdict;

const MAX_FAILURE_MESSAGE: usize = 1500;

/// Comment posted when the model declines to apply a fix.
pub fn analysis_comment(verdict: &Verdict) -> String {
    let mut md = String::new();
    md.push_str("## 🤖 Automated Fix Analysis\n\n");
    md.push_str("**Decision:** will not apply automatically\n\n");
    md.push_str(&format!(
        "**Confidence:** {}% ({})\n\n",
        verdict.confidence_percent(),
        ConfidenceLevel::from_score(verdict.confidence)
    ));
    md.push_str("**Reasoning:**\n\n");
    md.push_str(&quote(verdict.reasoning.trim()));
    md.push_str("\n\n");
    md.push_str(
        "_Only unambiguous technical fixes (bugs, syntax errors, typos, security issues) are applied automatically._\n",
    );
    md
}

/// Comment posted after the fix branch was pushed.
pub fn success_comment(report: &FixReport) -> String {
    let mut md = String::new();
    md.push_str("## ✅ Automated Fix Applied\n\n");
    md.push_str(&format!("{}\n\n", report.summary.trim()));
    md.push_str(&format!(
        "**Branch:** `{}` (from `{}`)\n",
        report.branch, report.base
    ));
    md.push_str(&format!("**Commit:** `{}`\n", short_sha(&report.commit)));
    if let Some(stats) = report.stats {
        md.push_str(&format!(
            "**Diff:** {} file(s), +{} -{}\n",
            stats.files, stats.additions, stats.deletions
        ));
    }
    md.push('\n');

    if !report.changes.is_empty() {
        md.push_str("### Changes\n\n");
        for (filename, description) in &report.changes {
            md.push_str(&format!("- `{}`: {}\n", filename, description));
        }
        md.push('\n');
    }

    if let Some(url) = &report.compare_url {
        md.push_str(&format!("[Open a pull request for this fix]({url})\n\n"));
    }
    md.push_str("_Please review the fix before merging._\n");
    md
}

/// Comment posted when applying the fix failed part-way.
pub fn failure_comment(kind: &str, message: &str) -> String {
    let mut md = String::new();
    md.push_str("## ❌ Automated Fix Failed\n\n");
    md.push_str(&format!("**Error:** `{kind}`\n\n"));
    md.push_str("```\n");
    md.push_str(truncate(message.trim(), MAX_FAILURE_MESSAGE));
    md.push_str("\n```\n\n");
    md.push_str("_No changes were pushed. The fix can be applied manually._\n");
    md
}

fn quote(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Print the effective configuration for `check`, secrets redacted.
pub fn print_config_summary(config: &Config, problem: Option<&str>) {
    println!();
    println!("{}", "pr-fixbot configuration".bold());
    println!();

    let secret = |value: &Option<String>| match value {
        Some(v) if !v.is_empty() => "set".green(),
        _ => "missing".red().bold(),
    };
    println!("  GitHub token:     {}", secret(&config.github.token));
    println!("  Webhook secret:   {}", secret(&config.github.webhook_secret));
    println!("  OpenAI API key:   {}", secret(&config.openai.api_key));
    println!(
        "  Repository:       {}/{}",
        config.default_owner(),
        config.default_repo()
    );
    println!(
        "  Bot username:     {}",
        config
            .github
            .bot_username
            .as_deref()
            .unwrap_or("(resolved from token at startup)")
    );
    println!("  GitHub API:       {}", config.github_api_url());
    println!(
        "  Model:            {} @ {} (temperature {}, max tokens {})",
        config.model(),
        config.openai_base_url(),
        config.temperature(),
        config.max_tokens()
    );
    println!("  Port:             {}", config.port());
    if let Some(url) = &config.server.webhook_url {
        println!("  Webhook URL:      {url}");
    }
    println!(
        "  Workers:          {} (queue {})",
        config.workers(),
        config.queue_capacity()
    );
    println!(
        "  Git author:       {} <{}>",
        config.author_name(),
        config.author_email()
    );
    println!("  Clone base:       {}", config.clone_base());
    println!("  Workspaces:       {}", config.workspace_dir().display());
    println!(
        "  Timeouts:         http {}s, llm {}s, git {}s",
        config.http_timeout_secs(),
        config.llm_timeout_secs(),
        config.git_timeout_secs()
    );
    println!();

    match problem {
        None => println!("{}", "Configuration OK".green().bold()),
        Some(p) => println!("{} {}", "Configuration invalid:".red().bold(), p),
    }
    println!();
}
