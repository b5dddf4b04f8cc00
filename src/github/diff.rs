use super::types::{DiffFile, Hunk};
use super::RemoteError;

/// Parse unified diff text (GitHub's `application/vnd.github.diff` media type, or
/// `git diff` output) into per-file summaries.
///
/// Sections start at `diff --git a/{path} b/{path}`; `/dev/null` on the `---` or
/// `+++` side marks a new or deleted file; hunks start at
/// `@@ -{old_start},{old_count} +{new_start},{new_count} @@`.
pub fn parse_diff(raw_diff: &str) -> Result<Vec<DiffFile>, RemoteError> {
    let mut builder = DiffBuilder::default();
    for line in raw_diff.lines() {
        builder.feed(line)?;
    }
    Ok(builder.finish())
}

#[derive(Default)]
struct DiffBuilder {
    files: Vec<DiffFile>,
    file: Option<DiffFile>,
    hunk: Option<Hunk>,
}

impl DiffBuilder {
    fn feed(&mut self, line: &str) -> Result<(), RemoteError> {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.close_file();
            self.file = Some(new_file(parse_header_path(rest)?));
            return Ok(());
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        if line.starts_with("@@") {
            if let Some(hunk) = self.hunk.take() {
                file.hunks.push(hunk);
            }
            self.hunk = Some(parse_hunk_header(line)?);
            return Ok(());
        }

        if self.hunk.is_none() {
            // extended header lines between `diff --git` and the first hunk
            if line.starts_with("new file mode") || line == "--- /dev/null" {
                file.is_new = true;
            } else if line.starts_with("deleted file mode") || line == "+++ /dev/null" {
                file.is_deleted = true;
            } else if let Some(to) = line.strip_prefix("rename to ") {
                file.path = to.to_string();
            } else if let Some(to) = line.strip_prefix("+++ b/") {
                file.path = to.to_string();
            }
            return Ok(());
        }

        if let Some(hunk) = self.hunk.as_mut() {
            match line.chars().next() {
                Some('+') => {
                    file.additions += 1;
                    hunk.lines.push(line.to_string());
                }
                Some('-') => {
                    file.deletions += 1;
                    hunk.lines.push(line.to_string());
                }
                Some(' ') => hunk.lines.push(line.to_string()),
                // "\ No newline at end of file" and anything unexpected
                _ => {}
            }
        }
        Ok(())
    }

    fn close_file(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Some(hunk) = self.hunk.take() {
                file.hunks.push(hunk);
            }
            self.files.push(file);
        }
    }

    fn finish(mut self) -> Vec<DiffFile> {
        self.close_file();
        self.files
    }
}

fn new_file(path: String) -> DiffFile {
    DiffFile {
        path,
        is_new: false,
        is_deleted: false,
        additions: 0,
        deletions: 0,
        hunks: Vec::new(),
    }
}

fn parse_header_path(rest: &str) -> Result<String, RemoteError> {
    let mut parts = rest.split_whitespace();
    let a_path = parts
        .next()
        .ok_or_else(|| RemoteError::DiffParse("missing a/ path in diff header".to_string()))?;
    let b_path = parts
        .next()
        .ok_or_else(|| RemoteError::DiffParse("missing b/ path in diff header".to_string()))?;
    Ok(b_path
        .strip_prefix("b/")
        .or_else(|| a_path.strip_prefix("a/"))
        .unwrap_or(b_path)
        .to_string())
}

fn parse_hunk_header(line: &str) -> Result<Hunk, RemoteError> {
    let inner = line
        .strip_prefix("@@")
        .and_then(|rest| rest.split("@@").next())
        .ok_or_else(|| RemoteError::DiffParse(format!("invalid hunk header: {line}")))?;
    let mut parts = inner.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| RemoteError::DiffParse("missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| RemoteError::DiffParse("missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), RemoteError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| RemoteError::DiffParse(format!("invalid range prefix in {part}")))?;
    let (start, count) = range.split_once(',').unwrap_or((range, "1"));
    let parse = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| RemoteError::DiffParse(format!("invalid range {part}")))
    };
    Ok((parse(start)?, parse(count)?))
}
