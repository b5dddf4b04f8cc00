//! Shared fixtures for unit tests: sample payloads, recording fakes for the two
//! service traits, a slow chat endpoint, and a seeded local git remote.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::fixer::{ChatModel, ChatRequest, LlmError};
use crate::github::types::{GitRef, Repository};
use crate::github::{
    CommitInfo, Comparison, FileDiffEntry, FileStatus, IssueComment, PullRequest, RemoteError,
    RepositoryApi, User,
};
use crate::webhook::Comment;

pub fn user(login: &str) -> User {
    User {
        login: login.to_string(),
        id: None,
    }
}

pub fn repository(owner: &str, name: &str) -> Repository {
    Repository {
        name: name.to_string(),
        full_name: format!("{owner}/{name}"),
        owner: user(owner),
    }
}

pub fn sample_comment(body: &str) -> Comment {
    Comment {
        id: 1001,
        body: body.to_string(),
        user: user("alice"),
        created_at: None,
        updated_at: None,
        path: None,
        line: None,
    }
}

/// PR #12 in acme/widgets: `feature` into `main`, head in the same repository.
pub fn sample_pr() -> PullRequest {
    let side = |name: &str, sha: &str| GitRef {
        ref_name: name.to_string(),
        sha: sha.to_string(),
        repo: Some(repository("acme", "widgets")),
    };
    PullRequest {
        number: 12,
        title: "Add network receiver".to_string(),
        body: Some("Implements the receive path.".to_string()),
        head: side("feature", "headsha"),
        base: side("main", "basesha"),
        state: "open".to_string(),
        mergeable: None,
        user: Some(user("alice")),
    }
}

pub fn modified(filename: &str) -> FileDiffEntry {
    FileDiffEntry {
        filename: filename.to_string(),
        status: FileStatus::Modified,
        additions: 1,
        deletions: 1,
        changes: 2,
        patch: None,
    }
}

/// Chat model that replays canned replies in order and records every request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyChoices))
    }
}

/// In-memory repository API. Content lookups are keyed by path; paths without an
/// entry fail with a 404.
pub struct FakeRepositoryApi {
    pub pr: PullRequest,
    pub files: Vec<FileDiffEntry>,
    pub contents: HashMap<String, String>,
    pub comparison: Option<Comparison>,
    comments: Mutex<Vec<(u64, String)>>,
    calls: AtomicUsize,
}

impl FakeRepositoryApi {
    pub fn new(pr: PullRequest, files: Vec<FileDiffEntry>, contents: &[(&str, &str)]) -> Self {
        Self {
            pr,
            files,
            contents: contents
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            comparison: None,
            comments: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// `(issue_number, body)` of every posted comment.
    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }

    /// Number of API calls made, of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn not_found(url: &str) -> RemoteError {
        RemoteError::Status {
            status: 404,
            url: url.to_string(),
            body: "{\"message\":\"Not Found\"}".to_string(),
        }
    }
}

#[async_trait]
impl RepositoryApi for FakeRepositoryApi {
    async fn authenticated_user(&self) -> Result<User, RemoteError> {
        self.touch();
        Ok(user("fixbot"))
    }

    async fn get_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<PullRequest, RemoteError> {
        self.touch();
        if number == self.pr.number {
            Ok(self.pr.clone())
        } else {
            Err(Self::not_found(&format!("pulls/{number}")))
        }
    }

    async fn list_pull_request_files(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> Result<Vec<FileDiffEntry>, RemoteError> {
        self.touch();
        Ok(self.files.clone())
    }

    async fn get_file_content(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> Result<String, RemoteError> {
        self.touch();
        self.contents
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    async fn create_comment(
        &self,
        _owner: &str,
        _repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError> {
        self.touch();
        let mut comments = self.comments.lock().unwrap();
        comments.push((issue_number, body.to_string()));
        Ok(IssueComment {
            id: comments.len() as u64,
            body: body.to_string(),
            html_url: None,
        })
    }

    async fn update_comment(
        &self,
        _owner: &str,
        _repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError> {
        self.touch();
        Ok(IssueComment {
            id: comment_id,
            body: body.to_string(),
            html_url: None,
        })
    }

    async fn get_commit(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, RemoteError> {
        self.touch();
        Err(Self::not_found(sha))
    }

    async fn compare(
        &self,
        _owner: &str,
        _repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Comparison, RemoteError> {
        self.touch();
        self.comparison
            .clone()
            .ok_or_else(|| Self::not_found(&format!("compare/{base}...{head}")))
    }
}

/// A chat-completions endpoint that answers only after `delay`. Returns its base URL.
pub async fn slow_chat_server(delay: Duration) -> String {
    let app = axum::Router::new().route(
        "/v1/chat/completions",
        axum::routing::post(move || async move {
            tokio::time::sleep(delay).await;
            axum::Json(serde_json::json!({"choices": [{"message": {"content": "late"}}]}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Create `<root>/remotes/<owner>/<repo>.git`, a bare repository whose `main`
/// holds `files`. Returns the `remotes` directory, usable as a clone base.
pub fn seed_remote(root: &Path, owner: &str, repo: &str, files: &[(&str, &str)]) -> PathBuf {
    let remotes = root.join("remotes");
    let bare = remotes.join(owner).join(format!("{repo}.git"));
    std::fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "-q", "--bare"]);
    git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    let seed = root.join(format!("seed-{owner}-{repo}"));
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-q"]);
    git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    for (path, content) in files {
        let target = seed.join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
    }
    git(&seed, &["add", "-A"]);
    git(
        &seed,
        &[
            "-c",
            "user.name=Seed",
            "-c",
            "user.email=seed@example.com",
            "commit",
            "-q",
            "-m",
            "initial",
        ],
    );
    let bare_path = bare.to_string_lossy().to_string();
    git(&seed, &["push", "-q", &bare_path, "main"]);
    remotes
}

pub fn remote_has_branch(bare: &Path, branch: &str) -> bool {
    Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
        .current_dir(bare)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn read_remote_file(bare: &Path, branch: &str, path: &str) -> String {
    let out = Command::new("git")
        .args(["show", &format!("{branch}:{path}")])
        .current_dir(bare)
        .output()
        .unwrap();
    String::from_utf8_lossy(&out.stdout).to_string()
}
