pub mod diff;
pub mod types;

pub use types::{
    CommitInfo, Comparison, FileDiffEntry, FileStatus, IssueComment, PullRequest, User,
};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{header, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!("pr-fixbot/", env!("CARGO_PKG_VERSION"));
const FILES_PER_PAGE: usize = 100;
// GitHub stops listing PR files after 3000 entries
const MAX_FILE_PAGES: usize = 30;
const MAX_ERROR_BODY: usize = 2000;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("GitHub API returned {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("GitHub API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected GitHub response: {0}")]
    Decode(String),

    #[error("Failed to parse diff: {0}")]
    DiffParse(String),

    #[error("Cannot build GitHub API URL: {0}")]
    InvalidUrl(String),
}

/// Operations the pipeline needs from the hosting service.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// The account the access token belongs to.
    async fn authenticated_user(&self) -> Result<User, RemoteError>;

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, RemoteError>;

    async fn list_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<FileDiffEntry>, RemoteError>;

    /// Raw file content at `git_ref`, decoded from the API's base64 transport.
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, RemoteError>;

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError>;

    #[allow(dead_code)] // Rewrites a posted result; the pipeline posts exactly once
    async fn update_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError>;

    #[allow(dead_code)]
    async fn get_commit(&self, owner: &str, repo: &str, sha: &str)
        -> Result<CommitInfo, RemoteError>;

    async fn compare(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Comparison, RemoteError>;
}

/// REST v3 client authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_api: String,
    token: String,
}

impl GitHubClient {
    pub fn new(base_api: &str, token: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// `/repos/{owner}/{repo}/contents/{path}` with each path segment
    /// percent-encoded, so names containing `#`, `?` or `%` stay intact.
    fn contents_url(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<reqwest::Url, RemoteError> {
        let base = format!("{}/repos/{}/{}/contents", self.base_api, owner, repo);
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| RemoteError::InvalidUrl(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(base.clone()))?
            .extend(path.trim_start_matches('/').split('/'));
        Ok(url)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.authorized(self.http.get(url))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let response = checked(req.send().await?).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Turn a non-2xx response into `RemoteError::Status`, keeping the body for the
/// user-facing report.
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    warn!(status = status.as_u16(), %url, "GitHub API returned an error status");
    Err(RemoteError::Status {
        status: status.as_u16(),
        url,
        body,
    })
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct CommitDetail {
    message: String,
    author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct CommitAuthor {
    name: String,
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct CommitFile {
    filename: String,
}

/// Decode a base64 `contents` payload; GitHub wraps it at 60 columns.
pub fn decode_content(encoded: &str) -> Result<String, RemoteError> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| RemoteError::Decode(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|_| RemoteError::Decode("file is not valid UTF-8".to_string()))
}

#[async_trait]
impl RepositoryApi for GitHubClient {
    #[instrument(skip(self))]
    async fn authenticated_user(&self) -> Result<User, RemoteError> {
        let url = format!("{}/user", self.base_api);
        self.send_json(self.get(&url)).await
    }

    #[instrument(skip(self))]
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, RemoteError> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.base_api, owner, repo, number);
        debug!("fetching PR metadata");
        let pr: PullRequest = self.send_json(self.get(&url)).await?;
        debug!(title = %pr.title, head = %pr.head.sha, "received PR metadata");
        Ok(pr)
    }

    #[instrument(skip(self))]
    async fn list_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<FileDiffEntry>, RemoteError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/files",
            self.base_api, owner, repo, number
        );
        let mut files = Vec::new();
        for page in 1..=MAX_FILE_PAGES {
            let req = self
                .get(&url)
                .query(&[("per_page", FILES_PER_PAGE), ("page", page)]);
            let batch: Vec<FileDiffEntry> = self.send_json(req).await?;
            let done = batch.len() < FILES_PER_PAGE;
            files.extend(batch);
            if done {
                break;
            }
        }
        debug!(files = files.len(), "listed PR files");
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, RemoteError> {
        let url = self.contents_url(owner, repo, path)?;
        let req = self.get(url.as_str()).query(&[("ref", git_ref)]);
        let payload: ContentResponse = self.send_json(req).await?;

        match (payload.content, payload.encoding.as_deref()) {
            (Some(content), Some("base64")) => decode_content(&content),
            (Some(content), None | Some("utf-8")) => Ok(content),
            (_, encoding) => Err(RemoteError::Decode(format!(
                "no inline content for {path} (encoding {})",
                encoding.unwrap_or("none")
            ))),
        }
    }

    #[instrument(skip(self, body), fields(body_len = body.len()))]
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_api, owner, repo, issue_number
        );
        let req = self
            .authorized(self.http.post(&url))
            .json(&serde_json::json!({ "body": body }));
        self.send_json(req).await
    }

    #[instrument(skip(self, body), fields(body_len = body.len()))]
    async fn update_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<IssueComment, RemoteError> {
        let url = format!(
            "{}/repos/{}/{}/issues/comments/{}",
            self.base_api, owner, repo, comment_id
        );
        let req = self
            .authorized(self.http.patch(&url))
            .json(&serde_json::json!({ "body": body }));
        self.send_json(req).await
    }

    #[instrument(skip(self))]
    async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, RemoteError> {
        let url = format!("{}/repos/{}/{}/commits/{}", self.base_api, owner, repo, sha);
        let raw: CommitResponse = self.send_json(self.get(&url)).await?;
        let (author_name, authored_at) = match raw.commit.author {
            Some(author) => (author.name, author.date),
            None => (String::new(), None),
        };
        Ok(CommitInfo {
            sha: raw.sha,
            message: raw.commit.message,
            author_name,
            authored_at,
            files: raw.files.into_iter().map(|f| f.filename).collect(),
        })
    }

    #[instrument(skip(self))]
    async fn compare(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Comparison, RemoteError> {
        let url = format!(
            "{}/repos/{}/{}/compare/{}...{}",
            self.base_api, owner, repo, base, head
        );
        let req = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github.diff");
        let text = checked(req.send().await?).await?.text().await?;
        debug!(diff_bytes = text.len(), "received compare diff");
        let files = diff::parse_diff(&text)?;
        Ok(Comparison {
            base: base.to_string(),
            head: head.to_string(),
            files,
        })
    }
}
