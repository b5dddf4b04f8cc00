use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level configuration loaded from .pr-fixbot.toml and the environment.
///
/// Every field may come from the file, and every field can be overridden by its
/// environment variable. Required values are checked by [`Config::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    /// Access token for the REST API and git pushes (GITHUB_TOKEN)
    pub token: Option<String>,
    /// Shared secret for webhook signatures (GITHUB_WEBHOOK_SECRET)
    pub webhook_secret: Option<String>,
    /// Default repository owner used for the working copy (GITHUB_OWNER)
    pub owner: Option<String>,
    /// Default repository name used for the working copy (GITHUB_REPO)
    pub repo: Option<String>,
    /// Login of the bot account; comments by it are ignored (BOT_USERNAME)
    pub bot_username: Option<String>,
    /// REST API root (GITHUB_API_URL)
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    /// Externally reachable webhook URL, informational only
    pub webhook_url: Option<String>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub http_timeout_secs: Option<u64>,
    pub llm_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitConfig {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Root that repositories are cloned from, e.g. https://github.com
    pub clone_base: Option<String>,
    /// Directory holding one working copy per repository
    pub workspace_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_CLONE_BASE: &str = "https://github.com";

impl Config {
    /// Load configuration: the TOML file (if present) first, then environment
    /// overrides. `path` defaults to .pr-fixbot.toml in the current directory.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let default_path = Path::new(".pr-fixbot.toml");
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None if default_path.exists() => Self::load_from(default_path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override fields from environment-style variables. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_string(&mut self.github.token, get("GITHUB_TOKEN"));
        override_string(&mut self.github.webhook_secret, get("GITHUB_WEBHOOK_SECRET"));
        override_string(&mut self.github.owner, get("GITHUB_OWNER"));
        override_string(&mut self.github.repo, get("GITHUB_REPO"));
        override_string(&mut self.github.bot_username, get("BOT_USERNAME"));
        override_string(&mut self.github.api_url, get("GITHUB_API_URL"));

        override_string(&mut self.openai.api_key, get("OPENAI_API_KEY"));
        override_string(&mut self.openai.model, get("OPENAI_MODEL"));
        override_string(&mut self.openai.base_url, get("OPENAI_BASE_URL"));
        override_parsed(&mut self.openai.max_tokens, "OPENAI_MAX_TOKENS", get("OPENAI_MAX_TOKENS"))?;
        override_parsed(&mut self.openai.temperature, "OPENAI_TEMPERATURE", get("OPENAI_TEMPERATURE"))?;

        override_parsed(&mut self.server.port, "PORT", get("PORT"))?;
        override_string(&mut self.server.webhook_url, get("WEBHOOK_URL"));
        override_parsed(&mut self.server.workers, "WORKER_COUNT", get("WORKER_COUNT"))?;
        override_parsed(&mut self.server.queue_capacity, "QUEUE_CAPACITY", get("QUEUE_CAPACITY"))?;
        override_parsed(&mut self.server.http_timeout_secs, "HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"))?;
        override_parsed(&mut self.server.llm_timeout_secs, "LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"))?;

        override_string(&mut self.git.author_name, get("GIT_AUTHOR_NAME"));
        override_string(&mut self.git.author_email, get("GIT_AUTHOR_EMAIL"));
        override_string(&mut self.git.clone_base, get("GIT_CLONE_BASE"));
        if let Some(dir) = get("WORKSPACE_DIR") {
            self.git.workspace_dir = Some(PathBuf::from(dir));
        }
        override_parsed(&mut self.git.timeout_secs, "GIT_TIMEOUT_SECS", get("GIT_TIMEOUT_SECS"))?;

        Ok(())
    }

    /// Check that every required value is present and ranges are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.github.token, "GITHUB_TOKEN")?;
        require(&self.github.webhook_secret, "GITHUB_WEBHOOK_SECRET")?;
        require(&self.openai.api_key, "OPENAI_API_KEY")?;
        require(&self.github.owner, "GITHUB_OWNER")?;
        require(&self.github.repo, "GITHUB_REPO")?;

        let temperature = self.temperature();
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                key: "OPENAI_TEMPERATURE",
                reason: format!("{temperature} is outside 0.0..=2.0"),
            });
        }
        if self.workers() == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_COUNT",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn github_token(&self) -> &str {
        self.github.token.as_deref().unwrap_or_default()
    }

    pub fn webhook_secret(&self) -> &str {
        self.github.webhook_secret.as_deref().unwrap_or_default()
    }

    pub fn default_owner(&self) -> &str {
        self.github.owner.as_deref().unwrap_or_default()
    }

    pub fn default_repo(&self) -> &str {
        self.github.repo.as_deref().unwrap_or_default()
    }

    pub fn github_api_url(&self) -> &str {
        self.github.api_url.as_deref().unwrap_or(DEFAULT_GITHUB_API)
    }

    pub fn openai_api_key(&self) -> &str {
        self.openai.api_key.as_deref().unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.openai.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn openai_base_url(&self) -> &str {
        self.openai.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_URL)
    }

    pub fn max_tokens(&self) -> u32 {
        self.openai.max_tokens.unwrap_or(4000)
    }

    pub fn temperature(&self) -> f32 {
        self.openai.temperature.unwrap_or(0.1)
    }

    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or(3000)
    }

    pub fn workers(&self) -> usize {
        self.server.workers.unwrap_or(4)
    }

    pub fn queue_capacity(&self) -> usize {
        self.server.queue_capacity.unwrap_or(64).max(1)
    }

    pub fn http_timeout_secs(&self) -> u64 {
        self.server.http_timeout_secs.unwrap_or(30)
    }

    pub fn llm_timeout_secs(&self) -> u64 {
        self.server.llm_timeout_secs.unwrap_or(120)
    }

    pub fn author_name(&self) -> &str {
        self.git.author_name.as_deref().unwrap_or("PR Fix Bot")
    }

    pub fn author_email(&self) -> &str {
        self.git
            .author_email
            .as_deref()
            .unwrap_or("pr-fixbot@users.noreply.github.com")
    }

    pub fn clone_base(&self) -> &str {
        self.git.clone_base.as_deref().unwrap_or(DEFAULT_CLONE_BASE)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.git
            .workspace_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./workspaces"))
    }

    pub fn git_timeout_secs(&self) -> u64 {
        self.git.timeout_secs.unwrap_or(300)
    }
}

fn override_string(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

fn override_parsed<T: std::str::FromStr>(
    slot: &mut Option<T>,
    key: &'static str,
    value: Option<String>,
) -> Result<(), ConfigError> {
    if let Some(raw) = value {
        let parsed = raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("could not parse {raw:?}"),
        })?;
        *slot = Some(parsed);
    }
    Ok(())
}

fn require(value: &Option<String>, key: &'static str) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(key)),
    }
}
