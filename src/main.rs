mod config;
mod fixer;
mod github;
mod pipeline;
mod report;
mod server;
mod webhook;
mod workspace;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use config::Config;
use fixer::{FixDecisionEngine, OpenAiClient};
use github::{GitHubClient, RepositoryApi};
use pipeline::{Orchestrator, PipelineSettings};
use server::{AppState, Dispatcher, WorkerPool};
use webhook::SignatureVerifier;
use workspace::{WorkingCopyManager, WorkspaceSettings};

/// How long in-flight pipelines may keep running after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// PR Fix Bot: a GitHub webhook service that reads pull request comments, asks an
/// LLM whether they describe a safe fix, and pushes that fix to a new branch.
#[derive(Parser, Debug)]
#[command(name = "pr-fixbot", version, about)]
struct Cli {
    /// Config file (defaults to .pr-fixbot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding PORT
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the webhook server (default)
    Serve,
    /// Validate configuration and print a redacted summary
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = Some(port);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Check => {
            let problem = config.validate().err();
            report::print_config_summary(&config, problem.as_ref().map(|e| e.to_string()).as_deref());
            match problem {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
        Command::Serve => {
            config.validate()?;
            serve(config).instrument(info_span!("pr_fixbot")).await
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let http_timeout = Duration::from_secs(config.http_timeout_secs());
    let github: Arc<dyn RepositoryApi> = Arc::new(GitHubClient::new(
        config.github_api_url(),
        config.github_token(),
        http_timeout,
    )?);

    let bot_username = match &config.github.bot_username {
        Some(name) => name.clone(),
        None => {
            let me = github.authenticated_user().await?;
            info!(login = %me.login, "resolved bot identity from token");
            me.login
        }
    };

    let model = Arc::new(OpenAiClient::new(
        config.openai_base_url(),
        config.openai_api_key(),
        config.model(),
        Duration::from_secs(config.llm_timeout_secs()),
    )?);
    let engine = FixDecisionEngine::new(model, config.temperature(), config.max_tokens());

    let workspaces = WorkingCopyManager::new(WorkspaceSettings {
        root: config.workspace_dir(),
        clone_base: config.clone_base().to_string(),
        token: config.github_token().to_string(),
        author_name: config.author_name().to_string(),
        author_email: config.author_email().to_string(),
        git_timeout: Duration::from_secs(config.git_timeout_secs()),
    });

    let clone_base = config.clone_base();
    let web_url = clone_base
        .starts_with("http")
        .then(|| clone_base.trim_end_matches('/').to_string());

    let orchestrator = Arc::new(Orchestrator::new(
        github,
        engine,
        workspaces,
        PipelineSettings {
            bot_username: bot_username.clone(),
            default_owner: config.default_owner().to_string(),
            default_repo: config.default_repo().to_string(),
            web_url,
        },
    ));

    let (dispatcher, rx) = Dispatcher::bounded(config.queue_capacity());
    let pool = WorkerPool::start(rx, orchestrator, config.workers());
    let state = Arc::new(AppState {
        verifier: SignatureVerifier::new(config.webhook_secret()),
        dispatcher,
    });

    info!(
        bot = %bot_username,
        model = %config.model(),
        workers = config.workers(),
        port = config.port(),
        "starting"
    );
    let listener = TcpListener::bind(("0.0.0.0", config.port())).await?;
    server::serve(listener, state, shutdown_signal()).await?;

    info!("server stopped, draining in-flight work");
    if !pool.drain(SHUTDOWN_GRACE).await {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "in-flight work abandoned after grace period");
    }
    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C; shut down by terminating the process");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
