use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use course_advisor::advisor::Advisor;
use course_advisor::catalog::seed::seed_from_file;
use course_advisor::catalog::{CourseIndex, MemoryCourseIndex, OpenAiEmbedder, PineconeIndex};
use course_advisor::channels::{Channel, CliChannel, OutgoingResponse, StatusUpdate};
use course_advisor::config::{AdvisorConfig, IndexBackend};
use course_advisor::llm::{LlmProvider, RateLimitedProvider, create_provider};
use course_advisor::ratelimit::RateLimiter;
use course_advisor::search::TavilySearch;
use course_advisor::store::{LibSqlSessionStore, SessionStore};
use course_advisor::workflow::{SessionState, WorkflowController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdvisorConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_logging(&config.log_dir)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("seed") => {
            let path = args
                .get(1)
                .map(PathBuf::from)
                .context("usage: course-advisor seed <catalog.jsonl>")?;
            seed(&config, &path).await
        }
        Some(other) => anyhow::bail!("unknown command '{other}' (expected: seed)"),
        None => chat(&config).await,
    }
}

/// Stderr for the operator (quiet by default), daily rolling file at debug.
fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "course-advisor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("info,course_advisor=debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn build_index(config: &AdvisorConfig) -> anyhow::Result<Arc<dyn CourseIndex>> {
    let limiter = Arc::new(RateLimiter::per_minute(config.requests_per_minute));
    match config.index {
        IndexBackend::Memory => Ok(Arc::new(MemoryCourseIndex::new())),
        IndexBackend::Pinecone => {
            let pinecone = config
                .pinecone
                .as_ref()
                .context("Pinecone index selected but not configured")?;
            let embedder = Arc::new(
                OpenAiEmbedder::new(config.openai_api_key.clone(), &config.embedding_model)
                    .with_rate_limiter(limiter.clone()),
            );
            Ok(Arc::new(
                PineconeIndex::new(
                    &pinecone.host,
                    pinecone.api_key.clone(),
                    &pinecone.namespace,
                    embedder,
                )
                .with_rate_limiter(limiter),
            ))
        }
    }
}

async fn seed(config: &AdvisorConfig, path: &Path) -> anyhow::Result<()> {
    if config.index == IndexBackend::Memory {
        eprintln!("Warning: COURSE_ADVISOR_INDEX=memory, seeded courses are lost on exit.");
    }
    let index = build_index(config)?;
    let report = seed_from_file(index.as_ref(), path, &config.retry_policy())
        .await
        .with_context(|| format!("seeding from {}", path.display()))?;

    eprintln!("Indexed {} course(s).", report.indexed);
    for skipped in &report.skipped {
        eprintln!("  skipped line {}: {}", skipped.line, skipped.reason);
    }
    Ok(())
}

async fn chat(config: &AdvisorConfig) -> anyhow::Result<()> {
    let llm = create_provider(&config.llm)?;
    let llm: Arc<dyn LlmProvider> = Arc::new(RateLimitedProvider::new(
        llm,
        Arc::new(RateLimiter::per_minute(config.requests_per_minute)),
    ));
    let search = Arc::new(
        TavilySearch::new(config.tavily_api_key.clone()).with_rate_limiter(Arc::new(
            RateLimiter::per_minute(config.requests_per_minute),
        )),
    );
    let index = build_index(config)?;

    let controller = WorkflowController::new(
        Advisor::new(llm.clone()),
        index,
        search,
        config.retry_policy(),
        config.controller_config(),
    );

    let store: Option<Arc<dyn SessionStore>> = match &config.session_db {
        Some(path) => Some(Arc::new(
            LibSqlSessionStore::new_local(path)
                .await
                .with_context(|| format!("opening session store at {}", path.display()))?,
        )),
        None => None,
    };

    eprintln!("🎓 Course Advisor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm.model_name());
    if let Some(path) = &config.session_db {
        eprintln!("   Sessions: {}", path.display());
    }
    eprintln!("   Type 'quit' or 'exit' to leave.\n");

    let channel = CliChannel::default();
    let mut session = resume_session(config, store.as_deref(), &channel).await?;

    if session.history.is_empty() {
        channel
            .broadcast("student", OutgoingResponse::text(controller.greeting()))
            .await?;
    } else if !session.stage.awaits_user() {
        // Interrupted between automated stages; finish them first.
        let exchange = controller.respond(session, "").await;
        for reply in exchange.replies {
            channel.broadcast("student", OutgoingResponse::text(reply)).await?;
        }
        session = exchange.session;
    }

    let mut messages = channel.start().await?;
    channel.ready().await?;

    while let Some(msg) = messages.next().await {
        let text = msg.content.trim();
        if text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("exit") {
            break;
        }
        if text == "/sessions" {
            list_sessions(store.as_deref(), &channel).await?;
            channel.ready().await?;
            continue;
        }

        if !text.is_empty() {
            channel
                .send_status(StatusUpdate::Thinking(session.stage.label().to_string()))
                .await?;
        }
        let exchange = controller.respond(session, text).await;
        session = exchange.session;
        for error in &exchange.errors {
            tracing::debug!(session = %session.id, %error, "Stage note");
        }
        for reply in exchange.replies {
            channel.respond(&msg, OutgoingResponse::text(reply)).await?;
        }

        if let Some(store) = &store
            && let Err(e) = store.save(&session).await
        {
            tracing::warn!(session = %session.id, error = %e, "Failed to save session");
            channel
                .send_status(StatusUpdate::Warning(format!("Could not save session: {e}")))
                .await?;
        }
        channel.ready().await?;
    }

    tracing::info!(session = %session.id, stage = %session.stage, "Session ended");
    Ok(())
}

async fn resume_session(
    config: &AdvisorConfig,
    store: Option<&dyn SessionStore>,
    channel: &CliChannel,
) -> anyhow::Result<SessionState> {
    let Some(id) = &config.resume else {
        return Ok(SessionState::new());
    };
    let Some(store) = store else {
        channel
            .send_status(StatusUpdate::Warning(
                "COURSE_ADVISOR_RESUME needs COURSE_ADVISOR_SESSION_DB; starting fresh.".into(),
            ))
            .await?;
        return Ok(SessionState::new());
    };
    match store.load(id).await? {
        Some(session) => {
            channel
                .send_status(StatusUpdate::Status(format!(
                    "Resumed session {id} ({})",
                    session.stage.label()
                )))
                .await?;
            Ok(session)
        }
        None => {
            channel
                .send_status(StatusUpdate::Warning(format!(
                    "No saved session {id}; starting fresh."
                )))
                .await?;
            Ok(SessionState::new())
        }
    }
}

async fn list_sessions(
    store: Option<&dyn SessionStore>,
    channel: &CliChannel,
) -> anyhow::Result<()> {
    let Some(store) = store else {
        channel
            .send_status(StatusUpdate::Status(
                "Session saving is off (set COURSE_ADVISOR_SESSION_DB).".into(),
            ))
            .await?;
        return Ok(());
    };
    let sessions = store.list_recent(10).await?;
    if sessions.is_empty() {
        channel
            .send_status(StatusUpdate::Status("No saved sessions.".into()))
            .await?;
    }
    for s in sessions {
        channel
            .send_status(StatusUpdate::Status(format!(
                "{}  {}  {}",
                s.id,
                s.stage.label(),
                s.updated_at.format("%Y-%m-%d %H:%M")
            )))
            .await?;
    }
    Ok(())
}
