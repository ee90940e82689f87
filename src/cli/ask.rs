//! CLI `ask` command: run one turn through the pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};

use zenith::config::ZenithConfig;
use zenith::orchestrator::Orchestrator;

pub struct AskArgs {
    pub user: String,
    pub session: Option<String>,
    pub persona: Option<PathBuf>,
    pub json: bool,
    pub text: String,
}

/// Print the answer to stdout, then wait for profile extraction so the
/// process does not exit under it.
pub async fn ask(config: &ZenithConfig, args: AskArgs) -> Result<()> {
    let persona = match &args.persona {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read persona file: {}", path.display()))?,
        ),
        None => None,
    };
    let session = args
        .session
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let orchestrator = Orchestrator::from_config(config)?;
    let answer = match orchestrator
        .handle(&args.user, &session, &args.text, persona.as_deref())
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            tracing::error!(session = %session, error = %e, "request failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.answer_text);
    }
    eprintln!(
        "session {session} | score {} | {:?} after {} attempt(s)",
        answer.verdict_summary.score, answer.verdict_summary.status, answer.verdict_summary.attempts
    );

    if let Some(extraction) = answer.extraction {
        if let Err(e) = extraction.await {
            tracing::warn!(error = %e, "profile extraction task did not finish");
        }
    }
    Ok(())
}
