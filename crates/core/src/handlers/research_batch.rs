//! The core concurrency primitive. Six agents run concurrently against
//! the LLM provider sharing one cancellation handle; a poller observes
//! `cancel_requested` every 5s and trips the handle. Document output is
//! always emitted in the fixed agent order, independent of completion
//! order.
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::repo;
use crate::handlers::HandlerCtx;
use crate::markdown::markdown_to_blocks;
use crate::providers::docs::DocBlock;
use crate::providers::llm::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub run_id: Uuid,
    pub deal_id: Uuid,
    pub company: String,
    pub founder: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleAgentPayload {
    pub run_id: Uuid,
    pub deal_id: Uuid,
    pub agent_key: String,
    pub company: String,
    pub founder: Option<String>,
    pub context: Option<String>,
}

/// `(key, human-readable title)`, in the fixed emission order.
pub const AGENT_KEYS: [(&str, &str); 6] = [
    ("market_tam", "Market & TAM"),
    ("competitors", "Competitive Landscape"),
    ("founder_background", "Founder Background"),
    ("risks_redflags", "Risks & Red Flags"),
    ("product_defensibility", "Product Defensibility"),
    ("traction_signals", "Traction Signals"),
];

struct AgentOutcome {
    key: &'static str,
    title: &'static str,
    result: Result<crate::providers::llm::LlmOutput, LlmError>,
}

pub async fn handle(ctx: &HandlerCtx, _tenant_id: Uuid, payload: Payload) -> anyhow::Result<()> {
    if repo::is_cancel_requested(&ctx.pool, payload.run_id).await? {
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let poller = spawn_cancel_poller(ctx.pool.clone(), payload.run_id, cancel.clone());

    let prompts: Vec<String> = AGENT_KEYS
        .iter()
        .map(|(key, _)| build_prompt(key, &payload.company, payload.founder.as_deref(), payload.context.as_deref()))
        .collect();

    let futures = AGENT_KEYS.iter().zip(prompts.iter()).map(|((key, title), prompt)| {
        let cancel = cancel.clone();
        async move {
            let result = ctx.llm.complete(&ctx.llm_model, prompt, cancel).await;
            AgentOutcome { key, title, result }
        }
    });

    let outcomes = futures::future::join_all(futures).await;

    poller.abort();

    let deal = repo::get_deal(&ctx.pool, payload.deal_id).await?;
    let Some(research_page) = deal.doc_ids_map().get("research").cloned() else {
        tracing::warn!(deal_id = %payload.deal_id, "deal has no research page, dropping output");
        return Ok(());
    };

    let mut blocks = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(output) => {
                blocks.push(DocBlock::Heading {
                    level: 2,
                    text: outcome.title.to_string(),
                });
                blocks.extend(markdown_to_blocks(&output.body_markdown));
                if !output.citations.is_empty() {
                    blocks.push(DocBlock::Paragraph {
                        text: format!("Sources: {}", output.citations.join(", ")),
                    });
                }
                blocks.push(DocBlock::Divider);
            }
            Err(err) => {
                tracing::warn!(agent_key = outcome.key, ?err, "research agent failed, skipping section");
            }
        }
    }

    if !blocks.is_empty() {
        ctx.docs.append_blocks(&research_page, blocks).await?;
    }

    Ok(())
}

/// Handles a standalone `RESEARCH_AGENT` job. Declared for dispatch
/// exhaustiveness alongside `RESEARCH_BATCH`; reuses the same prompt
/// construction and appends its single section directly.
pub async fn handle_single_agent(
    ctx: &HandlerCtx,
    _tenant_id: Uuid,
    payload: SingleAgentPayload,
) -> anyhow::Result<()> {
    if repo::is_cancel_requested(&ctx.pool, payload.run_id).await? {
        return Ok(());
    }

    let Some((key, title)) = AGENT_KEYS.iter().find(|(key, _)| *key == payload.agent_key) else {
        return Err(anyhow::anyhow!("unknown agent key: {}", payload.agent_key));
    };

    let prompt = build_prompt(key, &payload.company, payload.founder.as_deref(), payload.context.as_deref());
    let cancel = CancellationToken::new();
    let result = ctx.llm.complete(&ctx.llm_model, &prompt, cancel).await;

    let deal = repo::get_deal(&ctx.pool, payload.deal_id).await?;
    let Some(research_page) = deal.doc_ids_map().get("research").cloned() else {
        return Ok(());
    };

    match result {
        Ok(output) => {
            let mut blocks = vec![DocBlock::Heading {
                level: 2,
                text: title.to_string(),
            }];
            blocks.extend(markdown_to_blocks(&output.body_markdown));
            blocks.push(DocBlock::Divider);
            ctx.docs.append_blocks(&research_page, blocks).await?;
        }
        Err(err) => {
            tracing::warn!(agent_key = *key, ?err, "single research agent failed");
        }
    }

    Ok(())
}

fn spawn_cancel_poller(
    pool: sqlx::PgPool,
    run_id: Uuid,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            match repo::is_cancel_requested(&pool, run_id).await {
                Ok(true) => {
                    cancel.cancel();
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(?err, "cancel poll failed, retrying next tick");
                }
            }
        }
    })
}

fn build_prompt(agent_key: &str, company: &str, founder: Option<&str>, context: Option<&str>) -> String {
    let founder = founder.unwrap_or("unknown");
    let context = context.unwrap_or("");
    format!(
        "You are a venture diligence analyst. Research angle: {agent_key}.\nCompany: {company}\nFounder: {founder}\nContext:\n{context}\n\nWrite a concise markdown section."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_keys_are_in_fixed_order() {
        let keys: Vec<&str> = AGENT_KEYS.iter().map(|(key, _)| *key).collect();
        assert_eq!(
            keys,
            vec![
                "market_tam",
                "competitors",
                "founder_background",
                "risks_redflags",
                "product_defensibility",
                "traction_signals",
            ]
        );
    }

    #[test]
    fn prompt_includes_agent_angle_and_company() {
        let prompt = build_prompt("market_tam", "Acme", Some("Jane"), None);
        assert!(prompt.contains("market_tam"));
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("Jane"));
    }
}
