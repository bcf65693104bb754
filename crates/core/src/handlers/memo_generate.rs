//! Same cancellation pattern as `research_batch`, collapsed to a single
//! LLM call synthesizing a fixed ten-section investment memo.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::repo;
use crate::handlers::HandlerCtx;
use crate::markdown::markdown_to_blocks;
use crate::providers::docs::DocBlock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub run_id: Uuid,
    pub deal_id: Uuid,
}

const MEMO_SECTIONS: [&str; 10] = [
    "Executive Summary",
    "Market & TAM",
    "Product",
    "Competitive Landscape",
    "Team",
    "Traction",
    "Financials",
    "Risks",
    "Deal Terms",
    "Recommendation",
];

pub async fn handle(ctx: &HandlerCtx, _tenant_id: Uuid, payload: Payload) -> anyhow::Result<()> {
    if repo::is_cancel_requested(&ctx.pool, payload.run_id).await? {
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let poller = spawn_cancel_poller(ctx.pool.clone(), payload.run_id, cancel.clone());

    let deal = repo::get_deal(&ctx.pool, payload.deal_id).await?;
    let prompt = build_prompt(deal.company.as_deref().unwrap_or("the company"), deal.founder.as_deref());

    let result = ctx.llm.complete(&ctx.llm_model, &prompt, cancel).await;
    poller.abort();

    let Some(memo_page) = deal.doc_ids_map().get("memo").cloned() else {
        tracing::warn!(deal_id = %payload.deal_id, "deal has no memo page, dropping output");
        return Ok(());
    };

    match result {
        Ok(output) => {
            let mut blocks = vec![DocBlock::Callout {
                text: format!("Generated on {}", Utc::now().format("%Y-%m-%d")),
            }];
            blocks.extend(markdown_to_blocks(&output.body_markdown));
            blocks.push(DocBlock::Divider);
            blocks.push(DocBlock::Callout {
                text: "This memo was generated by an automated agent. Review before circulating.".to_string(),
            });
            ctx.docs.append_blocks(&memo_page, blocks).await?;
        }
        Err(err) => {
            tracing::warn!(?err, "memo generation failed or was cancelled");
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
        interval.tick().await;
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

fn build_prompt(company: &str, founder: Option<&str>) -> String {
    let founder = founder.unwrap_or("unknown");
    let outline = MEMO_SECTIONS.join(", ");
    format!(
        "Write an investment committee memo for {company}, founded by {founder}.\nUse exactly these sections, in order: {outline}.\nRespond in markdown with a `##` heading per section."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_has_ten_fixed_sections() {
        assert_eq!(MEMO_SECTIONS.len(), 10);
        assert_eq!(MEMO_SECTIONS[0], "Executive Summary");
        assert_eq!(MEMO_SECTIONS[9], "Recommendation");
    }

    #[test]
    fn prompt_names_company_and_founder() {
        let prompt = build_prompt("Acme", Some("Jane"));
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("Jane"));
    }
}
