//! The hardest delivery-semantics handler. Walks a calendar's event feed
//! (incremental when a sync token exists, falling back to a full sync on
//! a 410) and materializes any `[deal]`-tagged events it finds.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repo;
use crate::handlers::{deal_materialize, HandlerCtx};
use crate::providers::calendar::{Attendee, CalendarError, CalendarEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub calendar_id: String,
    pub channel_id: String,
}

const DEAL_TAG: &str = "[deal]";

static TITLE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s*[—-]\s*(.+)$").unwrap());

pub async fn handle(ctx: &HandlerCtx, tenant_id: Uuid, payload: Payload) -> anyhow::Result<()> {
    let Some(channel) =
        repo::find_channel_by_channel_id(&ctx.pool, tenant_id, &payload.channel_id).await?
    else {
        tracing::info!(channel_id = %payload.channel_id, "channel not found, dropping sync");
        return Ok(());
    };

    let mut sync_token = channel.sync_token.clone();
    let mut page_token: Option<String> = None;
    let mut next_sync_token: Option<String> = None;

    loop {
        let page = match ctx
            .calendar
            .list_events(&payload.calendar_id, sync_token.as_deref(), page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(CalendarError::TokenGone) => {
                tracing::info!(calendar_id = %payload.calendar_id, "sync token gone, falling back to full sync");
                sync_token = None;
                page_token = None;
                continue;
            }
            Err(CalendarError::Other(err)) => return Err(err),
        };

        for event in page.events {
            if let Err(err) = process_event(ctx, tenant_id, &payload.calendar_id, &event).await {
                tracing::error!(?err, event_id = %event.event_id, "failed to process calendar event");
            }
        }

        if let Some(token) = page.next_sync_token {
            next_sync_token = Some(token);
        }

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    if let Some(token) = next_sync_token {
        if let Some(active) =
            repo::find_active_channel_for_calendar(&ctx.pool, tenant_id, &payload.calendar_id).await?
        {
            repo::set_channel_sync_token(&ctx.pool, active.id, &token).await?;
        }
    }

    Ok(())
}

async fn process_event(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    calendar_id: &str,
    event: &CalendarEvent,
) -> anyhow::Result<()> {
    if event.status == "cancelled" {
        return Ok(());
    }

    let tagged = contains_tag(&event.title) || event.description.as_deref().map(contains_tag).unwrap_or(false);
    if !tagged {
        return Ok(());
    }

    let (company, founder) = extract_company_and_founder(&event.title, &event.attendees);

    let deal = repo::upsert_deal(
        &ctx.pool,
        tenant_id,
        calendar_id,
        &event.event_id,
        Some(company.as_str()),
        founder.as_deref(),
    )
    .await?;

    if deal.task_record_gid.is_none() {
        deal_materialize::materialize(ctx, tenant_id, deal.id, &company, founder.as_deref()).await;
    }

    Ok(())
}

fn contains_tag(text: &str) -> bool {
    text.to_lowercase().contains(DEAL_TAG)
}

/// Extracts company and founder name from the event title only — the
/// description is never consulted for either the tag or this split.
fn extract_company_and_founder(title: &str, attendees: &[Attendee]) -> (String, Option<String>) {
    if let Some(captures) = TITLE_SPLIT.captures(title) {
        let company = captures.get(1).unwrap().as_str().trim().to_string();
        let founder = captures.get(2).unwrap().as_str().trim().to_string();
        return (strip_tag(&company), Some(strip_tag(&founder)));
    }

    let company = strip_tag(title);
    let founder = attendees
        .iter()
        .find(|a| !a.is_self)
        .and_then(|a| a.display_name.clone().or_else(|| a.email.clone()));

    (company, founder)
}

fn strip_tag(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let lower = text.to_lowercase();
    let mut rest = text;
    if let Some(idx) = lower.find(DEAL_TAG) {
        out.push_str(rest[..idx].trim_end());
        rest = &rest[idx + DEAL_TAG.len()..];
        out.push_str(rest);
        out.trim().to_string()
    } else {
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attendee(email: &str, is_self: bool) -> Attendee {
        Attendee {
            email: Some(email.to_string()),
            display_name: None,
            is_self,
        }
    }

    #[test]
    fn splits_company_and_founder_on_dash() {
        let (company, founder) = extract_company_and_founder("Acme — Jane [deal]", &[]);
        assert_eq!(company, "Acme");
        assert_eq!(founder.as_deref(), Some("Jane"));
    }

    #[test]
    fn falls_back_to_attendee_when_no_dash() {
        let (company, founder) = extract_company_and_founder(
            "[deal] Acme intro",
            &[attendee("me@firm.com", true), attendee("jane@acme.com", false)],
        );
        assert_eq!(company, "Acme intro");
        assert_eq!(founder.as_deref(), Some("jane@acme.com"));
    }

    #[test]
    fn tag_detection_is_case_insensitive() {
        assert!(contains_tag("[DEAL] Acme"));
        assert!(!contains_tag("Acme sync"));
    }
}
