//! In-memory fakes for the four provider traits, used by `tests/`. Each
//! fake is deliberately minimal: enough state to assert on what a handler
//! did, and enough configurability to script failures or cancellation
//! without a network dependency.
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::calendar::{Attendee, CalendarClient, CalendarError, Channel, CalendarEvent, EventPage};
use super::docs::{DocBlock, DocsClient};
use super::llm::{LlmClient, LlmError, LlmOutput};
use super::tasks::{NewTaskFields, TaskClient, TaskMembership};

/// A scripted calendar: one fixed page of events per `(calendar_id,
/// sync_token)` lookup, with an optional one-shot `TokenGone` to exercise
/// the full-sync fallback.
#[derive(Default)]
pub struct FakeCalendarClient {
    pub pages: Mutex<BTreeMap<String, Vec<CalendarEvent>>>,
    pub next_sync_token: Mutex<Option<String>>,
    pub token_gone_once: Mutex<bool>,
    pub watches: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
}

impl FakeCalendarClient {
    pub fn with_events(calendar_id: &str, events: Vec<CalendarEvent>) -> Self {
        let fake = Self::default();
        fake.pages.lock().unwrap().insert(calendar_id.to_string(), events);
        fake
    }

    pub fn fail_next_incremental_sync(&self) {
        *self.token_gone_once.lock().unwrap() = true;
    }
}

#[async_trait]
impl CalendarClient for FakeCalendarClient {
    async fn watch(&self, calendar_id: &str) -> anyhow::Result<Channel> {
        self.watches.lock().unwrap().push(calendar_id.to_string());
        Ok(Channel {
            channel_id: format!("chan-{}", uuid::Uuid::new_v4()),
            resource_id: format!("res-{}", uuid::Uuid::new_v4()),
            expiration_ms: Utc::now().timestamp_millis() + 7 * 24 * 60 * 60 * 1000,
        })
    }

    async fn stop(&self, channel_id: &str, _resource_id: &str) -> anyhow::Result<()> {
        self.stops.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<EventPage, CalendarError> {
        if sync_token.is_some() {
            let mut gone = self.token_gone_once.lock().unwrap();
            if *gone {
                *gone = false;
                return Err(CalendarError::TokenGone);
            }
        }

        let events = self
            .pages
            .lock()
            .unwrap()
            .get(calendar_id)
            .cloned()
            .unwrap_or_default();

        Ok(EventPage {
            events,
            next_page_token: None,
            next_sync_token: self.next_sync_token.lock().unwrap().clone(),
        })
    }
}

pub fn fake_event(event_id: &str, title: &str, status: &str, attendees: Vec<Attendee>) -> CalendarEvent {
    CalendarEvent {
        event_id: event_id.to_string(),
        status: status.to_string(),
        title: title.to_string(),
        description: None,
        attendees,
        updated: Utc::now(),
    }
}

/// Task-manager fake. `memberships` is keyed by `task_gid` and returned
/// verbatim by `get_membership` regardless of `project_gid`, which is
/// enough for the single-project tests this crate needs.
#[derive(Default)]
pub struct FakeTaskClient {
    pub memberships: Mutex<BTreeMap<String, TaskMembership>>,
    pub created_tasks: Mutex<Vec<(String, String, NewTaskFields)>>,
    pub subtasks: Mutex<Vec<(String, String)>>,
    pub notes_updates: Mutex<Vec<(String, String)>>,
    pub completed: Mutex<Vec<String>>,
}

impl FakeTaskClient {
    pub fn with_membership(task_gid: &str, section_gid: &str, modified_at: DateTime<Utc>) -> Self {
        let fake = Self::default();
        fake.memberships.lock().unwrap().insert(
            task_gid.to_string(),
            TaskMembership {
                section_gid: section_gid.to_string(),
                modified_at,
            },
        );
        fake
    }

    pub fn set_membership(&self, task_gid: &str, section_gid: &str, modified_at: DateTime<Utc>) {
        self.memberships.lock().unwrap().insert(
            task_gid.to_string(),
            TaskMembership {
                section_gid: section_gid.to_string(),
                modified_at,
            },
        );
    }
}

#[async_trait]
impl TaskClient for FakeTaskClient {
    async fn create_task(
        &self,
        project_gid: &str,
        section_gid: &str,
        fields: NewTaskFields,
    ) -> anyhow::Result<String> {
        let gid = format!("task-{}", uuid::Uuid::new_v4());
        self.created_tasks
            .lock()
            .unwrap()
            .push((project_gid.to_string(), section_gid.to_string(), fields));
        Ok(gid)
    }

    async fn get_membership(&self, task_gid: &str, _project_gid: &str) -> anyhow::Result<TaskMembership> {
        self.memberships
            .lock()
            .unwrap()
            .get(task_gid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no fake membership configured for {task_gid}"))
    }

    async fn update_notes(&self, task_gid: &str, notes: &str) -> anyhow::Result<()> {
        self.notes_updates
            .lock()
            .unwrap()
            .push((task_gid.to_string(), notes.to_string()));
        Ok(())
    }

    async fn create_subtask(&self, parent_gid: &str, name: &str) -> anyhow::Result<String> {
        self.subtasks
            .lock()
            .unwrap()
            .push((parent_gid.to_string(), name.to_string()));
        Ok(format!("subtask-{}", uuid::Uuid::new_v4()))
    }

    async fn complete_task(&self, task_gid: &str) -> anyhow::Result<()> {
        self.completed.lock().unwrap().push(task_gid.to_string());
        Ok(())
    }

    async fn register_webhook(&self, _project_gid: &str, _target_url: &str) -> anyhow::Result<String> {
        Ok(format!("webhook-{}", uuid::Uuid::new_v4()))
    }

    async fn deregister_webhook(&self, _webhook_gid: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Document workspace fake: pages are just ids handed back in creation
/// order, with blocks accumulated in a `Vec` per page so tests can assert
/// on both ordering and content.
#[derive(Default)]
pub struct FakeDocsClient {
    pub pages: Mutex<BTreeMap<String, Vec<DocBlock>>>,
    next_id: Mutex<u64>,
}

impl FakeDocsClient {
    pub fn blocks_of(&self, page_id: &str) -> Vec<DocBlock> {
        self.pages.lock().unwrap().get(page_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DocsClient for FakeDocsClient {
    async fn create_page(
        &self,
        _parent: Option<&str>,
        _title: &str,
        blocks: Vec<DocBlock>,
    ) -> anyhow::Result<String> {
        let mut next_id = self.next_id.lock().unwrap();
        let page_id = format!("page-{next_id}");
        *next_id += 1;
        self.pages.lock().unwrap().insert(page_id.clone(), blocks);
        Ok(page_id)
    }

    async fn append_blocks(&self, page_id: &str, blocks: Vec<DocBlock>) -> anyhow::Result<()> {
        self.pages
            .lock()
            .unwrap()
            .entry(page_id.to_string())
            .or_default()
            .extend(blocks);
        Ok(())
    }

    async fn clear_blocks(&self, page_id: &str) -> anyhow::Result<()> {
        self.pages.lock().unwrap().insert(page_id.to_string(), Vec::new());
        Ok(())
    }

    async fn read_blocks(&self, page_id: &str) -> anyhow::Result<Vec<DocBlock>> {
        Ok(self.blocks_of(page_id))
    }

    fn page_url(&self, page_id: &str) -> String {
        format!("https://docs.fake/{page_id}")
    }
}

/// LLM fake: each agent key can be scripted to succeed, fail, or block
/// until the cancellation token fires, exercised against `research_batch`'s
/// cancellation handling.
#[derive(Default)]
pub struct FakeLlmClient {
    scripts: Mutex<BTreeMap<String, Script>>,
    pub calls: Mutex<Vec<String>>,
}

enum Script {
    Succeed(LlmOutput),
    Fail,
    BlockUntilCancelled,
}

impl FakeLlmClient {
    pub fn succeed(&self, agent_key: &str, body_markdown: &str) {
        self.scripts.lock().unwrap().insert(
            agent_key.to_string(),
            Script::Succeed(LlmOutput {
                body_markdown: body_markdown.to_string(),
                citations: Vec::new(),
            }),
        );
    }

    pub fn fail(&self, agent_key: &str) {
        self.scripts.lock().unwrap().insert(agent_key.to_string(), Script::Fail);
    }

    pub fn block_until_cancelled(&self, agent_key: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(agent_key.to_string(), Script::BlockUntilCancelled);
    }

    /// `research_batch::build_prompt` embeds the literal agent key in its
    /// prompt text; `memo_generate`'s prompt contains none of them, so it
    /// falls through to the default stub below.
    fn agent_key_from_prompt<'a>(&self, prompt: &'a str) -> &'a str {
        crate::handlers::research_batch::AGENT_KEYS
            .iter()
            .map(|(key, _)| *key)
            .find(|key| prompt.contains(key))
            .unwrap_or(prompt)
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<LlmOutput, LlmError> {
        let agent_key = self.agent_key_from_prompt(prompt).to_string();
        self.calls.lock().unwrap().push(agent_key.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(&agent_key)
            .unwrap_or(Script::Succeed(LlmOutput {
                body_markdown: format!("stub output for {agent_key}"),
                citations: Vec::new(),
            }));

        match script {
            Script::Succeed(output) => Ok(output),
            Script::Fail => Err(LlmError::Other(anyhow::anyhow!("fake agent failure"))),
            Script::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(LlmError::Cancelled)
            }
        }
    }
}
