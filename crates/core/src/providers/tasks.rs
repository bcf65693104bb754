use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMembership {
    pub section_gid: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTaskFields {
    pub name: String,
    pub notes: String,
}

#[async_trait]
pub trait TaskClient: Send + Sync {
    async fn create_task(
        &self,
        project_gid: &str,
        section_gid: &str,
        fields: NewTaskFields,
    ) -> anyhow::Result<String>;

    async fn get_membership(
        &self,
        task_gid: &str,
        project_gid: &str,
    ) -> anyhow::Result<TaskMembership>;

    async fn update_notes(&self, task_gid: &str, notes: &str) -> anyhow::Result<()>;

    async fn create_subtask(&self, parent_gid: &str, name: &str) -> anyhow::Result<String>;

    async fn complete_task(&self, task_gid: &str) -> anyhow::Result<()>;

    async fn register_webhook(&self, project_gid: &str, target_url: &str) -> anyhow::Result<String>;

    async fn deregister_webhook(&self, webhook_gid: &str) -> anyhow::Result<()>;
}

pub struct HttpTaskClient {
    client: reqwest::Client,
    base_url: url::Url,
    access_token: String,
}

impl HttpTaskClient {
    pub fn new(base_url: url::Url, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }
}

#[async_trait]
impl TaskClient for HttpTaskClient {
    async fn create_task(
        &self,
        project_gid: &str,
        section_gid: &str,
        fields: NewTaskFields,
    ) -> anyhow::Result<String> {
        let url = self.base_url.join("tasks")?;
        let response: serde_json::Value = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "data": {
                    "name": fields.name,
                    "notes": fields.notes,
                    "projects": [project_gid],
                    "memberships": [{ "project": project_gid, "section": section_gid }],
                }
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response["data"]["gid"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing task gid in create response"))?
            .to_string())
    }

    async fn get_membership(
        &self,
        task_gid: &str,
        project_gid: &str,
    ) -> anyhow::Result<TaskMembership> {
        let url = self.base_url.join(&format!("tasks/{task_gid}"))?;
        let response: serde_json::Value = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("opt_fields", "memberships.section,modified_at")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let memberships = response["data"]["memberships"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let membership = memberships
            .into_iter()
            .find(|m| m["project"]["gid"].as_str() == Some(project_gid))
            .ok_or_else(|| anyhow::anyhow!("task {task_gid} has no membership in {project_gid}"))?;

        Ok(TaskMembership {
            section_gid: membership["section"]["gid"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("membership missing section gid"))?
                .to_string(),
            modified_at: response["data"]["modified_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| anyhow::anyhow!("task missing modified_at"))?,
        })
    }

    async fn update_notes(&self, task_gid: &str, notes: &str) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("tasks/{task_gid}"))?;
        self.client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "data": { "notes": notes } }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_subtask(&self, parent_gid: &str, name: &str) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join(&format!("tasks/{parent_gid}/subtasks"))?;
        let response: serde_json::Value = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "data": { "name": name } }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response["data"]["gid"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing subtask gid"))?
            .to_string())
    }

    async fn complete_task(&self, task_gid: &str) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("tasks/{task_gid}"))?;
        self.client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "data": { "completed": true } }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn register_webhook(&self, project_gid: &str, target_url: &str) -> anyhow::Result<String> {
        let url = self.base_url.join("webhooks")?;
        let response: serde_json::Value = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "data": { "resource": project_gid, "target": target_url }
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response["data"]["gid"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing webhook gid"))?
            .to_string())
    }

    async fn deregister_webhook(&self, webhook_gid: &str) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("webhooks/{webhook_gid}"))?;
        self.client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
