use super::{Envelope, Queue};
use base64::Engine;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Talks to the durable task queue's REST API to create one task per
/// enqueue. The created task carries an `oidcToken` naming
/// `tasks_invoker_sa_email`; the queue provider mints and attaches the
/// signed identity token to its HTTP dispatch to `worker_url` itself — this
/// client never signs anything, it only asks for signing to happen.
pub struct CloudTasksQueue {
    client: reqwest::Client,
    worker_url: url::Url,
    project_id: String,
    region: String,
    tasks_invoker_sa_email: String,
}

impl CloudTasksQueue {
    pub fn new(
        worker_url: url::Url,
        project_id: String,
        region: String,
        tasks_invoker_sa_email: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            worker_url,
            project_id,
            region,
            tasks_invoker_sa_email,
        }
    }

    fn queue_url(&self) -> String {
        format!(
            "https://cloudtasks.googleapis.com/v2/projects/{}/locations/{}/queues/dealflow-jobs/tasks",
            self.project_id, self.region,
        )
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let resp: TokenResponse = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.access_token)
    }
}

#[async_trait::async_trait]
impl Queue for CloudTasksQueue {
    async fn enqueue(&self, envelope: Envelope) -> anyhow::Result<String> {
        let dispatch_url = self.worker_url.join("/tasks/dispatch")?;
        let body = serde_json::to_vec(&envelope)?;
        let body_b64 = base64::engine::general_purpose::STANDARD.encode(&body);

        let task = serde_json::json!({
            "task": {
                "httpRequest": {
                    "url": dispatch_url.as_str(),
                    "httpMethod": "POST",
                    "headers": { "Content-Type": "application/json" },
                    "body": body_b64,
                    "oidcToken": {
                        "serviceAccountEmail": self.tasks_invoker_sa_email,
                        "audience": dispatch_url.as_str(),
                    },
                },
            },
        });

        let access_token = self.access_token().await?;

        let response = self
            .client
            .post(self.queue_url())
            .bearer_auth(access_token)
            .json(&task)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to create task on durable queue ({status}): {text}");
        }

        #[derive(serde::Deserialize)]
        struct CreatedTask {
            name: String,
        }
        let created: CreatedTask = response.json().await.unwrap_or(CreatedTask {
            name: format!("queued-{}", uuid::Uuid::new_v4()),
        });

        Ok(created.name)
    }
}
