use super::{Envelope, Queue};

/// Direct-HTTP queue for local development: posts straight to the worker's
/// dispatch endpoint, skipping both the durable-queue provider and OIDC
/// verification.
pub struct LocalHttpQueue {
    client: reqwest::Client,
    worker_url: url::Url,
}

impl LocalHttpQueue {
    pub fn new(worker_url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            worker_url,
        }
    }
}

#[async_trait::async_trait]
impl Queue for LocalHttpQueue {
    async fn enqueue(&self, envelope: Envelope) -> anyhow::Result<String> {
        let dispatch_url = self.worker_url.join("/tasks/dispatch")?;
        let task_name = format!("local-{}", uuid::Uuid::new_v4());

        let response = self
            .client
            .post(dispatch_url)
            .json(&envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("local dispatch to worker failed with {status}: {body}");
        }

        Ok(task_name)
    }
}
