use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single rendered document block, the unit the markdown translator
/// (`crate::markdown`) and the document provider both speak.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocBlock {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    BulletItem { text: String },
    NumberedItem { text: String },
    Quote { text: String },
    Code { text: String, language: Option<String> },
    Callout { text: String },
    Divider,
}

#[async_trait]
pub trait DocsClient: Send + Sync {
    async fn create_page(
        &self,
        parent: Option<&str>,
        title: &str,
        blocks: Vec<DocBlock>,
    ) -> anyhow::Result<String>;

    async fn append_blocks(&self, page_id: &str, blocks: Vec<DocBlock>) -> anyhow::Result<()>;

    async fn clear_blocks(&self, page_id: &str) -> anyhow::Result<()>;

    async fn read_blocks(&self, page_id: &str) -> anyhow::Result<Vec<DocBlock>>;

    fn page_url(&self, page_id: &str) -> String;
}

pub struct HttpDocsClient {
    client: reqwest::Client,
    base_url: url::Url,
    access_token: String,
    workspace_url: url::Url,
}

impl HttpDocsClient {
    pub fn new(base_url: url::Url, access_token: String, workspace_url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
            workspace_url,
        }
    }
}

#[async_trait]
impl DocsClient for HttpDocsClient {
    async fn create_page(
        &self,
        parent: Option<&str>,
        title: &str,
        blocks: Vec<DocBlock>,
    ) -> anyhow::Result<String> {
        let url = self.base_url.join("pages")?;
        let response: serde_json::Value = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "parent": parent,
                "title": title,
                "blocks": blocks,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing page id in create response"))?
            .to_string())
    }

    async fn append_blocks(&self, page_id: &str, blocks: Vec<DocBlock>) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("pages/{page_id}/blocks"))?;
        self.client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "blocks": blocks }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn clear_blocks(&self, page_id: &str) -> anyhow::Result<()> {
        let url = self.base_url.join(&format!("pages/{page_id}/blocks"))?;
        self.client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_blocks(&self, page_id: &str) -> anyhow::Result<Vec<DocBlock>> {
        let url = self.base_url.join(&format!("pages/{page_id}/blocks"))?;
        let response: serde_json::Value = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(serde_json::from_value(response["blocks"].clone()).unwrap_or_default())
    }

    fn page_url(&self, page_id: &str) -> String {
        self.workspace_url
            .join(page_id)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}/{page_id}", self.workspace_url))
    }
}
