use std::path::PathBuf;
use anyhow::{Result, anyhow, Context as AnyhowContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use crate::actions::offload::{Job, JobRunner};
use crate::runtime::context::JobContext;
use crate::runtime::runner::{Runner, RunnerFactory};
use crate::trigger::Asset;

/// Streams a URL into a file. Completion follows the received byte count when
/// the server announces a length; pausing holds the transfer between chunks.
#[derive(Debug)]
pub struct DownloadFactory {
    client: Client,
}

impl DownloadFactory {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn required<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
        params.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: {}", key))
    }
}

impl Default for DownloadFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerFactory for DownloadFactory {
    fn name(&self) -> &str {
        "download"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::required(params, "url")?;
        Self::required(params, "dest")?;
        Ok(())
    }

    fn create(&self, _asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        let url = Self::required(params, "url")?;
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid url: {}", url))?;
        Ok(Box::new(JobRunner::new(DownloadJob {
            client: self.client.clone(),
            url,
            dest: PathBuf::from(Self::required(params, "dest")?),
        })))
    }
}

pub struct DownloadJob {
    client: Client,
    url: reqwest::Url,
    dest: PathBuf,
}

#[async_trait(?Send)]
impl Job for DownloadJob {
    async fn run(&mut self, ctx: JobContext) -> Result<Value> {
        ctx.status(format!("Connecting to {}", self.url));
        let mut response = self.client.get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let total = response.content_length().filter(|len| *len > 0);

        if let Some(parent) = self.dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::File::create(&self.dest).await
            .with_context(|| format!("Failed to create {}", self.dest.display()))?;

        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            ctx.checkpoint().await;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(total) = total {
                ctx.progress(received as f64 / total as f64);
            }
            ctx.status(format!("{} bytes received", received));
        }
        file.flush().await?;

        debug!(url = %self.url, bytes = received, "Download finished");
        Ok(json!({
            "path": self.dest.display().to_string(),
            "bytes": received
        }))
    }

    fn pausable(&self) -> bool {
        true
    }
}
