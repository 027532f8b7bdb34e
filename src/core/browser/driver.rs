use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Snapshot of the page used for checkpoint detection and extraction.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub visible_text: String,
}

/// Step-level capability surface shared by both transports (direct CDP
/// attach and the external automation broker). The planner and executor
/// only ever talk to this trait.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;
    async fn press(&self, key: &str) -> Result<()>;
    async fn extract_text(&self, selector: &str) -> Result<String>;
    async fn screenshot(&self) -> Result<Vec<u8>>;
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;
    async fn read_state(&self) -> Result<PageState>;
    async fn close(&self) -> Result<()>;
}
