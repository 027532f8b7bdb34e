use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use super::driver::{BrowserDriver, PageState};

const RPC_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// External automation broker: a stdio subprocess speaking line-delimited
/// JSON-RPC with `browser.*` methods. Used when a direct debugger attach
/// is not possible.
pub struct BrokerDriver {
    _child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>,
    tx: mpsc::Sender<String>,
}

impl BrokerDriver {
    /// Spawn the broker from its configured command line.
    pub async fn spawn(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("empty broker command"))?;
        let args: Vec<&str> = parts.collect();

        info!("Starting browser broker: {}", command_line);
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning browser broker `{program}`"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("broker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("broker stdout unavailable"))?;

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.write_all(format!("{msg}\n").as_bytes()).await.is_err() {
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<RpcResponse>(&line) {
                    Ok(resp) => {
                        let mut map = pending_reader.lock().await;
                        if let Some(reply) = map.remove(&resp.id) {
                            let _ = reply.send(resp);
                        }
                    }
                    Err(_) => warn!("Unparsed broker line: {}", line),
                }
            }
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            _child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending,
            tx,
        })
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let req = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params: Some(params),
        };
        self.tx
            .send(serde_json::to_string(&req)?)
            .await
            .map_err(|_| anyhow!("broker connection closed"))?;

        let response = tokio::time::timeout(RPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow!("broker rpc `{method}` timed out"))?
            .map_err(|_| anyhow!("broker connection closed"))?;

        if let Some(error) = response.error {
            return Err(anyhow!("broker error on {method}: {error}"));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl BrowserDriver for BrokerDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.request("browser.navigate", serde_json::json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.request("browser.click", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.request(
            "browser.fill",
            serde_json::json!({ "selector": selector, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.request(
            "browser.waitFor",
            serde_json::json!({
                "selector": selector,
                "timeoutMs": timeout.as_millis() as u64,
            }),
        )
        .await?;
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.request("browser.press", serde_json::json!({ "key": key }))
            .await?;
        Ok(())
    }

    async fn extract_text(&self, selector: &str) -> Result<String> {
        let result = self
            .request(
                "browser.extractText",
                serde_json::json!({ "selector": selector }),
            )
            .await?;
        Ok(result
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let result = self
            .request("browser.screenshot", serde_json::json!({}))
            .await?;
        let data = result
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow!("broker screenshot returned no data"))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        self.request(
            "browser.evaluate",
            serde_json::json!({ "expression": expression }),
        )
        .await
    }

    async fn read_state(&self) -> Result<PageState> {
        let result = self
            .request("browser.readState", serde_json::json!({}))
            .await?;
        Ok(PageState {
            url: result
                .get("url")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
            title: result
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            visible_text: result
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        let _ = self.request("browser.close", serde_json::json!({})).await;
        if let Some(mut child) = self._child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}
