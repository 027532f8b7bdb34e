use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::driver::{BrowserDriver, PageState};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Direct Chrome DevTools Protocol attach over the page websocket.
/// Request/response correlation uses an id -> oneshot map; protocol
/// events are ignored.
pub struct CdpDriver {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>,
    tx: mpsc::Sender<String>,
    target_id: String,
    http_base: String,
}

impl CdpDriver {
    /// Open a fresh `about:blank` target on the debugger at `http_base`
    /// (e.g. `http://127.0.0.1:9222`) and attach to its websocket.
    pub async fn connect(http_base: &str) -> Result<Self> {
        let client = reqwest::Client::new();
        let new_url = format!("{}/json/new?about:blank", http_base.trim_end_matches('/'));

        // Chrome 111+ wants PUT here; older builds only answer GET.
        let target: serde_json::Value = match client
            .put(&new_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp.json().await?,
            _ => client
                .get(&new_url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
                .context("no reachable debugger")?
                .json()
                .await?,
        };

        let ws_url = target
            .get("webSocketDebuggerUrl")
            .and_then(|u| u.as_str())
            .ok_or_else(|| anyhow!("debugger did not expose a websocket url"))?
            .to_string();
        let target_id = target
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string();

        let (ws, _) = connect_async(ws_url.as_str())
            .await
            .context("debugger websocket connect failed")?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else { continue };
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                if let Some(id) = value.get("id").and_then(|i| i.as_u64()) {
                    let mut map = pending_reader.lock().await;
                    if let Some(reply) = map.remove(&id) {
                        let _ = reply.send(value);
                    }
                } else {
                    debug!("CDP event: {}", text.chars().take(120).collect::<String>());
                }
            }
            // Socket gone; drop every waiter.
            pending_reader.lock().await.clear();
        });

        let driver = Self {
            next_id: AtomicU64::new(1),
            pending,
            tx,
            target_id,
            http_base: http_base.trim_end_matches('/').to_string(),
        };
        driver.send("Page.enable", serde_json::json!({})).await?;
        driver.send("Runtime.enable", serde_json::json!({})).await?;
        Ok(driver)
    }

    async fn send(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let frame = serde_json::json!({ "id": id, "method": method, "params": params });
        self.tx
            .send(frame.to_string())
            .await
            .map_err(|_| anyhow!("debugger connection closed"))?;

        let response = tokio::time::timeout(RPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow!("debugger rpc `{method}` timed out"))?
            .map_err(|_| anyhow!("debugger connection closed"))?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("debugger error on {method}: {error}"));
        }
        Ok(response.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Evaluate an expression and return its JSON value.
    async fn eval(&self, expression: &str) -> Result<serde_json::Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .unwrap_or("evaluation failed");
            return Err(anyhow!("page script error: {text}"));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Selector resolution shared by every element op: CSS by default,
    /// with `text=`, `css=` and `xpath=` engines.
    fn query_js(selector: &str) -> String {
        let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
        format!(
            r#"(function() {{
  let sel = {quoted};
  function q(sel) {{
    if (sel.startsWith('text=')) {{
      const needle = sel.slice(5).trim().toLowerCase();
      const nodes = document.querySelectorAll(
        'a,button,input,select,textarea,label,span,div,[role="button"],[role="link"]');
      for (const n of nodes) {{
        const t = ((n.innerText || n.value || n.getAttribute('aria-label') || '') + '')
          .trim().toLowerCase();
        if (t && (t === needle || t.includes(needle))) return n;
      }}
      return null;
    }}
    if (sel.startsWith('xpath=')) {{
      return document.evaluate(sel.slice(6), document, null,
        XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    }}
    if (sel.startsWith('css=')) sel = sel.slice(4);
    return document.querySelector(sel);
  }}
  return q(sel);
}})()"#
        )
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.send("Page.navigate", serde_json::json!({ "url": url }))
            .await?;

        let deadline = tokio::time::Instant::now() + NAVIGATION_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("navigation to {url} timed out"));
            }
            let state = self.eval("document.readyState").await.unwrap_or_default();
            if state.as_str() == Some("complete") || state.as_str() == Some("interactive") {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let js = format!(
            "(function() {{ const el = {}; if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            Self::query_js(selector)
        );
        let clicked = self.eval(&js).await?;
        if clicked.as_bool() != Some(true) {
            return Err(anyhow!("no element matched selector `{selector}`"));
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let quoted_value = serde_json::to_string(value)?;
        let js = format!(
            "(function() {{ const el = {}; if (!el) return false; \
             el.focus(); el.value = {quoted_value}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true; }})()",
            Self::query_js(selector)
        );
        let filled = self.eval(&js).await?;
        if filled.as_bool() != Some(true) {
            return Err(anyhow!("no element matched selector `{selector}`"));
        }
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let js = format!("(function() {{ return {} !== null; }})()", Self::query_js(selector));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval(&js).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("timed out waiting for `{selector}`"));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn press(&self, key: &str) -> Result<()> {
        for event_type in ["keyDown", "keyUp"] {
            self.send(
                "Input.dispatchKeyEvent",
                serde_json::json!({
                    "type": event_type,
                    "key": key,
                    "text": if key.len() == 1 { key } else { "" },
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn extract_text(&self, selector: &str) -> Result<String> {
        let js = format!(
            "(function() {{ const el = {}; \
             return el ? (el.innerText || el.value || '') : null; }})()",
            Self::query_js(selector)
        );
        match self.eval(&js).await? {
            serde_json::Value::String(text) => Ok(text),
            serde_json::Value::Null => Err(anyhow!("no element matched selector `{selector}`")),
            other => Ok(other.to_string()),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let result = self
            .send(
                "Page.captureScreenshot",
                serde_json::json!({ "format": "png" }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow!("screenshot returned no data"))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        self.eval(expression).await
    }

    async fn read_state(&self) -> Result<PageState> {
        let value = self
            .eval(
                "(function() { return { url: location.href, title: document.title, \
                 text: (document.body ? document.body.innerText : '').slice(0, 4000) }; })()",
            )
            .await?;
        Ok(PageState {
            url: value
                .get("url")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
            title: value
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            visible_text: value
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.target_id.is_empty() {
            let url = format!("{}/json/close/{}", self.http_base, self.target_id);
            if let Err(e) = reqwest::Client::new()
                .get(&url)
                .timeout(Duration::from_secs(3))
                .send()
                .await
            {
                warn!("Could not close debugger target: {}", e);
            }
        }
        Ok(())
    }
}
