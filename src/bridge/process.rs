use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, warn};

use super::{ServerTool, TEMP_DIR_PLACEHOLDER, ToolTransport};
use crate::config::ServerConfig;
use crate::error::ToolInvokeError;

const PROTOCOL_VERSION: &str = "2025-06-18";
const EXIT_GRACE: Duration = Duration::from_secs(5);

type Responder = oneshot::Sender<Result<Value, ToolInvokeError>>;

/// Replaces every `${TEMP_DIR}` occurrence in `args` with `scratch_dir`.
pub fn substitute_temp_dir(args: &[String], scratch_dir: &Path) -> Vec<String> {
    let replacement = scratch_dir.to_string_lossy();
    args.iter()
        .map(|arg| arg.replace(TEMP_DIR_PLACEHOLDER, &replacement))
        .collect()
}

/// A tool server subprocess speaking JSON-RPC over newline-delimited stdio.
pub struct ToolServerProcess {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    name: String,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<ServerTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl ToolServerProcess {
    /// Spawns the server and completes the initialize handshake.
    pub async fn start(
        name: &str,
        config: &ServerConfig,
        scratch_dir: &Path,
    ) -> Result<Self, ToolInvokeError> {
        let args = substitute_temp_dir(&config.args, scratch_dir);
        info!(
            server = %name,
            "starting tool server: {} {}",
            config.command,
            args.join(" ")
        );

        let mut command = Command::new(&config.command);
        command
            .args(&args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ToolInvokeError::Spawn {
            server: name.to_string(),
            source,
        })?;

        let transport_error = |message: &str| ToolInvokeError::Transport {
            server: name.to_string(),
            message: message.to_string(),
        };
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| transport_error("failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| transport_error("failed to capture server stdout"))?;

        let inner = Arc::new(ProcessInner {
            name: name.to_string(),
            child: AsyncMutex::new(Some(child)),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        let process = Self { inner };
        if let Err(err) = process.inner.initialize().await {
            if let Err(close_err) = process.inner.shutdown().await {
                debug!(server = %name, error = %close_err, "failed to stop tool server");
            }
            return Err(err);
        }
        Ok(process)
    }
}

#[async_trait]
impl ToolTransport for ToolServerProcess {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn list_tools(&self) -> Result<Vec<ServerTool>, ToolInvokeError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.inner.send_request("tools/list", params).await?;
            let page: ToolsPage =
                serde_json::from_value(result).map_err(|source| ToolInvokeError::InvalidJson {
                    server: self.inner.name.clone(),
                    source,
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolInvokeError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        self.inner.send_request("tools/call", params).await
    }

    async fn disconnect(&self) -> Result<(), ToolInvokeError> {
        self.inner.shutdown().await
    }
}

impl ProcessInner {
    async fn initialize(&self) -> Result<(), ToolInvokeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        self.send_request("initialize", params).await?;
        self.send_notification("notifications/initialized", json!({}))
            .await
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    if let Err(err) = self.process_inbound_message(value).await {
                        warn!(
                            server = %self.name,
                            %err,
                            "failed to process message from tool server"
                        );
                    }
                }
                Err(source) => {
                    debug!(
                        server = %self.name,
                        line = trimmed,
                        %source,
                        "skipping non-JSON line from tool server"
                    );
                }
            }
        }

        self.writer.lock().await.take();
        self.fail_all_pending(|server| ToolInvokeError::Terminated { server })
            .await;
    }

    async fn process_inbound_message(&self, value: Value) -> Result<(), ToolInvokeError> {
        match (value.get("id").cloned(), value.get("method").and_then(Value::as_str)) {
            (Some(id), Some(method)) => self.handle_server_request(id, method).await,
            (Some(id), None) => {
                self.handle_response(&id, &value).await;
                Ok(())
            }
            (None, Some(method)) => {
                debug!(server = %self.name, method, "received notification from tool server");
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    async fn handle_response(&self, id: &Value, value: &Value) {
        let key = match id {
            Value::String(value) => value.clone(),
            Value::Number(number) => number.to_string(),
            _ => return,
        };

        let Some(sender) = self.pending.lock().await.remove(&key) else {
            debug!(
                server = %self.name,
                response_id = key,
                "received response for unknown request"
            );
            return;
        };

        let outcome = match value.get("error") {
            Some(error) => Err(ToolInvokeError::Rpc {
                server: self.name.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    async fn handle_server_request(&self, id: Value, method: &str) -> Result<(), ToolInvokeError> {
        if method == "ping" {
            return self
                .write_message(&json!({ "jsonrpc": "2.0", "id": id, "result": {} }))
                .await;
        }

        warn!(server = %self.name, method, "tool server sent unsupported request");
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": -32601,
                "message": format!("client does not implement method '{method}'"),
            }
        }))
        .await
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolInvokeError::Closed {
                server: self.name.clone(),
            });
        }

        let id = format!("req-{}", self.id_counter.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        rx.await.unwrap_or_else(|_| {
            Err(ToolInvokeError::Terminated {
                server: self.name.clone(),
            })
        })
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }))
        .await
    }

    async fn write_message(&self, message: &Value) -> Result<(), ToolInvokeError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| ToolInvokeError::InvalidJson {
                server: self.name.clone(),
                source,
            })?;

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| ToolInvokeError::Terminated {
            server: self.name.clone(),
        })?;

        let io_error = |source: std::io::Error| ToolInvokeError::Transport {
            server: self.name.clone(),
            message: source.to_string(),
        };
        stream.write_all(encoded.as_bytes()).await.map_err(io_error)?;
        stream.write_all(b"\n").await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;
        Ok(())
    }

    /// Closes stdin, waits briefly for a clean exit and kills the server otherwise.
    async fn shutdown(&self) -> Result<(), ToolInvokeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let child = self.child.lock().await.take();
        let result = match child {
            Some(mut child) => match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.name, %status, "tool server exited");
                    Ok(())
                }
                Ok(Err(source)) => Err(ToolInvokeError::Transport {
                    server: self.name.clone(),
                    message: source.to_string(),
                }),
                Err(_) => {
                    warn!(server = %self.name, "tool server did not exit, killing it");
                    child
                        .kill()
                        .await
                        .map_err(|source| ToolInvokeError::Transport {
                            server: self.name.clone(),
                            message: source.to_string(),
                        })
                }
            },
            None => Ok(()),
        };

        self.fail_all_pending(|server| ToolInvokeError::Closed { server })
            .await;
        result
    }

    async fn fail_all_pending(&self, error: impl Fn(String) -> ToolInvokeError) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(error(self.name.clone())));
        }
    }
}
