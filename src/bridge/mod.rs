//! Tool servers exposed to the agent as one flat, namespaced tool catalog.

mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::{BridgeError, CloseFailure, ToolError, ToolInvokeError};
use crate::report::{format_elapsed, preview};
use crate::tools::{REASONING_FIELD, ToolSpec, with_reasoning_field};

pub use process::{ToolServerProcess, substitute_temp_dir};

/// Placeholder in server arguments replaced with the per-run scratch directory.
pub const TEMP_DIR_PLACEHOLDER: &str = "${TEMP_DIR}";

/// Tool invoked before a server's channel is closed so it can flush its output.
pub const CLEANUP_TOOL: &str = "browser_close";

const NAME_SEPARATOR: &str = "__";

/// One entry of a server's raw tool catalog.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Request/response channel to one tool server.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ServerTool>, ToolInvokeError>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolInvokeError>;

    /// Terminates the channel. Calling it again after success is a no-op.
    async fn disconnect(&self) -> Result<(), ToolInvokeError>;
}

#[derive(Clone, Debug, Default)]
pub struct BridgeOptions {
    /// Prepend a `reasoning` argument to every tool schema.
    pub reasoning: bool,
    pub scratch_dir: PathBuf,
}

struct ConnectedServer {
    transport: Arc<dyn ToolTransport>,
    has_cleanup_tool: bool,
}

impl ConnectedServer {
    async fn drain(&self) -> Result<(), ToolInvokeError> {
        if self.has_cleanup_tool {
            self.transport.call_tool(CLEANUP_TOOL, json!({})).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Vec<CloseFailure> {
        let server = self.transport.name().to_string();
        info!(server = %server, "closing tool server");

        let mut failures = Vec::new();
        if let Err(error) = self.drain().await {
            failures.push(CloseFailure {
                server: server.clone(),
                error,
            });
        }
        if let Err(error) = self.transport.disconnect().await {
            failures.push(CloseFailure { server, error });
        }
        failures
    }
}

pub struct ToolBridge {
    servers: Vec<ConnectedServer>,
    tools: Vec<ToolSpec>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field(
                "servers",
                &self
                    .servers
                    .iter()
                    .map(|server| server.transport.name())
                    .collect::<Vec<_>>(),
            )
            .field("tools", &self.tools.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ToolBridge {
    /// Starts every configured server concurrently and loads their catalogs.
    ///
    /// Fails as a whole when any server fails to start or to publish its catalog;
    /// servers that did start are disconnected before returning.
    pub async fn open(
        servers: &BTreeMap<String, ServerConfig>,
        options: &BridgeOptions,
    ) -> Result<Self, BridgeError> {
        let launches = servers.iter().map(|(name, config)| async move {
            ToolServerProcess::start(name, config, &options.scratch_dir)
                .await
                .map(|process| (Arc::new(process) as Arc<dyn ToolTransport>, config))
                .map_err(|source| (name.clone(), source))
        });

        let mut started = Vec::new();
        let mut failure = None;
        for outcome in join_all(launches).await {
            match outcome {
                Ok((transport, config)) => started.push((transport, config.exclude.clone())),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }

        if let Some((server, source)) = failure {
            disconnect_all(started.iter().map(|(transport, _)| transport)).await;
            return Err(BridgeError::Startup { server, source });
        }

        Self::from_transports(started, options.reasoning).await
    }

    /// Builds the bridge over already connected transports, each with its exclusion list.
    pub async fn from_transports(
        transports: Vec<(Arc<dyn ToolTransport>, Vec<String>)>,
        reasoning: bool,
    ) -> Result<Self, BridgeError> {
        let catalogs = join_all(
            transports
                .iter()
                .map(|(transport, _)| async move { transport.list_tools().await }),
        )
        .await;

        let mut servers = Vec::with_capacity(transports.len());
        let mut tools = Vec::new();
        let mut failure = None;

        for ((transport, exclude), catalog) in transports.iter().zip(catalogs) {
            let catalog = match catalog {
                Ok(catalog) => catalog,
                Err(source) => {
                    if failure.is_none() {
                        failure = Some(BridgeError::Startup {
                            server: transport.name().to_string(),
                            source,
                        });
                    }
                    continue;
                }
            };

            for tool in catalog.iter().filter(|tool| !exclude.contains(&tool.name)) {
                match bridged_tool(Arc::clone(transport), tool, reasoning) {
                    Ok(spec) => tools.push(spec),
                    Err(err) if failure.is_none() => failure = Some(err),
                    Err(_) => {}
                }
            }

            servers.push(ConnectedServer {
                transport: Arc::clone(transport),
                has_cleanup_tool: catalog.iter().any(|tool| tool.name == CLEANUP_TOOL),
            });
        }

        if let Some(err) = failure {
            disconnect_all(transports.iter().map(|(transport, _)| transport)).await;
            return Err(err);
        }

        info!(
            tools = %tools.iter().map(ToolSpec::name).collect::<Vec<_>>().join(", "),
            "loaded tools"
        );

        Ok(Self {
            servers,
            tools,
            closed: AtomicBool::new(false),
        })
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// Drains and disconnects every server concurrently. Only the first call does any work.
    pub async fn close(&self) -> Result<(), BridgeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let failures = join_all(self.servers.iter().map(ConnectedServer::shutdown))
            .await
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Close(failures))
        }
    }
}

async fn disconnect_all<'a>(transports: impl Iterator<Item = &'a Arc<dyn ToolTransport>>) {
    for result in join_all(transports.map(|transport| async move {
        (transport.name().to_string(), transport.disconnect().await)
    }))
    .await
    {
        if let (server, Err(err)) = result {
            error!(server = %server, error = %err, "failed to disconnect tool server");
        }
    }
}

fn qualified_name(server: &str, tool: &str) -> String {
    format!("{server}{NAME_SEPARATOR}{tool}")
}

fn bridged_tool(
    transport: Arc<dyn ToolTransport>,
    tool: &ServerTool,
    reasoning: bool,
) -> Result<ToolSpec, BridgeError> {
    let server = transport.name().to_string();
    let name = qualified_name(&server, &tool.name);
    let declares_reasoning = tool
        .input_schema
        .get("properties")
        .and_then(|properties| properties.get(REASONING_FIELD))
        .is_some();
    let strip_reasoning = reasoning && !declares_reasoning;
    let schema = if reasoning {
        with_reasoning_field(&tool.input_schema)
    } else {
        tool.input_schema.clone()
    };

    let spec = ToolSpec::new(name.clone(), tool.description.clone().unwrap_or_default())
        .with_schema(schema)
        .map_err(|source| BridgeError::Catalog {
            server,
            tool: tool.name.clone(),
            source,
        })?;

    let remote_name = tool.name.clone();
    Ok(spec.with_handler(move |arguments| {
        let transport = Arc::clone(&transport);
        let remote_name = remote_name.clone();
        let name = name.clone();
        async move {
            let arguments = if strip_reasoning {
                take_reasoning(&name, arguments)
            } else {
                arguments
            };
            invoke_logged(transport.as_ref(), &name, &remote_name, arguments).await
        }
    }))
}

fn take_reasoning(tool: &str, mut arguments: Value) -> Value {
    if let Some(reasoning) = arguments
        .as_object_mut()
        .and_then(|object| object.remove(REASONING_FIELD))
    {
        let reasoning = match reasoning {
            Value::String(text) => text,
            other => other.to_string(),
        };
        info!(tool = %tool, reasoning = %reasoning, "tool reasoning");
    }
    arguments
}

async fn invoke_logged(
    transport: &dyn ToolTransport,
    name: &str,
    remote_name: &str,
    arguments: Value,
) -> Result<String, ToolError> {
    info!(tool = %name, input = %arguments, "tool start");
    let started = Instant::now();
    let outcome = transport.call_tool(remote_name, arguments).await;
    let elapsed = format_elapsed(started.elapsed());

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            error!(tool = %name, elapsed = %elapsed, error = %err, "tool failed");
            return Err(err.into());
        }
    };

    let content = normalize_content(&result);
    info!(tool = %name, elapsed = %elapsed, content = %preview(&content), "tool end");
    debug!(tool = %name, elapsed = %elapsed, "tool end\n{content}");

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ToolError::Execution(content));
    }
    Ok(content)
}

/// Flattens a `tools/call` result into one string.
///
/// Text items are joined with newlines; a result without text is JSON-encoded.
pub fn normalize_content(result: &Value) -> String {
    let Some(content) = result.get("content") else {
        return result.to_string();
    };
    if let Some(text) = content.as_str() {
        return text.to_string();
    }

    let texts = content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        content.to_string()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests;
