use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::json;

use super::*;

type Journal = Arc<Mutex<Vec<String>>>;

struct FakeTransport {
    name: String,
    tools: Vec<ServerTool>,
    results: HashMap<String, Value>,
    journal: Journal,
    fail_listing: bool,
    fail_disconnect: bool,
    received: Mutex<Vec<(String, Value)>>,
}

impl FakeTransport {
    fn new(name: &str, tools: &[&str], journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|tool| ServerTool {
                    name: tool.to_string(),
                    description: Some(format!("{tool} description")),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"url": {"type": "string"}},
                        "additionalProperties": false
                    }),
                })
                .collect(),
            results: HashMap::new(),
            journal: Arc::clone(journal),
            fail_listing: false,
            fail_disconnect: false,
            received: Mutex::new(Vec::new()),
        }
    }

    fn with_result(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    fn record(&self, entry: String) {
        self.journal.lock().expect("journal lock").push(entry);
    }
}

#[async_trait]
impl ToolTransport for FakeTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ServerTool>, ToolInvokeError> {
        if self.fail_listing {
            return Err(ToolInvokeError::Rpc {
                server: self.name.clone(),
                code: -32603,
                message: "catalog unavailable".to_string(),
            });
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolInvokeError> {
        self.record(format!("call {}/{tool}", self.name));
        self.received
            .lock()
            .expect("received lock")
            .push((tool.to_string(), arguments));
        match self.results.get(tool) {
            Some(result) => Ok(result.clone()),
            None => Err(ToolInvokeError::Transport {
                server: self.name.clone(),
                message: format!("{tool} exploded"),
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), ToolInvokeError> {
        self.record(format!("disconnect {}", self.name));
        if self.fail_disconnect {
            return Err(ToolInvokeError::Transport {
                server: self.name.clone(),
                message: "pipe already gone".to_string(),
            });
        }
        Ok(())
    }
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal lock").clone()
}

fn attach(transport: FakeTransport, exclude: &[&str]) -> (Arc<dyn ToolTransport>, Vec<String>) {
    (
        Arc::new(transport),
        exclude.iter().map(|name| name.to_string()).collect(),
    )
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

#[tokio::test]
async fn catalog_is_namespaced_and_filtered() {
    let journal = journal();
    let browser = FakeTransport::new(
        "playwright",
        &["browser_navigate", "browser_close", "browser_snapshot"],
        &journal,
    );
    let files = FakeTransport::new("files", &["read"], &journal);

    let bridge = ToolBridge::from_transports(
        vec![
            attach(browser, &["browser_close"]),
            attach(files, &[]),
        ],
        false,
    )
    .await
    .expect("bridge opens");

    let names = bridge.tools().iter().map(ToolSpec::name).collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "playwright__browser_navigate",
            "playwright__browser_snapshot",
            "files__read"
        ]
    );
    assert_eq!(
        bridge.tools()[0].description(),
        "browser_navigate description"
    );
}

#[tokio::test]
async fn reasoning_is_prepended_to_schemas_and_stripped_from_calls() {
    let journal = journal();
    let browser = Arc::new(
        FakeTransport::new("playwright", &["browser_navigate"], &journal)
            .with_result("browser_navigate", text_result("navigated")),
    );

    let bridge = ToolBridge::from_transports(
        vec![(Arc::clone(&browser) as Arc<dyn ToolTransport>, Vec::new())],
        true,
    )
    .await
    .expect("bridge opens");

    let tool = &bridge.tools()[0];
    let first_property = tool.json_schema()["properties"]
        .as_object()
        .and_then(|properties| properties.keys().next().cloned());
    assert_eq!(first_property.as_deref(), Some("reasoning"));

    let output = tool
        .execute(json!({"reasoning": "open the shop", "url": "https://shop.example"}))
        .await
        .expect("call succeeds");
    assert_eq!(output, "navigated");

    let received = browser.received.lock().expect("received lock").clone();
    assert_eq!(
        received,
        vec![(
            "browser_navigate".to_string(),
            json!({"url": "https://shop.example"})
        )]
    );
}

#[tokio::test]
async fn invocation_failures_stay_local_to_the_call() {
    let journal = journal();
    let browser = FakeTransport::new("playwright", &["browser_click", "browser_type"], &journal)
        .with_result(
            "browser_type",
            json!({"content": [{"type": "text", "text": "element not found"}], "isError": true}),
        );

    let bridge = ToolBridge::from_transports(vec![attach(browser, &[])], false)
        .await
        .expect("bridge opens");

    let thrown = bridge.tools()[0]
        .execute(json!({}))
        .await
        .expect_err("transport error");
    assert!(thrown.to_string().contains("browser_click exploded"));

    let reported = bridge.tools()[1]
        .execute(json!({}))
        .await
        .expect_err("isError result");
    assert!(matches!(reported, ToolError::Execution(ref text) if text == "element not found"));

    bridge.close().await.expect("bridge still closes");
}

#[tokio::test]
async fn close_drains_cleanup_tool_before_disconnecting() {
    let journal = journal();
    let browser = FakeTransport::new("playwright", &["browser_navigate", "browser_close"], &journal)
        .with_result("browser_close", text_result("closed"));
    let files = FakeTransport::new("files", &["read"], &journal);

    let bridge = ToolBridge::from_transports(
        vec![
            attach(browser, &["browser_close"]),
            attach(files, &[]),
        ],
        false,
    )
    .await
    .expect("bridge opens");

    bridge.close().await.expect("close succeeds");
    bridge.close().await.expect("second close is a no-op");

    let entries = entries(&journal);
    assert_eq!(entries.len(), 3);
    let drained = entries
        .iter()
        .position(|entry| entry == "call playwright/browser_close")
        .expect("cleanup tool called");
    let disconnected = entries
        .iter()
        .position(|entry| entry == "disconnect playwright")
        .expect("playwright disconnected");
    assert!(drained < disconnected);
    assert!(entries.contains(&"disconnect files".to_string()));
    assert!(!entries.iter().any(|entry| entry.starts_with("call files")));
}

#[tokio::test]
async fn close_failures_are_aggregated_without_skipping_servers() {
    let journal = journal();
    let mut broken = FakeTransport::new("broken", &["browser_close"], &journal);
    broken.fail_disconnect = true;
    let healthy = FakeTransport::new("healthy", &["read"], &journal);

    let bridge = ToolBridge::from_transports(
        vec![
            attach(broken, &[]),
            attach(healthy, &[]),
        ],
        false,
    )
    .await
    .expect("bridge opens");

    let err = bridge.close().await.expect_err("close reports failures");
    let BridgeError::Close(failures) = err else {
        panic!("expected aggregated close failure");
    };
    let servers = failures
        .iter()
        .map(|failure| failure.server.as_str())
        .collect::<Vec<_>>();
    assert_eq!(servers, vec!["broken", "broken"]);

    let entries = entries(&journal);
    assert!(entries.contains(&"disconnect broken".to_string()));
    assert!(entries.contains(&"disconnect healthy".to_string()));
}

#[tokio::test]
async fn catalog_failure_publishes_nothing_and_disconnects_everyone() {
    let journal = journal();
    let healthy = FakeTransport::new("healthy", &["read"], &journal);
    let mut broken = FakeTransport::new("broken", &["write"], &journal);
    broken.fail_listing = true;

    let err = ToolBridge::from_transports(
        vec![
            attach(healthy, &[]),
            attach(broken, &[]),
        ],
        false,
    )
    .await
    .expect_err("open fails");

    assert!(matches!(err, BridgeError::Startup { ref server, .. } if server == "broken"));
    let entries = entries(&journal);
    assert!(entries.contains(&"disconnect healthy".to_string()));
    assert!(entries.contains(&"disconnect broken".to_string()));
}

#[tokio::test]
async fn invalid_published_schema_is_a_catalog_error() {
    let journal = journal();
    let mut odd = FakeTransport::new("odd", &["list"], &journal);
    odd.tools[0].input_schema = json!({"type": "array"});

    let err = ToolBridge::from_transports(vec![attach(odd, &[])], false)
        .await
        .expect_err("schema rejected");
    assert!(matches!(err, BridgeError::Catalog { ref tool, .. } if tool == "list"));
}

#[test]
fn content_is_flattened_to_text() {
    let mixed = json!({"content": [
        {"type": "text", "text": "first"},
        {"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"},
        {"type": "text", "text": "second"}
    ]});
    assert_eq!(normalize_content(&mixed), "first\nsecond");

    let image_only = json!({"content": [{"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"}]});
    assert_eq!(
        normalize_content(&image_only),
        r#"[{"type":"image","data":"aGVsbG8=","mimeType":"image/png"}]"#
    );

    assert_eq!(normalize_content(&json!({"content": "plain"})), "plain");
}
