use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::Barrier;

use super::*;
use crate::error::{ProviderError, ToolError};
use crate::llm::ModelUsage;
use crate::provider::Provider;

#[derive(Default)]
struct MockModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, ProviderError>>>,
    seen: Mutex<Vec<(Vec<ModelMessage>, ModelToolChoice)>>,
}

impl MockModel {
    fn with_responses(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from(responses)),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Vec<ModelMessage>, ModelToolChoice)> {
        self.seen.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push((messages.to_vec(), tool_choice));
        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "no more mock model responses".to_string(),
            ))
        })
    }
}

fn completion(text: Option<&str>, tool_calls: Vec<ModelToolCall>) -> ModelCompletion {
    ModelCompletion {
        text: text.map(str::to_string),
        tool_calls,
        usage: Some(ModelUsage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_read_tokens: None,
            cache_creation_tokens: None,
        }),
        ..ModelCompletion::default()
    }
}

fn verdict_response(result: &str, summary: &str) -> Result<ModelCompletion, ProviderError> {
    Ok(completion(
        None,
        vec![tool_call(
            "verdict-1",
            VERDICT_TOOL_NAME,
            json!({"summary": summary, "result": result}),
        )],
    ))
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ModelToolCall {
    ModelToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
        invalid_arguments: None,
    }
}

fn navigate_tool() -> ToolSpec {
    ToolSpec::new("playwright__browser_navigate", "open a url")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"}
            },
            "required": ["url"],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|args| async move {
            let url = args
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::Execution("url missing".to_string()))?;
            Ok(format!("navigated to {url}"))
        })
}

fn fail_tool() -> ToolSpec {
    ToolSpec::new("fail", "always fail")
        .with_handler(|_args| async move { Err(ToolError::Execution("boom".to_string())) })
}

/// Tool pair that only completes when both run at the same time.
fn rendezvous_tools() -> (ToolSpec, ToolSpec) {
    let barrier = Arc::new(Barrier::new(2));
    let slow_barrier = Arc::clone(&barrier);
    let slow = ToolSpec::new("slow", "waits, then sleeps").with_handler(move |_args| {
        let barrier = Arc::clone(&slow_barrier);
        async move {
            barrier.wait().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok("slow done".to_string())
        }
    });
    let fast = ToolSpec::new("fast", "waits").with_handler(move |_args| {
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            Ok("fast done".to_string())
        }
    });
    (slow, fast)
}

fn tool_results(messages: &[ModelMessage]) -> Vec<(String, String, bool)> {
    messages
        .iter()
        .filter_map(|message| match message {
            ModelMessage::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => Some((tool_call_id.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

fn scenario() -> Vec<ModelMessage> {
    vec![ModelMessage::User(
        "Open https://shop.example and check the title".to_string(),
    )]
}

const BOTH: [Orchestration; 2] = [Orchestration::Managed, Orchestration::Custom];

#[tokio::test]
async fn run_without_tool_calls_goes_straight_to_verdict() {
    for orchestration in BOTH {
        let model = MockModel::with_responses(vec![
            Ok(completion(Some("The title is Shop."), vec![])),
            verdict_response("PASS", "title matched"),
        ]);
        let agent = Agent::builder()
            .shared_model(model.clone())
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let mut streamed = String::new();
        let verdict = agent.run(scenario(), |text| streamed.push_str(text)).await;

        assert_eq!(verdict, Verdict::pass("title matched"), "{orchestration:?}");
        assert_eq!(streamed, "The title is Shop.");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0].0[0], ModelMessage::System(_)));
        assert_eq!(calls[0].1, ModelToolChoice::None);
        assert_eq!(calls[1].0, scenario());
        assert_eq!(
            calls[1].1,
            ModelToolChoice::Tool(VERDICT_TOOL_NAME.to_string())
        );
    }
}

#[tokio::test]
async fn every_request_gets_exactly_one_correlated_result() {
    for orchestration in BOTH {
        let (slow, fast) = rendezvous_tools();
        let model = MockModel::with_responses(vec![
            Ok(completion(
                None,
                vec![
                    tool_call("call-slow", "slow", json!({})),
                    tool_call("call-fast", "fast", json!({})),
                    tool_call(
                        "call-nav",
                        "playwright__browser_navigate",
                        json!({"url": "https://shop.example"}),
                    ),
                ],
            )),
            Ok(completion(Some("done"), vec![])),
            verdict_response("PASS", "all tools ran"),
        ]);
        let agent = Agent::builder()
            .shared_model(model.clone())
            .tools([slow, fast, navigate_tool()])
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = tokio::time::timeout(Duration::from_secs(5), agent.run(scenario(), |_| {}))
            .await
            .expect("tool calls run concurrently");
        assert!(verdict.passed(), "{orchestration:?}: {verdict:?}");

        let calls = model.calls();
        let second_round = &calls[1].0;
        assert_eq!(calls[1].1, ModelToolChoice::Auto);
        assert_eq!(
            tool_results(second_round),
            vec![
                ("call-slow".to_string(), "slow done".to_string(), false),
                ("call-fast".to_string(), "fast done".to_string(), false),
                (
                    "call-nav".to_string(),
                    "navigated to https://shop.example".to_string(),
                    false
                ),
            ]
        );
        let ModelMessage::Assistant { tool_calls, .. } = &second_round[2] else {
            panic!("assistant message precedes tool results");
        };
        assert_eq!(tool_calls.len(), 3);
    }
}

#[tokio::test]
async fn tool_failures_are_reported_to_the_model() {
    for orchestration in BOTH {
        let model = MockModel::with_responses(vec![
            Ok(completion(
                None,
                vec![
                    tool_call("call-1", "fail", json!({})),
                    tool_call("call-2", "ghost", json!({})),
                    tool_call("call-3", "playwright__browser_navigate", json!({})),
                ],
            )),
            Ok(completion(Some("the page could not be opened"), vec![])),
            verdict_response("FAIL", "navigation failed"),
        ]);
        let agent = Agent::builder()
            .shared_model(model.clone())
            .tools([fail_tool(), navigate_tool()])
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = agent.run(scenario(), |_| {}).await;
        assert_eq!(verdict, Verdict::fail("navigation failed"));

        let results = tool_results(&model.calls()[1].0);
        assert_eq!(
            results,
            vec![
                (
                    "call-1".to_string(),
                    "Tool 'fail' failed with error: tool execution failed: boom".to_string(),
                    true
                ),
                (
                    "call-2".to_string(),
                    "Error: Tool 'ghost' was requested but is not available.".to_string(),
                    true
                ),
                (
                    "call-3".to_string(),
                    "Tool 'playwright__browser_navigate' failed with error: invalid tool arguments for playwright__browser_navigate: missing required field: url".to_string(),
                    true
                ),
            ]
        );
    }
}

#[tokio::test]
async fn undecodable_arguments_fail_only_their_call() {
    for orchestration in BOTH {
        let mut broken = tool_call("call-2", "playwright__browser_navigate", json!({}));
        broken.invalid_arguments =
            Some("arguments are not valid JSON: EOF while parsing a value".to_string());
        let model = MockModel::with_responses(vec![
            Ok(completion(
                None,
                vec![
                    tool_call(
                        "call-1",
                        "playwright__browser_navigate",
                        json!({"url": "https://shop.example"}),
                    ),
                    broken,
                ],
            )),
            Ok(completion(Some("retrying is not needed"), vec![])),
            verdict_response("PASS", "page opened"),
        ]);
        let agent = Agent::builder()
            .shared_model(model.clone())
            .tool(navigate_tool())
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = agent.run(scenario(), |_| {}).await;
        assert_eq!(verdict, Verdict::pass("page opened"), "{orchestration:?}");

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1, ModelToolChoice::Auto);
        assert_eq!(
            tool_results(&calls[1].0),
            vec![
                (
                    "call-1".to_string(),
                    "navigated to https://shop.example".to_string(),
                    false
                ),
                (
                    "call-2".to_string(),
                    "Tool 'playwright__browser_navigate' failed with error: invalid tool arguments for playwright__browser_navigate: arguments are not valid JSON: EOF while parsing a value".to_string(),
                    true
                ),
            ]
        );
    }
}

#[tokio::test]
async fn exceeding_the_round_budget_fails_the_run() {
    for orchestration in BOTH {
        let looping = (0..10)
            .map(|index| {
                Ok(completion(
                    None,
                    vec![tool_call(
                        &format!("call-{index}"),
                        "playwright__browser_navigate",
                        json!({"url": "https://shop.example"}),
                    )],
                ))
            })
            .collect();
        let model = MockModel::with_responses(looping);
        let agent = Agent::builder()
            .shared_model(model.clone())
            .tool(navigate_tool())
            .max_iterations(3)
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = agent.run(scenario(), |_| {}).await;
        assert_eq!(
            verdict,
            Verdict::fail("Error: max iterations reached (3)"),
            "{orchestration:?}"
        );
        assert_eq!(model.calls().len(), 3);
    }
}

#[tokio::test]
async fn model_failure_becomes_fail_verdict() {
    for orchestration in BOTH {
        let model = MockModel::with_responses(vec![Err(ProviderError::Request(
            "connection reset".to_string(),
        ))]);
        let agent = Agent::builder()
            .shared_model(model)
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = agent.run(scenario(), |_| {}).await;
        assert_eq!(
            verdict,
            Verdict::fail("Error: provider request failed: connection reset")
        );
    }
}

#[tokio::test]
async fn invalid_structured_verdict_becomes_fail_verdict() {
    for orchestration in BOTH {
        let model = MockModel::with_responses(vec![
            Ok(completion(Some("done"), vec![])),
            verdict_response("MAYBE", "unsure"),
        ]);
        let agent = Agent::builder()
            .shared_model(model)
            .orchestration(orchestration)
            .build()
            .expect("agent builds");

        let verdict = agent.run(scenario(), |_| {}).await;
        assert_eq!(verdict.result, VerdictResult::Fail);
        assert!(
            verdict
                .summary
                .starts_with("Error: structured output failed validation"),
            "{}",
            verdict.summary
        );
    }
}

#[tokio::test]
async fn query_stream_emits_events_in_round_order() {
    let model = MockModel::with_responses(vec![
        Ok(completion(
            Some("Opening the shop."),
            vec![tool_call(
                "call-1",
                "playwright__browser_navigate",
                json!({"url": "https://shop.example"}),
            )],
        )),
        Ok(completion(Some("Title verified."), vec![])),
        verdict_response("PASS", "title verified"),
    ]);
    let agent = Agent::builder()
        .shared_model(model)
        .tool(navigate_tool())
        .build()
        .expect("agent builds");

    let events = agent
        .query_stream(scenario())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("stream succeeds");

    assert_eq!(
        events,
        vec![
            AgentEvent::Text {
                content: "Opening the shop.".to_string()
            },
            AgentEvent::ToolCall {
                tool: "playwright__browser_navigate".to_string(),
                args_json: json!({"url": "https://shop.example"}),
                tool_call_id: "call-1".to_string(),
            },
            AgentEvent::ToolResult {
                tool: "playwright__browser_navigate".to_string(),
                result_text: "navigated to https://shop.example".to_string(),
                tool_call_id: "call-1".to_string(),
                is_error: false,
            },
            AgentEvent::Text {
                content: "Title verified.".to_string()
            },
            AgentEvent::Verdict(Verdict::pass("title verified")),
        ]
    );
}

#[tokio::test]
async fn stream_without_verdict_is_reported_as_invalid() {
    let events = futures_util::stream::iter(vec![Ok(AgentEvent::Text {
        content: "partial".to_string(),
    })]);

    let mut forwarded = Vec::new();
    let verdict = invoke_agent(events, |text| forwarded.push(text.to_string())).await;

    assert_eq!(forwarded, vec!["partial".to_string()]);
    assert_eq!(verdict.result, VerdictResult::Fail);
    assert!(
        verdict
            .summary
            .starts_with("Error: Invalid format of the last event")
    );
}

#[tokio::test]
async fn usage_is_recorded_for_every_model_response() {
    let meter = Arc::new(UsageMeter::new(Provider::OpenAi, "gpt-4o"));
    let model = MockModel::with_responses(vec![
        Ok(completion(
            None,
            vec![tool_call(
                "call-1",
                "playwright__browser_navigate",
                json!({"url": "https://shop.example"}),
            )],
        )),
        Ok(completion(Some("done"), vec![])),
        verdict_response("PASS", "ok"),
    ]);
    let agent = Agent::builder()
        .shared_model(model)
        .tool(navigate_tool())
        .usage_meter(Arc::clone(&meter))
        .build()
        .expect("agent builds");

    agent.run(scenario(), |_| {}).await;

    let totals = meter.totals();
    assert_eq!(totals.responses, 3);
    assert_eq!(totals.tokens.input, 3000);
    assert_eq!(totals.tokens.output, 1500);
}

#[test]
fn builder_rejects_invalid_configuration() {
    let missing_model = Agent::builder().build().err().expect("model required");
    assert!(missing_model.to_string().contains("model must be configured"));

    let duplicate = Agent::builder()
        .model(MockModel::default())
        .tools([navigate_tool(), navigate_tool()])
        .build()
        .err()
        .expect("duplicate tool");
    assert!(duplicate.to_string().contains("duplicate tool registered"));

    let zero_budget = Agent::builder()
        .model(MockModel::default())
        .max_iterations(0)
        .build()
        .err()
        .expect("empty budget");
    assert!(matches!(zero_budget, AgentError::Config(_)));
}
