use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage,
};

const EMPTY_USER_CONTENT_FALLBACK: &str = " ";

/// Configuration for any endpoint speaking the OpenAI chat-completions dialect
/// (OpenAI itself, OpenRouter, Groq, Ollama).
#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the endpoint to report the billed cost inside `usage` (OpenRouter).
    pub include_usage_cost: bool,
}

impl OpenAiModelConfig {
    pub fn new(api_base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            api_base_url: api_base_url.into(),
            temperature: None,
            max_tokens: None,
            include_usage_cost: false,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    config: OpenAiModelConfig,
}

impl OpenAiCompatibleModel {
    pub fn new(config: OpenAiModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let request = build_request(messages, tools, tool_choice, &self.config);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("authorization", format!("Bearer {api_key}"));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoicePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageRequest>,
}

#[derive(Debug, Serialize)]
struct UsageRequest {
    include: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    #[serde(rename = "type")]
    type_: &'static str,
    function: ToolFunctionDefinition,
}

#[derive(Debug, Serialize)]
struct ToolFunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ToolChoicePayload {
    Mode(&'static str),
    Specific {
        #[serde(rename = "type")]
        type_: &'static str,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction {
    name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    prompt_tokens_details: Option<PromptTokenDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokenDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

fn build_request(
    messages: &[ModelMessage],
    tools: &[ModelToolDefinition],
    tool_choice: ModelToolChoice,
    config: &OpenAiModelConfig,
) -> ChatCompletionRequest {
    let request_messages = ensure_non_empty_messages(to_request_messages(messages));

    let (tools_payload, tool_choice_payload) = if tools.is_empty() {
        (None, None)
    } else {
        let definitions = tools
            .iter()
            .map(|tool| ToolDefinition {
                type_: "function",
                function: ToolFunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect::<Vec<_>>();
        let choice = match tool_choice {
            ModelToolChoice::Auto => ToolChoicePayload::Mode("auto"),
            ModelToolChoice::Required => ToolChoicePayload::Mode("required"),
            ModelToolChoice::None => ToolChoicePayload::Mode("none"),
            ModelToolChoice::Tool(name) => ToolChoicePayload::Specific {
                type_: "function",
                function: ToolChoiceFunction { name },
            },
        };
        (Some(definitions), Some(choice))
    };

    ChatCompletionRequest {
        model: config.model.clone(),
        messages: request_messages,
        tools: tools_payload,
        tool_choice: tool_choice_payload,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        usage: config
            .include_usage_cost
            .then_some(UsageRequest { include: true }),
    }
}

fn to_request_messages(messages: &[ModelMessage]) -> Vec<RequestMessage> {
    let mut request_messages = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) if !content.is_empty() => {
                request_messages.push(RequestMessage::System {
                    content: content.clone(),
                });
            }
            ModelMessage::User(content) if !content.is_empty() => {
                request_messages.push(RequestMessage::User {
                    content: content.clone(),
                });
            }
            ModelMessage::System(_) | ModelMessage::User(_) => {}
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let wire_calls = tool_calls
                    .iter()
                    .map(|tool_call| WireToolCall {
                        id: tool_call.id.clone(),
                        type_: "function".to_string(),
                        function: WireToolCallFunction {
                            name: tool_call.name.clone(),
                            arguments: tool_call.arguments.to_string(),
                        },
                    })
                    .collect::<Vec<_>>();

                let assistant_content = content.as_ref().filter(|text| !text.is_empty()).cloned();
                if assistant_content.is_none() && wire_calls.is_empty() {
                    continue;
                }

                request_messages.push(RequestMessage::Assistant {
                    content: assistant_content,
                    tool_calls: (!wire_calls.is_empty()).then_some(wire_calls),
                });
            }
            ModelMessage::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let rendered = if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                };

                request_messages.push(RequestMessage::Tool {
                    tool_call_id: tool_call_id.clone(),
                    content: rendered,
                });
            }
        }
    }

    request_messages
}

fn ensure_non_empty_messages(mut messages: Vec<RequestMessage>) -> Vec<RequestMessage> {
    if messages.is_empty() {
        messages.push(RequestMessage::User {
            content: EMPTY_USER_CONTENT_FALLBACK.to_string(),
        });
    }

    messages
}

/// Undecodable arguments stay on the call as an error so only that call fails.
fn decode_arguments(raw: &str) -> (Value, Option<String>) {
    if raw.trim().is_empty() {
        return (json!({}), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(arguments) => (arguments, None),
        Err(err) => (json!({}), Some(format!("arguments are not valid JSON: {err}"))),
    }
}

fn normalize_response(response: ChatCompletionResponse) -> Result<ModelCompletion, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Response("response missing choices".to_string()))?;

    let message = choice
        .message
        .ok_or_else(|| ProviderError::Response("response missing choice message".to_string()))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|tool_call| {
            let (arguments, invalid_arguments) = decode_arguments(&tool_call.function.arguments);
            ModelToolCall {
                id: tool_call.id,
                name: tool_call.function.name,
                arguments,
                invalid_arguments,
            }
        })
        .collect();

    let usage = response
        .usage
        .as_ref()
        .and_then(|raw| serde_json::from_value::<WireUsage>(raw.clone()).ok())
        .map(|usage| ModelUsage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
            cache_read_tokens: usage
                .prompt_tokens_details
                .and_then(|details| details.cached_tokens),
            cache_creation_tokens: None,
        });

    let metadata = match response.usage {
        Some(raw) => json!({ "usage": raw }),
        None => Value::Null,
    };

    Ok(ModelCompletion {
        text: message.content.filter(|text| !text.is_empty()),
        thinking: message.reasoning_content.filter(|text| !text.is_empty()),
        tool_calls,
        usage,
        metadata,
    })
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = parsed
            .error
            .code
            .map(|value| match value {
                Value::String(value) => value,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.as_u16().to_string());
        let error_type = parsed
            .error
            .type_
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown api error".to_string());

        return format!("api error {code} {error_type}: {message}");
    }

    if body.is_empty() {
        format!("api request failed ({status})")
    } else {
        format!("api request failed ({status}): {body}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool_definition() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "playwright__browser_click".to_string(),
            description: "Click an element".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "ref": {"type": "string"}
                },
                "required": ["ref"]
            }),
        }
    }

    fn response_with_usage(usage: Value) -> ChatCompletionResponse {
        ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: Some("done".to_string()),
                    tool_calls: Vec::new(),
                    reasoning_content: None,
                }),
            }],
            usage: Some(usage),
        }
    }

    #[test]
    fn build_request_serializes_messages_tools_and_tool_choice() {
        let messages = vec![
            ModelMessage::System("You are a QA agent".to_string()),
            ModelMessage::User("Open the login page".to_string()),
            ModelMessage::Assistant {
                content: Some("Clicking".to_string()),
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "playwright__browser_click".to_string(),
                    arguments: json!({"ref": "e12"}),
                    invalid_arguments: None,
                }],
            },
            ModelMessage::ToolResult {
                tool_call_id: "call_1".to_string(),
                tool_name: "playwright__browser_click".to_string(),
                content: "clicked".to_string(),
                is_error: false,
            },
        ];

        let mut config = OpenAiModelConfig::new("https://api.openai.com/v1", "gpt-4o");
        config.temperature = Some(0.7);

        let request = build_request(
            &messages,
            &[tool_definition()],
            ModelToolChoice::Tool("playwright__browser_click".to_string()),
            &config,
        );
        let value = serde_json::to_value(request).expect("serializes");

        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][2]["role"], "assistant");
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"ref\":\"e12\"}"
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["tool_choice"]["type"], "function");
        assert_eq!(
            value["tool_choice"]["function"]["name"],
            "playwright__browser_click"
        );
        assert!((value["temperature"].as_f64().unwrap_or_default() - 0.7).abs() < 1e-6);
        assert!(value.get("usage").is_none());
    }

    #[test]
    fn build_request_asks_for_cost_when_configured() {
        let mut config = OpenAiModelConfig::new("https://openrouter.ai/api/v1", "openai/gpt-4o");
        config.include_usage_cost = true;

        let request = build_request(&[], &[], ModelToolChoice::Auto, &config);
        let value = serde_json::to_value(request).expect("serializes");

        assert_eq!(value["usage"]["include"], true);
        assert_eq!(value["messages"][0]["content"], " ");
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
    }

    #[test]
    fn normalize_response_reads_cached_tokens_and_keeps_raw_usage() {
        let completion = normalize_response(response_with_usage(json!({
            "prompt_tokens": 1200,
            "completion_tokens": 80,
            "prompt_tokens_details": {"cached_tokens": 1024},
            "cost": 0.0042
        })))
        .expect("response normalizes");

        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 1200,
                output_tokens: 80,
                cache_read_tokens: Some(1024),
                cache_creation_tokens: None,
            })
        );
        assert_eq!(completion.metadata["usage"]["cost"], 0.0042);
        assert_eq!(completion.text.as_deref(), Some("done"));
    }

    #[test]
    fn normalize_response_requires_choices() {
        let err = normalize_response(ChatCompletionResponse {
            choices: Vec::new(),
            usage: None,
        })
        .expect_err("should fail");

        assert!(matches!(err, ProviderError::Response(message) if message.contains("missing choices")));
    }

    #[test]
    fn malformed_arguments_stay_on_their_own_call() {
        let wire_call = |id: &str, name: &str, arguments: &str| WireToolCall {
            id: id.to_string(),
            type_: "function".to_string(),
            function: WireToolCallFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        };

        let completion = normalize_response(ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: None,
                    tool_calls: vec![
                        wire_call("call_1", "playwright__browser_snapshot", "{}"),
                        wire_call("call_2", "playwright__browser_click", "{\"ref\": "),
                    ],
                    reasoning_content: None,
                }),
            }],
            usage: None,
        })
        .expect("response is still usable");

        assert_eq!(completion.tool_calls.len(), 2);
        assert_eq!(completion.tool_calls[0].arguments, json!({}));
        assert_eq!(completion.tool_calls[0].invalid_arguments, None);

        let broken = &completion.tool_calls[1];
        assert_eq!(broken.name, "playwright__browser_click");
        assert_eq!(broken.arguments, json!({}));
        assert!(
            broken
                .invalid_arguments
                .as_deref()
                .is_some_and(|message| message.contains("not valid JSON"))
        );
    }
}
