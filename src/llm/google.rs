use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage,
};

const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Keys Gemini's OpenAPI subset rejects in function parameters.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 3] = ["additionalProperties", "default", "$schema"];

/// Gemini `generateContent` configuration.
#[derive(Debug, Clone)]
pub struct GoogleModelConfig {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub temperature: Option<f32>,
}

impl GoogleModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleModel {
    client: Client,
    config: GoogleModelConfig,
}

impl GoogleModel {
    pub fn new(config: GoogleModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Reads `GOOGLE_API_KEY` (or `GEMINI_API_KEY`) and an optional `GOOGLE_BASE_URL`.
    pub fn from_env(
        model: impl Into<String>,
        temperature: Option<f32>,
    ) -> Result<Self, ProviderError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                ProviderError::Request("GOOGLE_API_KEY (or GEMINI_API_KEY) is not set".to_string())
            })?;

        let mut config = GoogleModelConfig::new(api_key, model);
        config.temperature = temperature;
        if let Ok(base_url) = std::env::var("GOOGLE_BASE_URL") {
            config.api_base_url = base_url;
        }
        Self::new(config)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ChatModel for GoogleModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let request = build_request(messages, tools, tool_choice, &self.config);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        let payload = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        normalize_response(payload)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionDeclarations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }

    /// A user turn answering the previous model turn's function calls.
    fn is_function_responses(&self) -> bool {
        self.role == "user"
            && !self.parts.is_empty()
            && self.parts.iter().all(|part| part.function_response.is_some())
    }
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallingConfig {
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    fn call(call: &ModelToolCall) -> Self {
        Self {
            function_call: Some(FunctionCall {
                id: Some(call.id.clone()),
                name: Some(call.name.clone()),
                args: Some(call.arguments.clone()),
            }),
            ..Self::default()
        }
    }

    fn response(id: &str, name: &str, content: &str, is_error: bool) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                id: Some(id.to_string()),
                name: name.to_string(),
                response: tool_result_payload(content, is_error),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: Option<String>,
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
    cached_content_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    status: Option<String>,
    message: Option<String>,
}

fn build_request(
    messages: &[ModelMessage],
    tools: &[ModelToolDefinition],
    tool_choice: ModelToolChoice,
    config: &GoogleModelConfig,
) -> GenerateContentRequest {
    let (contents, system) = to_google_contents(messages);

    let (tools, tool_config) = if tools.is_empty() {
        (Vec::new(), None)
    } else {
        let function_declarations = tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: gemini_schema(&tool.parameters),
            })
            .collect();
        (
            vec![FunctionDeclarations {
                function_declarations,
            }],
            Some(ToolConfig {
                function_calling_config: function_calling_config(tool_choice),
            }),
        )
    };

    GenerateContentRequest {
        contents,
        system_instruction: system.map(|text| SystemInstruction {
            parts: vec![Part::text(text)],
        }),
        tools,
        tool_config,
        generation_config: config
            .temperature
            .map(|temperature| GenerationConfig { temperature }),
    }
}

fn function_calling_config(tool_choice: ModelToolChoice) -> FunctionCallingConfig {
    let (mode, allowed_function_names) = match tool_choice {
        ModelToolChoice::Auto => ("AUTO", None),
        ModelToolChoice::Required => ("ANY", None),
        ModelToolChoice::None => ("NONE", None),
        ModelToolChoice::Tool(name) => ("ANY", Some(vec![name])),
    };
    FunctionCallingConfig {
        mode,
        allowed_function_names,
    }
}

/// Maps history onto Gemini turns.
///
/// Results of one round's parallel calls go back as a single user turn, one
/// `functionResponse` part per call, matching the model turn that requested them.
fn to_google_contents(messages: &[ModelMessage]) -> (Vec<Content>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) if !content.is_empty() => {
                system_lines.push(content.as_str());
            }
            ModelMessage::System(_) => {}
            ModelMessage::User(content) if !content.is_empty() => {
                contents.push(Content::user(vec![Part::text(content.clone())]));
            }
            ModelMessage::User(_) => {}
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let parts = content
                    .iter()
                    .filter(|text| !text.is_empty())
                    .map(|text| Part::text(text.clone()))
                    .chain(tool_calls.iter().map(Part::call))
                    .collect::<Vec<_>>();
                if !parts.is_empty() {
                    contents.push(Content {
                        role: "model".to_string(),
                        parts,
                    });
                }
            }
            ModelMessage::ToolResult {
                tool_call_id,
                tool_name,
                content,
                is_error,
            } => {
                let part = Part::response(tool_call_id, tool_name, content, *is_error);
                match contents.last_mut() {
                    Some(turn) if turn.is_function_responses() => turn.parts.push(part),
                    _ => contents.push(Content::user(vec![part])),
                }
            }
        }
    }

    let system = (!system_lines.is_empty()).then(|| system_lines.join("\n\n"));
    (contents, system)
}

fn tool_result_payload(content: &str, is_error: bool) -> Value {
    if is_error {
        return json!({"error": content});
    }
    match serde_json::from_str::<Value>(content) {
        Ok(parsed @ Value::Object(_)) => parsed,
        _ => json!({"result": content}),
    }
}

fn join_parts(parts: Vec<String>) -> Option<String> {
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn normalize_response(response: GenerateContentResponse) -> Result<ModelCompletion, ProviderError> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        ProviderError::Response("google response missing candidates".to_string())
    })?;

    let mut text = Vec::new();
    let mut thinking = Vec::new();
    let mut tool_calls = Vec::new();

    let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
    for (index, part) in parts.into_iter().enumerate() {
        match part.text {
            Some(chunk) if part.thought == Some(true) => thinking.push(chunk),
            Some(chunk) => text.push(chunk),
            None => {}
        }

        if let Some(call) = part.function_call {
            let name = call.name.ok_or_else(|| {
                ProviderError::Response("google functionCall missing name".to_string())
            })?;
            tool_calls.push(ModelToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{}", index + 1)),
                name,
                arguments: call.args.unwrap_or_else(|| json!({})),
                invalid_arguments: None,
            });
        }
    }

    // Thought tokens are billed as output.
    let usage = response
        .usage_metadata
        .as_ref()
        .and_then(|raw| serde_json::from_value::<UsageMetadata>(raw.clone()).ok())
        .map(|usage| ModelUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage
                .candidates_token_count
                .unwrap_or(0)
                .saturating_add(usage.thoughts_token_count.unwrap_or(0)),
            cache_read_tokens: usage.cached_content_token_count,
            cache_creation_tokens: None,
        });

    Ok(ModelCompletion {
        text: join_parts(text),
        thinking: join_parts(thinking),
        tool_calls,
        usage,
        metadata: response
            .usage_metadata
            .map(|raw| json!({ "usage": raw }))
            .unwrap_or(Value::Null),
    })
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(ErrorEnvelope { error }) => format!(
            "google api error {} {}: {}",
            error.code.unwrap_or(status.as_u16()),
            error
                .status
                .unwrap_or_else(|| status.to_string().to_uppercase()),
            error.message.as_deref().unwrap_or("unknown error")
        ),
        Err(_) if body.is_empty() => format!("google api request failed ({status})"),
        Err(_) => format!("google api request failed ({status}): {body}"),
    }
}

/// Rewrites a JSON schema into the subset Gemini accepts: local `$ref`s are
/// inlined, unsupported keys and metadata titles are dropped, and empty
/// object schemas get a placeholder property.
fn gemini_schema(schema: &Value) -> Value {
    let defs = schema
        .get("$defs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    rewrite_schema_node(schema, &defs, None)
}

fn rewrite_schema_node(node: &Value, defs: &Map<String, Value>, parent_key: Option<&str>) -> Value {
    match node {
        Value::Object(map) => {
            let referenced = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|reference| reference.rsplit('/').next())
                .and_then(|name| defs.get(name))
                .and_then(Value::as_object);
            if let Some(definition) = referenced {
                let mut merged = definition.clone();
                for (key, value) in map.iter().filter(|(key, _)| key.as_str() != "$ref") {
                    merged.insert(key.clone(), value.clone());
                }
                return rewrite_schema_node(&Value::Object(merged), defs, parent_key);
            }

            let mut rewritten = Map::new();
            for (key, value) in map {
                let metadata_title = key == "title" && parent_key != Some("properties");
                if key == "$defs" || metadata_title || UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str())
                {
                    continue;
                }
                rewritten.insert(key.clone(), rewrite_schema_node(value, defs, Some(key.as_str())));
            }

            let is_object = rewritten
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("object"));
            let has_empty_properties = rewritten
                .get("properties")
                .and_then(Value::as_object)
                .is_some_and(Map::is_empty);
            if is_object && has_empty_properties {
                rewritten.insert(
                    "properties".to_string(),
                    json!({"_placeholder": {"type": "string"}}),
                );
            }

            Value::Object(rewritten)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rewrite_schema_node(item, defs, parent_key))
                .collect(),
        ),
        other => other.clone(),
    }
}
