mod anthropic;
mod google;
mod openai;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use google::{GoogleModel, GoogleModelConfig};
pub use openai::{OpenAiCompatibleModel, OpenAiModelConfig};

#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Why the provider's raw arguments could not be decoded; `arguments` is then `{}`.
    pub invalid_arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelToolChoice {
    Auto,
    Required,
    None,
    Tool(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelCompletion {
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: Option<ModelUsage>,
    /// Raw provider usage payload, kept for fields the normalized usage does not model.
    pub metadata: Value,
}

/// Token accounting exactly as the provider reported it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
}

/// A value produced under a constrained output schema, plus the completion that carried it.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredCompletion {
    pub value: Value,
    pub completion: ModelCompletion,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError>;

    /// Asks for a value matching `schema.parameters`.
    ///
    /// The default forces a call of a single synthetic tool whose arguments are the output.
    async fn invoke_structured(
        &self,
        messages: &[ModelMessage],
        schema: &ModelToolDefinition,
    ) -> Result<StructuredCompletion, ProviderError> {
        let completion = self
            .invoke(
                messages,
                std::slice::from_ref(schema),
                ModelToolChoice::Tool(schema.name.clone()),
            )
            .await?;

        let value = completion
            .tool_calls
            .iter()
            .find(|call| call.name == schema.name)
            .map(|call| call.arguments.clone())
            .ok_or_else(|| {
                ProviderError::Response(format!(
                    "model did not return structured output '{}'",
                    schema.name
                ))
            })?;

        Ok(StructuredCompletion { value, completion })
    }
}
