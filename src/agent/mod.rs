mod custom;
mod prompt;
mod runtime;
mod verdict;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use crate::error::{AgentError, ToolError};
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
};
use crate::tools::ToolSpec;
use crate::usage::UsageMeter;

pub use prompt::SYSTEM_PROMPT;
pub use runtime::invoke_agent;
pub use verdict::{VERDICT_TOOL_NAME, Verdict, VerdictResult, verdict_definition};

/// Who drives the model/tool rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Orchestration {
    /// Rounds run inside the event-stream runtime; the caller consumes events.
    #[default]
    Managed,
    /// Rounds run in an explicit loop that returns the verdict directly.
    Custom,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of model rounds that may request tools.
    pub max_iterations: u32,
    pub system_prompt: String,
    pub orchestration: Orchestration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            system_prompt: SYSTEM_PROMPT.to_string(),
            orchestration: Orchestration::Managed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Thinking {
        content: String,
    },
    Text {
        content: String,
    },
    ToolCall {
        tool: String,
        args_json: Value,
        tool_call_id: String,
    },
    ToolResult {
        tool: String,
        result_text: String,
        tool_call_id: String,
        is_error: bool,
    },
    Verdict(Verdict),
}

#[derive(Default)]
pub struct AgentBuilder {
    model: Option<Arc<dyn ChatModel>>,
    tools: Vec<ToolSpec>,
    config: AgentConfig,
    usage: Option<Arc<UsageMeter>>,
}

impl AgentBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = system_prompt.into();
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn orchestration(mut self, orchestration: Orchestration) -> Self {
        self.config.orchestration = orchestration;
        self
    }

    pub fn usage_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.usage = Some(meter);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let Some(model) = self.model else {
            return Err(AgentError::Config(
                "agent model must be configured via AgentBuilder::model(...)".to_string(),
            ));
        };

        if self.config.max_iterations == 0 {
            return Err(AgentError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let mut tool_map = HashMap::new();
        for tool in &self.tools {
            if tool_map
                .insert(tool.name().to_string(), tool.clone())
                .is_some()
            {
                return Err(AgentError::Config(format!(
                    "duplicate tool registered: {}",
                    tool.name()
                )));
            }
        }

        let tool_definitions = self.tools.iter().map(ToolSpec::definition).collect();

        Ok(Agent {
            model,
            tool_definitions,
            tool_map,
            config: self.config,
            usage: self.usage,
        })
    }
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tool_definitions: Vec<ModelToolDefinition>,
    tool_map: HashMap<String, ToolSpec>,
    config: AgentConfig,
    usage: Option<Arc<UsageMeter>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Runs the scenario to a verdict. Fatal errors become a FAIL verdict.
    ///
    /// `on_text` receives every piece of model text as it is produced.
    pub async fn run<F>(&self, initial_messages: Vec<ModelMessage>, on_text: F) -> Verdict
    where
        F: FnMut(&str),
    {
        match self.config.orchestration {
            Orchestration::Managed => {
                invoke_agent(self.query_stream(initial_messages), on_text).await
            }
            Orchestration::Custom => self
                .run_custom(initial_messages, on_text)
                .await
                .unwrap_or_else(|err| Verdict::fail(format!("Error: {err}"))),
        }
    }

    fn initial_history(&self, initial_messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
        let mut history = Vec::with_capacity(initial_messages.len() + 1);
        history.push(ModelMessage::System(self.config.system_prompt.clone()));
        history.extend(initial_messages);
        history
    }

    fn tool_choice(&self) -> ModelToolChoice {
        if self.tool_definitions.is_empty() {
            ModelToolChoice::None
        } else {
            ModelToolChoice::Auto
        }
    }

    fn record_usage(&self, completion: &ModelCompletion) {
        if let Some(meter) = &self.usage {
            meter.record(completion);
        }
    }

    async fn call_model(&self, history: &[ModelMessage]) -> Result<ModelCompletion, AgentError> {
        let completion = self
            .model
            .invoke(history, &self.tool_definitions, self.tool_choice())
            .await?;
        self.record_usage(&completion);
        Ok(completion)
    }

    /// Dispatches every call concurrently; results come back in request order.
    async fn dispatch_tool_calls(&self, tool_calls: &[ModelToolCall]) -> Vec<ToolExecutionResult> {
        join_all(tool_calls.iter().map(|call| self.execute_tool_call(call))).await
    }

    async fn execute_tool_call(&self, tool_call: &ModelToolCall) -> ToolExecutionResult {
        let Some(tool) = self.tool_map.get(&tool_call.name) else {
            let err = ToolError::NotFound(tool_call.name.clone());
            return ToolExecutionResult {
                tool_call: tool_call.clone(),
                result_text: format!("Error: {err}"),
                is_error: true,
            };
        };

        let outcome = match &tool_call.invalid_arguments {
            Some(message) => Err(ToolError::InvalidArguments {
                tool: tool_call.name.clone(),
                message: message.clone(),
            }),
            None => tool.execute(tool_call.arguments.clone()).await,
        };

        match outcome {
            Ok(text) => ToolExecutionResult {
                tool_call: tool_call.clone(),
                result_text: text,
                is_error: false,
            },
            Err(err) => ToolExecutionResult {
                tool_call: tool_call.clone(),
                result_text: format!("Tool '{}' failed with error: {err}", tool_call.name),
                is_error: true,
            },
        }
    }

    /// Asks for the structured verdict over the history without the system instruction.
    async fn request_verdict(&self, history: &[ModelMessage]) -> Result<Verdict, AgentError> {
        let conversation = history
            .split_first()
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        let structured = self
            .model
            .invoke_structured(conversation, &verdict_definition())
            .await?;
        self.record_usage(&structured.completion);
        Verdict::from_value(structured.value)
    }
}

fn assistant_message(completion: &ModelCompletion) -> ModelMessage {
    ModelMessage::Assistant {
        content: completion.text.clone(),
        tool_calls: completion.tool_calls.clone(),
    }
}

struct ToolExecutionResult {
    tool_call: ModelToolCall,
    result_text: String,
    is_error: bool,
}

impl ToolExecutionResult {
    fn message(&self) -> ModelMessage {
        ModelMessage::ToolResult {
            tool_call_id: self.tool_call.id.clone(),
            tool_name: self.tool_call.name.clone(),
            content: self.result_text.clone(),
            is_error: self.is_error,
        }
    }
}

#[cfg(test)]
mod tests;
