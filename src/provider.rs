use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::{
    AnthropicModel, ChatModel, GoogleModel, OpenAiCompatibleModel, OpenAiModelConfig,
};
use crate::pricing::{self, PriceEntry, PriceTable};

/// The closed set of model providers a run can be metered against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Anthropic,
    Bedrock,
    Google,
    VertexAi,
    AzureOpenAi,
    Groq,
    Cohere,
    Ollama,
}

impl Provider {
    /// Selection precedence when several `*_MODEL` variables are set.
    pub const ALL: [Provider; 10] = [
        Provider::OpenAi,
        Provider::OpenRouter,
        Provider::Anthropic,
        Provider::Bedrock,
        Provider::Google,
        Provider::VertexAi,
        Provider::AzureOpenAi,
        Provider::Groq,
        Provider::Cohere,
        Provider::Ollama,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Anthropic => "anthropic",
            Provider::Bedrock => "bedrock",
            Provider::Google => "google",
            Provider::VertexAi => "vertexai",
            Provider::AzureOpenAi => "azure_openai",
            Provider::Groq => "groq",
            Provider::Cohere => "cohere",
            Provider::Ollama => "ollama",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::OpenRouter => "OpenRouter",
            Provider::Anthropic => "Anthropic",
            Provider::Bedrock => "Bedrock",
            Provider::Google => "Google",
            Provider::VertexAi => "VertexAI",
            Provider::AzureOpenAi => "Azure OpenAI",
            Provider::Groq => "Groq",
            Provider::Cohere => "Cohere",
            Provider::Ollama => "Ollama",
        }
    }

    /// Environment variable naming the model for this provider.
    pub fn model_env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_MODEL",
            Provider::OpenRouter => "OPENROUTER_MODEL",
            Provider::Anthropic => "ANTHROPIC_MODEL",
            Provider::Bedrock => "BEDROCK_MODEL",
            Provider::Google => "GOOGLE_MODEL",
            Provider::VertexAi => "VERTEXAI_MODEL",
            Provider::AzureOpenAi => "AZURE_OPENAI_MODEL",
            Provider::Groq => "GROQ_MODEL",
            Provider::Cohere => "COHERE_MODEL",
            Provider::Ollama => "OLLAMA_MODEL",
        }
    }

    pub fn price_table(self) -> PriceTable {
        match self {
            Provider::OpenAi => pricing::OPENAI,
            Provider::OpenRouter => pricing::OPENROUTER,
            Provider::Anthropic => pricing::ANTHROPIC,
            Provider::Bedrock => pricing::BEDROCK,
            Provider::Google => pricing::GOOGLE,
            Provider::VertexAi => pricing::VERTEXAI,
            Provider::Groq => pricing::GROQ,
            Provider::AzureOpenAi | Provider::Cohere | Provider::Ollama => pricing::UNPRICED,
        }
    }

    pub fn price(self, model: &str) -> Option<PriceEntry> {
        pricing::find(self.price_table(), model)
    }

    /// Whether the raw input-token count already includes cached tokens.
    ///
    /// Only verified for OpenAI-style accounting; other providers pass input through untouched.
    pub fn input_includes_cached_tokens(self) -> bool {
        matches!(self, Provider::OpenAi | Provider::OpenRouter)
    }

    /// Billed total cost reported inside the response metadata, if this provider reports one.
    pub fn reported_total_cost(self, metadata: &Value) -> Option<f64> {
        match self {
            Provider::OpenRouter => metadata
                .get("usage")
                .and_then(|usage| usage.get("cost"))
                .and_then(Value::as_f64),
            _ => None,
        }
    }

    /// Picks the first provider whose model variable is set.
    pub fn from_env() -> Result<(Provider, String), ProviderError> {
        Self::select(|name| std::env::var(name).ok())
    }

    pub fn select(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Provider, String), ProviderError> {
        Self::ALL
            .into_iter()
            .find_map(|provider| {
                lookup(provider.model_env_var())
                    .filter(|model| !model.trim().is_empty())
                    .map(|model| (provider, model))
            })
            .ok_or_else(|| ProviderError::Request("no provider is configured".to_string()))
    }

    /// Builds the model client for this provider.
    pub fn connect(
        self,
        model: &str,
        temperature: Option<f32>,
    ) -> Result<Arc<dyn ChatModel>, ProviderError> {
        let openai_compatible = |base_url: String, key_var: Option<&str>| {
            let mut config = OpenAiModelConfig::new(base_url, model);
            if let Some(key_var) = key_var {
                let api_key = std::env::var(key_var)
                    .map_err(|_| ProviderError::Request(format!("{key_var} is not set")))?;
                config = config.with_api_key(api_key);
            }
            config.temperature = temperature;
            config.include_usage_cost = self == Provider::OpenRouter;
            OpenAiCompatibleModel::new(config)
        };
        let base_url = |var: &str, default: &str| {
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        };

        let client: Arc<dyn ChatModel> = match self {
            Provider::OpenAi => Arc::new(openai_compatible(
                base_url("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                Some("OPENAI_API_KEY"),
            )?),
            Provider::OpenRouter => Arc::new(openai_compatible(
                "https://openrouter.ai/api/v1".to_string(),
                Some("OPENROUTER_API_KEY"),
            )?),
            Provider::Groq => Arc::new(openai_compatible(
                "https://api.groq.com/openai/v1".to_string(),
                Some("GROQ_API_KEY"),
            )?),
            Provider::Ollama => Arc::new(openai_compatible(
                base_url("OLLAMA_BASE_URL", "http://localhost:11434/v1"),
                None,
            )?),
            Provider::Anthropic => Arc::new(AnthropicModel::from_env(model, temperature)?),
            Provider::Google => Arc::new(GoogleModel::from_env(model, temperature)?),
            Provider::Bedrock | Provider::VertexAi | Provider::AzureOpenAi | Provider::Cohere => {
                return Err(ProviderError::Unsupported(self.id()));
            }
        };

        Ok(client)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for Provider {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}
