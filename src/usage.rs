//! Token and cost accounting for model responses.

use std::ops::Add;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::llm::{ModelCompletion, ModelUsage};
use crate::provider::Provider;

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cached_read: Option<u64>,
    pub cached_write: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input: Option<f64>,
    pub output: Option<f64>,
    pub cached_read: Option<f64>,
    pub cached_write: Option<f64>,
    pub total: Option<f64>,
    /// Billed total as reported by the provider; may disagree with `total`.
    pub total_reported_by_provider: Option<f64>,
}

impl CostBreakdown {
    pub fn is_empty(&self) -> bool {
        *self == CostBreakdown::default()
    }
}

/// Normalized usage of one model response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Usage {
    pub provider: Provider,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: CostBreakdown,
}

/// Field-wise sum of every usage recorded during a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunTotals {
    pub provider: Provider,
    pub model: String,
    pub responses: u32,
    pub tokens: TokenCounts,
    pub cost: CostBreakdown,
}

impl RunTotals {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            responses: 0,
            tokens: TokenCounts::default(),
            cost: CostBreakdown::default(),
        }
    }

    pub fn add(&mut self, usage: &Usage) {
        self.responses += 1;
        self.tokens.input += usage.tokens.input;
        self.tokens.output += usage.tokens.output;
        self.tokens.cached_read = sum(self.tokens.cached_read, usage.tokens.cached_read);
        self.tokens.cached_write = sum(self.tokens.cached_write, usage.tokens.cached_write);

        let cost = &mut self.cost;
        cost.input = sum(cost.input, usage.cost.input);
        cost.output = sum(cost.output, usage.cost.output);
        cost.cached_read = sum(cost.cached_read, usage.cost.cached_read);
        cost.cached_write = sum(cost.cached_write, usage.cost.cached_write);
        cost.total = sum(cost.total, usage.cost.total);
        cost.total_reported_by_provider = sum(
            cost.total_reported_by_provider,
            usage.cost.total_reported_by_provider,
        );
    }
}

/// Present + present sums, present + absent keeps the present side, absent + absent stays absent.
fn sum<T: Add<Output = T>>(current: Option<T>, next: Option<T>) -> Option<T> {
    match (current, next) {
        (Some(current), Some(next)) => Some(current + next),
        (current, None) => current,
        (None, next) => next,
    }
}

/// Normalizes one raw usage record and prices it.
pub fn compute_usage(
    provider: Provider,
    model: &str,
    raw: &ModelUsage,
    metadata: &Value,
) -> Usage {
    let cached_read = u64::from(raw.cache_read_tokens.unwrap_or(0));
    let cached_write = u64::from(raw.cache_creation_tokens.unwrap_or(0));
    let raw_input = u64::from(raw.input_tokens);
    let input = if provider.input_includes_cached_tokens() {
        raw_input.saturating_sub(cached_read + cached_write)
    } else {
        raw_input
    };

    let tokens = TokenCounts {
        input,
        output: u64::from(raw.output_tokens),
        cached_read: Some(cached_read),
        cached_write: Some(cached_write),
    };

    let Some(price) = provider.price(model) else {
        return Usage {
            provider,
            model: model.to_string(),
            tokens,
            cost: CostBreakdown::default(),
        };
    };

    let priced = |rate: Option<f64>, count: Option<u64>| match (rate, count) {
        (Some(rate), Some(count)) => Some(rate * count as f64 / TOKENS_PER_PRICE_UNIT),
        _ => None,
    };

    let input_cost = priced(Some(price.input), Some(tokens.input));
    let output_cost = priced(Some(price.output), Some(tokens.output));
    let cached_read_cost = priced(price.cached_read, tokens.cached_read);
    let cached_write_cost = priced(price.cached_write, tokens.cached_write);
    let total = [input_cost, output_cost, cached_read_cost, cached_write_cost]
        .into_iter()
        .flatten()
        .sum::<f64>();

    Usage {
        provider,
        model: model.to_string(),
        tokens,
        cost: CostBreakdown {
            input: input_cost,
            output: output_cost,
            cached_read: cached_read_cost,
            cached_write: cached_write_cost,
            total: Some(total),
            total_reported_by_provider: provider.reported_total_cost(metadata),
        },
    }
}

type UsageObserver = Box<dyn Fn(&Usage, &ModelCompletion) + Send + Sync>;

/// Records every model response of a run and keeps the running totals.
pub struct UsageMeter {
    provider: Provider,
    model: String,
    totals: Mutex<RunTotals>,
    observers: Vec<UsageObserver>,
}

impl UsageMeter {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            provider,
            totals: Mutex::new(RunTotals::new(provider, model.clone())),
            model,
            observers: Vec::new(),
        }
    }

    /// Registers a callback invoked with every recorded usage.
    pub fn on_usage<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Usage, &ModelCompletion) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Records the usage carried by a completion. Completions without usage count as zero tokens.
    pub fn record(&self, completion: &ModelCompletion) -> Usage {
        let raw = completion.usage.clone().unwrap_or_default();
        let usage = compute_usage(self.provider, &self.model, &raw, &completion.metadata);

        match self.totals.lock() {
            Ok(mut totals) => totals.add(&usage),
            Err(poisoned) => poisoned.into_inner().add(&usage),
        }

        for observer in &self.observers {
            observer(&usage, completion);
        }

        usage
    }

    pub fn totals(&self) -> RunTotals {
        match self.totals.lock() {
            Ok(totals) => totals.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMeter")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("observers", &self.observers.len())
            .finish()
    }
}
