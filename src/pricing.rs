//! Static per-model prices in USD per million tokens.
//!
//! A missing model is expected (new or unlisted models); callers treat it as "unpriced".

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceEntry {
    pub input: f64,
    pub output: f64,
    pub cached_read: Option<f64>,
    pub cached_write: Option<f64>,
}

impl PriceEntry {
    const fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cached_read: None,
            cached_write: None,
        }
    }

    const fn cached(self, cached_read: f64) -> Self {
        Self {
            cached_read: Some(cached_read),
            ..self
        }
    }

    const fn cache_write(self, cached_write: f64) -> Self {
        Self {
            cached_write: Some(cached_write),
            ..self
        }
    }
}

pub type PriceTable = &'static [(&'static str, PriceEntry)];

pub fn find(table: PriceTable, model: &str) -> Option<PriceEntry> {
    table
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, entry)| *entry)
}

pub const OPENAI: PriceTable = &[
    ("gpt-4o-mini", PriceEntry::new(0.15, 0.6).cached(0.075)),
    ("gpt-4o", PriceEntry::new(2.5, 10.0).cached(1.25)),
    ("gpt-4.1", PriceEntry::new(2.0, 8.0).cached(0.5)),
    ("gpt-4.1-mini", PriceEntry::new(0.4, 1.6).cached(0.1)),
    ("gpt-4.1-nano", PriceEntry::new(0.1, 0.4).cached(0.025)),
];

pub const OPENROUTER: PriceTable = &[
    (
        "openai/gpt-4o",
        PriceEntry::new(2.5, 10.0).cached(1.25).cache_write(0.0),
    ),
    (
        "openai/gpt-4o-mini",
        PriceEntry::new(0.15, 0.6).cached(0.075).cache_write(0.0),
    ),
    ("openai/gpt-4.1", PriceEntry::new(2.0, 8.0).cached(0.5)),
    ("openai/gpt-4.1-mini", PriceEntry::new(0.4, 1.6).cached(0.1)),
    (
        "google/gemini-2.0-flash-001",
        PriceEntry::new(0.1, 0.4).cached(0.025).cache_write(1.0),
    ),
    (
        "google/gemini-2.0-flash-lite-001",
        PriceEntry::new(0.075, 0.3),
    ),
    (
        "google/gemini-2.5-flash-preview",
        PriceEntry::new(0.15, 0.6).cached(0.0).cache_write(0.0),
    ),
    // Tiered pricing is flattened to the lowest tier.
    (
        "google/gemini-2.5-pro-preview",
        PriceEntry::new(1.25, 10.0).cached(0.31),
    ),
    (
        "deepseek/deepseek-chat",
        PriceEntry::new(0.4, 0.89).cached(0.04).cache_write(0.4),
    ),
];

pub const ANTHROPIC: PriceTable = &[
    (
        "claude-3-7-sonnet-20250219",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "claude-3-5-sonnet-20241022",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "claude-3-5-haiku-20241022",
        PriceEntry::new(0.8, 4.0).cached(0.08).cache_write(1.0),
    ),
    (
        "claude-3-opus-20240229",
        PriceEntry::new(15.0, 75.0).cached(1.5).cache_write(18.75),
    ),
    (
        "claude-3-haiku-20240307",
        PriceEntry::new(0.25, 1.25).cached(0.03).cache_write(0.3),
    ),
];

pub const BEDROCK: PriceTable = &[
    ("us.amazon.nova-pro-v1:0", PriceEntry::new(0.8, 3.2)),
    ("us.amazon.nova-lite-v1:0", PriceEntry::new(0.06, 0.24)),
    ("us.amazon.nova-micro-v1:0", PriceEntry::new(0.035, 0.14)),
    (
        "anthropic.claude-3-7-sonnet-20250219-v1:0",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "anthropic.claude-3-5-sonnet-20241022-v2:0",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "anthropic.claude-3-5-haiku-20241022-v1:0",
        PriceEntry::new(1.0, 5.0).cached(0.08).cache_write(1.0),
    ),
    (
        "anthropic.claude-3-5-sonnet-20240620-v1:0",
        PriceEntry::new(3.0, 15.0),
    ),
    (
        "anthropic.claude-3-opus-20240229-v1:0",
        PriceEntry::new(15.0, 75.0),
    ),
    (
        "anthropic.claude-3-sonnet-20240229-v1:0",
        PriceEntry::new(3.0, 15.0),
    ),
    (
        "anthropic.claude-3-haiku-20240307-v1:0",
        PriceEntry::new(0.25, 1.25),
    ),
    ("deepseek.r1-v1:0", PriceEntry::new(1.35, 5.4)),
];

pub const GOOGLE: PriceTable = &[
    (
        "gemini-2.0-flash",
        PriceEntry::new(0.1, 0.4).cached(0.025).cache_write(1.0),
    ),
    ("gemini-2.0-flash-lite", PriceEntry::new(0.075, 0.3)),
    (
        "gemini-2.5-flash-preview",
        PriceEntry::new(0.15, 0.6).cached(0.0).cache_write(0.0),
    ),
    (
        "gemini-2.5-pro-preview",
        PriceEntry::new(1.25, 10.0).cached(0.31),
    ),
];

pub const VERTEXAI: PriceTable = &[
    (
        "claude-3-7-sonnet@20250219",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "claude-3-5-sonnet-v2@20241022",
        PriceEntry::new(3.0, 15.0).cached(0.3).cache_write(3.75),
    ),
    (
        "claude-3-5-haiku@20241022",
        PriceEntry::new(1.0, 5.0).cached(0.1).cache_write(1.25),
    ),
    (
        "claude-3-opus@20240229",
        PriceEntry::new(15.0, 75.0).cached(1.5).cache_write(18.75),
    ),
    (
        "claude-3-haiku@20240307",
        PriceEntry::new(0.25, 1.25).cached(0.03).cache_write(0.3),
    ),
    (
        "gemini-2.0-flash",
        PriceEntry::new(0.15, 0.6).cached(0.025).cache_write(0.025),
    ),
    (
        "gemini-2.0-flash-lite",
        PriceEntry::new(0.075, 0.3).cached(0.025).cache_write(0.025),
    ),
    (
        "gemini-2.5-flash-preview",
        PriceEntry::new(0.15, 0.6).cached(0.0).cache_write(0.0),
    ),
    (
        "gemini-2.5-pro-preview",
        PriceEntry::new(1.25, 10.0).cached(0.31),
    ),
];

pub const GROQ: PriceTable = &[("llama-3.1-8b-instant", PriceEntry::new(0.05, 0.1))];

pub const UNPRICED: PriceTable = &[];
