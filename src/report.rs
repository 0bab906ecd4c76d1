//! Human-readable run reporting: per-call usage, run totals and the verdict.

use std::time::Duration;

use tracing::{debug, info};

use crate::agent::{Verdict, VerdictResult};
use crate::llm::ModelCompletion;
use crate::provider::Provider;
use crate::usage::{RunTotals, Usage};

const PREVIEW_CHARS: usize = 100;

/// `42ms` below one second, `1.23s` from one second on.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}

/// Cuts `text` to at most 100 characters, marking the cut with an ellipsis.
pub fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut = text.chars().take(PREVIEW_CHARS - 1).collect::<String>();
    cut.push('…');
    cut
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Dollar amount with five decimals; absent costs print as zero.
pub fn format_cost(cost: Option<f64>) -> String {
    let formatted = format!("{:.5}", cost.unwrap_or(0.0));
    let (whole, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00000"));
    let (sign, whole) = match whole.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", whole),
    };
    format!("{sign}${}.{fraction}", group_thousands(whole))
}

pub fn format_tokens(tokens: Option<u64>) -> String {
    format!("{}tk", group_thousands(&tokens.unwrap_or(0).to_string()))
}

fn usage_tag(provider: Provider, model: &str, total: Option<f64>) -> String {
    format!(
        "LLM usage: {}/{model} ({})",
        provider.display_name(),
        format_cost(total)
    )
}

pub fn log_usage(usage: &Usage, completion: &ModelCompletion) {
    let tag = usage_tag(usage.provider, &usage.model, usage.cost.total);
    if completion.tool_calls.is_empty() {
        let text = completion.text.as_deref().unwrap_or_default();
        info!(text_length = text.chars().count(), "{tag} Text");
        debug!("{tag} Text {text}");
    } else {
        let calls = completion
            .tool_calls
            .iter()
            .map(|call| format!("Call {}({})", call.name, call.arguments))
            .collect::<Vec<_>>()
            .join(", ");
        info!("{tag} {calls}");
    }
}

pub fn total_usage_line(totals: &RunTotals) -> String {
    let tag = usage_tag(totals.provider, &totals.model, totals.cost.total);
    format!(
        "{tag} Total input: {}/{} output: {}/{} cachedRead: {}/{} cachedWrite: {}/{}",
        format_cost(totals.cost.input),
        format_tokens(Some(totals.tokens.input)),
        format_cost(totals.cost.output),
        format_tokens(Some(totals.tokens.output)),
        format_cost(totals.cost.cached_read),
        format_tokens(totals.tokens.cached_read),
        format_cost(totals.cost.cached_write),
        format_tokens(totals.tokens.cached_write),
    )
}

pub fn log_total_usage(totals: &RunTotals) {
    info!(
        responses = totals.responses,
        reported_cost = ?totals.cost.total_reported_by_provider,
        "{}",
        total_usage_line(totals)
    );
}

pub fn log_verdict(verdict: &Verdict) {
    let result = match verdict.result {
        VerdictResult::Pass => "PASS",
        VerdictResult::Fail => "FAIL",
    };
    info!("Test result: {result}, Summary:\n{}", verdict.summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{CostBreakdown, TokenCounts};

    #[test]
    fn elapsed_switches_units_at_one_second() {
        assert_eq!(format_elapsed(Duration::from_millis(42)), "42ms");
        assert_eq!(format_elapsed(Duration::from_millis(999)), "999ms");
        assert_eq!(format_elapsed(Duration::from_millis(1234)), "1.23s");
    }

    #[test]
    fn preview_truncates_long_content_only() {
        assert_eq!(preview("short"), "short");

        let long = "x".repeat(150);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), 100);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn costs_and_tokens_use_grouped_digits() {
        assert_eq!(format_cost(Some(0.0075)), "$0.00750");
        assert_eq!(format_cost(None), "$0.00000");
        assert_eq!(format_cost(Some(1234.5)), "$1,234.50000");
        assert_eq!(format_tokens(Some(1_234_567)), "1,234,567tk");
        assert_eq!(format_tokens(Some(999)), "999tk");
        assert_eq!(format_tokens(None), "0tk");
    }

    #[test]
    fn total_line_lists_every_category() {
        let totals = RunTotals {
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            responses: 2,
            tokens: TokenCounts {
                input: 2000,
                output: 1000,
                cached_read: Some(1024),
                cached_write: Some(0),
            },
            cost: CostBreakdown {
                input: Some(0.005),
                output: Some(0.01),
                cached_read: Some(0.00128),
                cached_write: None,
                total: Some(0.01628),
                total_reported_by_provider: None,
            },
        };

        assert_eq!(
            total_usage_line(&totals),
            "LLM usage: OpenAI/gpt-4o ($0.01628) Total input: $0.00500/2,000tk \
             output: $0.01000/1,000tk cachedRead: $0.00128/1,024tk cachedWrite: $0.00000/0tk"
        );
    }
}
