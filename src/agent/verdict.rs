use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::AgentError;
use crate::llm::ModelToolDefinition;

pub const VERDICT_TOOL_NAME: &str = "verdict";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictResult {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Final outcome of a scenario run: `{ "summary": string, "result": "PASS" | "FAIL" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub summary: String,
    pub result: VerdictResult,
}

impl Verdict {
    pub fn pass(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            result: VerdictResult::Pass,
        }
    }

    pub fn fail(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            result: VerdictResult::Fail,
        }
    }

    pub fn passed(&self) -> bool {
        self.result == VerdictResult::Pass
    }

    /// Process exit code for this verdict: 0 on PASS, 1 on FAIL.
    pub fn exit_code(&self) -> u8 {
        if self.passed() { 0 } else { 1 }
    }

    pub(crate) fn from_value(value: Value) -> Result<Self, AgentError> {
        serde_json::from_value(value)
            .map_err(|err| AgentError::InvalidStructuredOutput(err.to_string()))
    }
}

/// Output schema the model must satisfy when reporting the verdict.
pub fn verdict_definition() -> ModelToolDefinition {
    ModelToolDefinition {
        name: VERDICT_TOOL_NAME.to_string(),
        description: "Report the final verdict of the test.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "The summary of the whole test, what you saw and what you did, step-by-step. Use the same language as the original user's input. When you describe the assertion, mention whether it is asserted against an element or the page."
                },
                "result": {
                    "type": "string",
                    "enum": ["PASS", "FAIL"],
                    "description": "The final verdict of the entire test. It must be either PASS or FAIL."
                }
            },
            "required": ["summary", "result"],
            "additionalProperties": false
        }),
    }
}
