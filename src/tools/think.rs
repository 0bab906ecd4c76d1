use serde_json::json;

use crate::error::ToolError;

use super::ToolSpec;

pub const THINK_TOOL_NAME: &str = "think_tool";

const THINK_TOOL_REPLY: &str = "Call the next tool you picked. Don't call this tool in a row.";

/// Local scratchpad tool that makes the model state its plan before each real tool call.
pub fn think_tool() -> ToolSpec {
    let tool = ToolSpec::new(
        THINK_TOOL_NAME,
        "Call this tool every time before actually calling the actual tool and think your reasoning process. The call sequence is: call this tool, then call the actual tool. Never call this tool in a row.",
    );
    // Static schema, known valid.
    ToolSpec {
        json_schema: json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "A reasoning about the next tool call. Use the same language as the original user's input."
                }
            },
            "required": ["thought"],
            "additionalProperties": false
        }),
        ..tool
    }
    .with_handler(|args| async move {
        let thought = args
            .get("thought")
            .and_then(|value| value.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: THINK_TOOL_NAME.to_string(),
                message: "thought must be a string".to_string(),
            })?;
        tracing::info!("LLM think: {thought}");
        Ok(THINK_TOOL_REPLY.to_string())
    })
}
