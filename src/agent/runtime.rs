use async_stream::try_stream;
use futures_util::{Stream, StreamExt};

use super::{Agent, AgentEvent, Verdict, assistant_message};
use crate::error::AgentError;
use crate::llm::ModelMessage;

impl Agent {
    /// Event stream of one run; the last event of a successful run is the verdict.
    ///
    /// Dropping the stream stops the run at its next suspension point.
    pub fn query_stream(
        &self,
        initial_messages: Vec<ModelMessage>,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + '_ {
        try_stream! {
            let mut history = self.initial_history(initial_messages);
            let mut finished = false;

            for _ in 0..self.config.max_iterations {
                let completion = self.call_model(&history).await?;

                if let Some(thinking) = completion.thinking.clone() {
                    yield AgentEvent::Thinking { content: thinking };
                }

                if let Some(text) = completion.text.clone() {
                    if !text.is_empty() {
                        yield AgentEvent::Text { content: text };
                    }
                }

                if completion.tool_calls.is_empty() {
                    finished = true;
                    break;
                }

                for tool_call in &completion.tool_calls {
                    yield AgentEvent::ToolCall {
                        tool: tool_call.name.clone(),
                        args_json: tool_call.arguments.clone(),
                        tool_call_id: tool_call.id.clone(),
                    };
                }

                let executions = self.dispatch_tool_calls(&completion.tool_calls).await;
                history.push(assistant_message(&completion));
                history.extend(executions.iter().map(|execution| execution.message()));

                for execution in executions {
                    yield AgentEvent::ToolResult {
                        tool: execution.tool_call.name,
                        result_text: execution.result_text,
                        tool_call_id: execution.tool_call.id,
                        is_error: execution.is_error,
                    };
                }
            }

            if !finished {
                Err::<(), AgentError>(AgentError::MaxIterationsReached {
                    max_iterations: self.config.max_iterations,
                })?;
            }

            let verdict = self.request_verdict(&history).await?;
            yield AgentEvent::Verdict(verdict);
        }
    }
}

/// Consumes a run's event stream, forwarding text to `on_text`.
///
/// Never fails: stream errors and a missing verdict both become a FAIL verdict.
pub async fn invoke_agent<S, F>(stream: S, mut on_text: F) -> Verdict
where
    S: Stream<Item = Result<AgentEvent, AgentError>>,
    F: FnMut(&str),
{
    futures_util::pin_mut!(stream);

    let mut last_event = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if let AgentEvent::Text { content } = &event {
                    on_text(content);
                }
                last_event = Some(event);
            }
            Err(err) => return Verdict::fail(format!("Error: {err}")),
        }
    }

    match last_event {
        Some(AgentEvent::Verdict(verdict)) => verdict,
        other => Verdict::fail(format!(
            "Error: Invalid format of the last event {other:?}"
        )),
    }
}
