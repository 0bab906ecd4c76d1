use super::{Agent, Verdict, assistant_message};
use crate::error::AgentError;
use crate::llm::ModelMessage;

impl Agent {
    /// Explicit model/tool loop that returns the verdict without an event stream.
    pub async fn run_custom<F>(
        &self,
        initial_messages: Vec<ModelMessage>,
        mut on_text: F,
    ) -> Result<Verdict, AgentError>
    where
        F: FnMut(&str),
    {
        let mut history = self.initial_history(initial_messages);
        let mut rounds = 0;

        loop {
            if rounds == self.config.max_iterations {
                return Err(AgentError::MaxIterationsReached {
                    max_iterations: self.config.max_iterations,
                });
            }
            rounds += 1;

            let completion = self.call_model(&history).await?;
            if let Some(text) = completion.text.as_deref().filter(|text| !text.is_empty()) {
                on_text(text);
            }

            if completion.tool_calls.is_empty() {
                break;
            }

            let executions = self.dispatch_tool_calls(&completion.tool_calls).await;
            history.push(assistant_message(&completion));
            history.extend(executions.iter().map(|execution| execution.message()));
        }

        self.request_verdict(&history).await
    }
}
