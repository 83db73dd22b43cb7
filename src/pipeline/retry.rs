use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    agent::{Agent, AgentRequest},
    types::StructuredOutput,
    validation::validate_output,
};

pub const FALLBACK_REPLY: &str = "I'm having trouble retrieving that information in the correct format right now. Please try again.";

/// Re-invokes the agent with corrective feedback until its output validates
/// or the attempt budget runs out.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: usize,
    attempt_timeout: Option<Duration>,
}

impl RetryController {
    pub fn new(max_attempts: usize, attempt_timeout: Option<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
        }
    }

    /// Agent failures and timeouts propagate unchanged; only schema
    /// violations are retried.
    pub async fn run(
        &self,
        agent: &dyn Agent,
        request: AgentRequest,
    ) -> anyhow::Result<StructuredOutput> {
        let mut prompt = request.prompt;

        for attempt in 1..=self.max_attempts {
            let started_at = Instant::now();
            let candidate = self
                .invoke(
                    agent,
                    AgentRequest {
                        user_id: request.user_id.clone(),
                        prompt: prompt.clone(),
                    },
                )
                .await?;

            match validate_output(&candidate) {
                Ok(output) => {
                    info!(
                        user_id = %request.user_id,
                        attempt,
                        output_type = output.kind.as_str(),
                        duration_ms = elapsed_ms(started_at),
                        "agent output accepted"
                    );
                    return Ok(output);
                }
                Err(violation) => {
                    warn!(
                        user_id = %request.user_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        reason = %violation.reason,
                        "agent output failed validation"
                    );
                    if attempt < self.max_attempts {
                        prompt.push_str(&corrective_feedback(&violation.reason));
                    }
                }
            }
        }

        warn!(
            user_id = %request.user_id,
            max_attempts = self.max_attempts,
            "validation attempts exhausted; returning fallback reply"
        );
        Ok(StructuredOutput::text(FALLBACK_REPLY))
    }

    async fn invoke(&self, agent: &dyn Agent, request: AgentRequest) -> anyhow::Result<Value> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, agent.run(request))
                .await
                .map_err(|_| anyhow::anyhow!("agent timed out after {}ms", limit.as_millis()))?,
            None => agent.run(request).await,
        }
    }
}

pub fn corrective_feedback(reason: &str) -> String {
    format!(
        "\n\n[SYSTEM ERROR]: Your previous response was INVALID. Reason: \"{reason}\". \nIMPORTANT: You MUST correct this. Ensure strict adherence to the Output Schema. Do not apologize, just return the Correct JSON."
    )
}

fn elapsed_ms(started_at: Instant) -> u64 {
    started_at
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::{
        agent::{Agent, AgentEventStream, AgentRequest},
        types::MessageKind,
    };

    use super::{FALLBACK_REPLY, RetryController, corrective_feedback};

    /// Replays canned outputs and records every prompt it was given.
    struct ScriptedAgent {
        outputs: Mutex<Vec<Value>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedAgent {
        fn new(outputs: Vec<Value>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into_iter().rev().collect()),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("lock should succeed").clone()
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn run(&self, request: AgentRequest) -> anyhow::Result<Value> {
            self.prompts
                .lock()
                .expect("lock should succeed")
                .push(request.prompt);
            self.outputs
                .lock()
                .expect("lock should succeed")
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        async fn run_streamed(&self, _request: AgentRequest) -> anyhow::Result<AgentEventStream> {
            Err(anyhow::anyhow!("not used"))
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl Agent for SlowAgent {
        async fn run(&self, _request: AgentRequest) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({ "type": "text", "content": "late" }))
        }

        async fn run_streamed(&self, _request: AgentRequest) -> anyhow::Result<AgentEventStream> {
            Err(anyhow::anyhow!("not used"))
        }
    }

    fn request() -> AgentRequest {
        AgentRequest {
            user_id: "u1".to_owned(),
            prompt: "show deals".to_owned(),
        }
    }

    fn empty_deals() -> Value {
        json!({ "type": "deals", "content": "Here you go", "deals": [] })
    }

    #[tokio::test]
    async fn valid_first_attempt_is_returned_without_retry() {
        let agent = ScriptedAgent::new(vec![json!({ "type": "text", "content": "hello" })]);
        let output = RetryController::new(3, None)
            .run(&agent, request())
            .await
            .expect("run should succeed");

        assert_eq!(output.content.as_deref(), Some("hello"));
        assert_eq!(agent.prompts().len(), 1);
    }

    #[tokio::test]
    async fn second_attempt_sees_corrective_feedback() {
        let agent = ScriptedAgent::new(vec![
            empty_deals(),
            json!({ "type": "text", "content": "No deals right now." }),
        ]);
        let output = RetryController::new(3, None)
            .run(&agent, request())
            .await
            .expect("run should succeed");

        assert_eq!(output.kind, MessageKind::Text);
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "show deals");
        assert!(prompts[1].starts_with("show deals\n\n[SYSTEM ERROR]: Your previous response was INVALID."));
        assert!(prompts[1].contains("Type is 'deals' but the 'deals' list is empty."));
    }

    #[tokio::test]
    async fn third_attempt_output_is_returned_after_two_violations() {
        let agent = ScriptedAgent::new(vec![
            empty_deals(),
            empty_deals(),
            json!({ "type": "text", "content": "Nothing matched, try a wider range." }),
        ]);
        let output = RetryController::new(3, None)
            .run(&agent, request())
            .await
            .expect("run should succeed");

        assert_eq!(output.kind, MessageKind::Text);
        assert_eq!(
            output.content.as_deref(),
            Some("Nothing matched, try a wider range.")
        );
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[2].matches("[SYSTEM ERROR]").count(), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fall_back_to_apology_text() {
        let agent = ScriptedAgent::new(vec![empty_deals(), empty_deals(), empty_deals()]);
        let output = RetryController::new(3, None)
            .run(&agent, request())
            .await
            .expect("run should succeed");

        assert_eq!(output.kind, MessageKind::Text);
        assert_eq!(output.content.as_deref(), Some(FALLBACK_REPLY));
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[2].matches("[SYSTEM ERROR]").count(), 2);
    }

    #[tokio::test]
    async fn agent_errors_are_not_retried() {
        let agent = ScriptedAgent::new(Vec::new());
        let result = RetryController::new(3, None).run(&agent, request()).await;

        assert!(result.is_err());
        assert_eq!(agent.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_an_error() {
        let result = RetryController::new(3, Some(Duration::from_millis(100)))
            .run(&SlowAgent, request())
            .await;

        let error = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(error.contains("timed out"));
    }

    #[test]
    fn feedback_quotes_the_reason() {
        let feedback = corrective_feedback("bad shape");
        assert_eq!(
            feedback,
            "\n\n[SYSTEM ERROR]: Your previous response was INVALID. Reason: \"bad shape\". \nIMPORTANT: You MUST correct this. Ensure strict adherence to the Output Schema. Do not apologize, just return the Correct JSON."
        );
    }
}
