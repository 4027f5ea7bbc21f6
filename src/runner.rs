//! Stage execution with retry and fallback.
//!
//! The runner owns the resilience loop around a single stage: validate the
//! input once, then call the model, parse, validate, and normalize, retrying
//! transient failures with exponential backoff. Parse failures do not retry;
//! they route to the stage's deterministic fallback instead.

use std::sync::Arc;
use tracing::warn;

use crate::config::Prompts;
use crate::error::{ContractSide, ReferatError, Result};
use crate::llm::ChatModel;
use crate::retry::RetryPolicy;
use crate::stage::{Heuristics, StageSpec};

pub struct StageRunner {
    chat: Arc<dyn ChatModel>,
    model: String,
    policy: RetryPolicy,
    heuristics: Heuristics,
}

impl StageRunner {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        model: String,
        policy: RetryPolicy,
        heuristics: Heuristics,
    ) -> Self {
        Self {
            chat,
            model,
            policy,
            heuristics,
        }
    }

    /// Runs one stage end-to-end, returning its validated, normalized output.
    ///
    /// Input validation failures are immediate: they indicate a caller bug,
    /// so no model call is made and nothing is retried.
    pub async fn run<S: StageSpec>(
        &self,
        stage: &S,
        prompts: &Prompts,
        input: &S::Input,
    ) -> Result<S::Output> {
        stage.validate_input(input).map_err(|e| ReferatError::Stage {
            stage: S::ID,
            attempts: 0,
            source: Box::new(e),
        })?;

        let system = stage.system_prompt(prompts);
        let user = stage.user_prompt(prompts, input);

        let mut attempt = 0usize;
        loop {
            match self.attempt_stage(stage, input, system, &user).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        stage = %S::ID,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        cause = %e,
                        "stage attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ReferatError::Stage {
                        stage: S::ID,
                        attempts: attempt + 1,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    async fn attempt_stage<S: StageSpec>(
        &self,
        stage: &S,
        input: &S::Input,
        system: &str,
        user: &str,
    ) -> Result<S::Output> {
        let raw = self.chat.complete(&self.model, system, user).await?;

        match stage.parse_response(&raw) {
            Ok(mut output) => {
                stage.validate_primary(&output)?;
                stage.normalize(input, &mut output, &self.heuristics);
                Ok(output)
            }
            Err(failure) => {
                warn!(
                    stage = %S::ID,
                    cause = %failure,
                    "response parsing failed, using fallback"
                );
                let mut output = stage.fallback(input, &raw, &self.heuristics);
                // A fallback that cannot satisfy its own contract is a bug
                // in the fallback, not a transient fault: fail immediately.
                stage.validate_output(&output, ContractSide::Fallback)?;
                stage.normalize(input, &mut output, &self.heuristics);
                Ok(output)
            }
        }
    }
}
