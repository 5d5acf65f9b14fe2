use std::collections::VecDeque;
use std::sync::Arc;

use careline_core::config::{AgentConfig, ToolCallingMode};
use careline_core::domain::booking::BookingState;
use careline_core::domain::patient::PatientContext;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, InvocationOutcome};
use crate::extractor::{detect_commit_intent, CallExtractor, ExtractOutcome};
use crate::llm::{CapabilityCall, CompletionProvider, CompletionRequest, ProviderError};
use crate::prompts::{self, PromptError};
use crate::transcript::{Entry, Transcript};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_iterations: u32,
    pub warning_threshold: u32,
    pub tool_log_limit: usize,
    pub tool_calling: ToolCallingMode,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            warning_threshold: 6,
            tool_log_limit: 10,
            tool_calling: ToolCallingMode::Native,
        }
    }
}

impl From<&AgentConfig> for RuntimeSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            warning_threshold: config.warning_threshold,
            tool_log_limit: config.tool_log_limit,
            tool_calling: config.tool_calling,
        }
    }
}

/// One capability invocation, kept for debugging only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub capability: String,
    pub arguments: Value,
    pub iteration: u32,
    pub outcome: InvocationOutcome,
}

/// Turn controller for one patient conversation.
///
/// The iteration counter spans the whole conversation: it only goes back to zero
/// on [`AgentRuntime::reset`], so a conversation that ran out of budget keeps
/// answering with the exhaustion message until it is reset.
pub struct AgentRuntime {
    patient: PatientContext,
    booking: BookingState,
    transcript: Transcript,
    provider: Arc<dyn CompletionProvider>,
    dispatcher: Dispatcher,
    settings: RuntimeSettings,
    prose_calls: Option<CallExtractor>,
    iteration: u32,
    invocations: VecDeque<InvocationRecord>,
}

impl AgentRuntime {
    pub fn new(
        patient: PatientContext,
        provider: Arc<dyn CompletionProvider>,
        dispatcher: Dispatcher,
        settings: RuntimeSettings,
    ) -> Result<Self, PromptError> {
        let (instruction, prose_calls) = match settings.tool_calling {
            ToolCallingMode::Native => (prompts::system_instruction(&patient, None)?, None),
            ToolCallingMode::Text => {
                let registry = dispatcher.registry();
                let callable: Vec<_> = registry
                    .schemas()
                    .iter()
                    .filter(|schema| !registry.is_commit(schema.name))
                    .collect();
                let instruction = prompts::system_instruction(&patient, Some(&callable))?;
                let extractor = CallExtractor::new(callable.iter().map(|schema| schema.name));
                (instruction, Some(extractor))
            }
        };

        Ok(Self {
            booking: BookingState::new(patient.id),
            transcript: Transcript::new(instruction),
            patient,
            provider,
            dispatcher,
            settings,
            prose_calls,
            iteration: 0,
            invocations: VecDeque::new(),
        })
    }

    pub fn patient(&self) -> &PatientContext {
        &self.patient
    }

    pub fn booking(&self) -> &BookingState {
        &self.booking
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Most recent invocations, oldest first.
    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations.iter().cloned().collect()
    }

    pub fn booking_progress(&self) -> String {
        self.booking.summary(&self.patient.name)
    }

    /// Runs one operator message through the loop and returns the assistant's reply.
    pub async fn process_turn(&mut self, user_text: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            event_name = "agent.turn.start",
            correlation_id = %correlation_id,
            patient_id = self.patient.id.0,
            iteration = self.iteration,
            "turn started"
        );

        self.transcript.push(Entry::user(user_text));
        match self.run_loop(&correlation_id).await {
            Ok(text) => {
                info!(
                    event_name = "agent.turn.complete",
                    correlation_id = %correlation_id,
                    patient_id = self.patient.id.0,
                    iteration = self.iteration,
                    missing = %self.booking.missing_fields().join(", "),
                    "turn completed"
                );
                text
            }
            Err(error) => {
                warn!(
                    event_name = "agent.provider.error",
                    correlation_id = %correlation_id,
                    patient_id = self.patient.id.0,
                    error = %error,
                    "completion provider failed"
                );
                format!("Error calling completion provider: {error}")
            }
        }
    }

    /// Opening message for the nurse. Capabilities may run before the text comes back.
    pub async fn greet(&mut self) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        self.transcript.push(Entry::user(prompts::GREETING_PROMPT));

        match self.run_loop(&correlation_id).await {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    event_name = "agent.greeting.fallback",
                    correlation_id = %correlation_id,
                    patient_id = self.patient.id.0,
                    error = %error,
                    "greeting fell back to the fixed text"
                );
                prompts::fallback_greeting(&self.patient.name)
            }
        }
    }

    /// Starts the booking over for the same patient.
    pub fn reset(&mut self) {
        self.booking = BookingState::new(self.patient.id);
        self.transcript.reset();
        self.iteration = 0;
        self.invocations.clear();
    }

    async fn run_loop(&mut self, correlation_id: &str) -> Result<String, ProviderError> {
        loop {
            if self.iteration >= self.settings.max_iterations {
                warn!(
                    event_name = "agent.budget.exhausted",
                    correlation_id = %correlation_id,
                    patient_id = self.patient.id.0,
                    iteration = self.iteration,
                    "iteration ceiling reached"
                );
                return Ok(prompts::BUDGET_EXHAUSTED.to_string());
            }

            self.iteration += 1;
            if self.iteration == self.settings.warning_threshold {
                info!(
                    event_name = "agent.budget.warning",
                    correlation_id = %correlation_id,
                    patient_id = self.patient.id.0,
                    iteration = self.iteration,
                    "iteration warning injected"
                );
                self.transcript.push(Entry::system(prompts::warning_note(
                    self.settings.warning_threshold,
                    self.settings.max_iterations,
                )));
            }

            let advertised = match self.prose_calls {
                None => Some(self.dispatcher.registry().schemas()),
                Some(_) => None,
            };
            let completion = self
                .provider
                .complete(CompletionRequest { entries: self.transcript.entries(), capabilities: advertised })
                .await?;

            let Some(extractor) = &self.prose_calls else {
                self.transcript.push(Entry::assistant(completion.text.clone(), completion.calls.clone()));
                if completion.calls.is_empty() {
                    return Ok(completion.text);
                }
                for call in completion.calls {
                    self.invoke(&call.name, call.arguments.clone(), Some(&call), correlation_id).await;
                }
                continue;
            };

            let outcome = extractor.extract(&completion.text);
            self.transcript.push(Entry::assistant(completion.text.clone(), Vec::new()));
            match outcome {
                ExtractOutcome::Calls(calls) => {
                    for call in calls {
                        self.invoke(&call.name, call.arguments, None, correlation_id).await;
                    }
                }
                ExtractOutcome::NoCall => {
                    let commit = self.dispatcher.registry().commit_capability();
                    match commit {
                        Some(name)
                            if self.booking.committed().is_none()
                                && detect_commit_intent(&completion.text) =>
                        {
                            self.invoke(name, json!({}), None, correlation_id).await;
                        }
                        _ => return Ok(completion.text),
                    }
                }
            }
        }
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: Value,
        call: Option<&CapabilityCall>,
        correlation_id: &str,
    ) {
        let outcome = self.dispatcher.execute(name, arguments.clone(), &mut self.booking).await;
        info!(
            event_name = "agent.capability.invoked",
            correlation_id = %correlation_id,
            patient_id = self.patient.id.0,
            iteration = self.iteration,
            capability = name,
            outcome = ?outcome.outcome,
            filled = ?outcome.filled,
            "capability invoked"
        );

        self.transcript.push(match call {
            Some(call) => Entry::tool_result(call, &outcome.result),
            None => Entry::text_tool_result(name, &outcome.result),
        });

        self.invocations.push_back(InvocationRecord {
            capability: name.to_string(),
            arguments,
            iteration: self.iteration,
            outcome: outcome.outcome,
        });
        while self.invocations.len() > self.settings.tool_log_limit {
            self.invocations.pop_front();
        }
    }
}
