//! Agent Runtime - LLM-driven appointment booking
//!
//! This crate is the "brain" of careline. It drives a conversation between a
//! nurse and a completion provider until an appointment is booked:
//! - Keeps the transcript the provider sees (`transcript`)
//! - Advertises and runs backend lookups as capabilities (`tools`, `capabilities`)
//! - Folds lookup results into the pending booking (`dispatcher`)
//! - Refuses to book until every slot is filled (`guardrails`)
//!
//! # Architecture
//!
//! Each operator message runs a bounded loop:
//! 1. **Completion** (`llm`) - The provider answers with text or capability calls
//! 2. **Extraction** (`extractor`) - In text mode, calls are parsed out of prose
//! 3. **Dispatch** (`dispatcher`) - Calls run in order, results go back into the transcript
//! 4. **Reply** - The first answer without calls is returned to the operator
//!
//! # Key Types
//!
//! - `AgentRuntime` - Turn controller with the iteration budget (see `runtime` module)
//! - `CompletionProvider` - Pluggable trait for OpenAI-compatible endpoints
//! - `CapabilityRegistry` - Closed name -> handler table built once per process
//! - `SessionService` - Per-operator session lifecycle (see `session` module)
//!
//! # Safety Principle
//!
//! The model never books on its own authority. The booking payload is built from
//! slots filled by unambiguous lookups, and the commit handler only runs once all
//! of them are present.

pub mod capabilities;
pub mod dispatcher;
pub mod extractor;
pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod transcript;

pub use capabilities::booking_registry;
pub use dispatcher::{Dispatcher, InvocationOutcome, ToolOutcome};
pub use llm::{
    CapabilityCall, Completion, CompletionProvider, CompletionRequest, OpenAiCompatibleClient,
    ProviderError, ScriptedProvider,
};
pub use runtime::{AgentRuntime, InvocationRecord, RuntimeSettings};
pub use session::{
    AgentSession, SessionError, SessionService, SessionStarted, SessionStore, SharedSession, TurnReply,
};
pub use tools::{Capability, CapabilityError, CapabilityRegistry, CapabilitySchema};
pub use transcript::{Entry, Role, Transcript};
