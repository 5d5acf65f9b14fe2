use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use careline_core::domain::patient::PatientId;
use careline_core::errors::ApplicationError;
use careline_db::repositories::{PatientRepository, RepositoryError, SchedulingRepository};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::capabilities::booking_registry;
use crate::dispatcher::Dispatcher;
use crate::guardrails::GuardrailPolicy;
use crate::llm::CompletionProvider;
use crate::prompts::PromptError;
use crate::runtime::{AgentRuntime, InvocationRecord, RuntimeSettings};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session for operator `{0}`")]
    NoSession(String),
    #[error("patient {0} not found")]
    UnknownPatient(PatientId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl From<SessionError> for ApplicationError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NoSession(_) | SessionError::UnknownPatient(_) => {
                Self::NotFound(error.to_string())
            }
            SessionError::Repository(source) => Self::Persistence(source.to_string()),
            SessionError::Prompt(source) => Self::Configuration(source.to_string()),
        }
    }
}

/// One operator's conversation about one patient.
pub struct AgentSession {
    pub operator_id: String,
    pub started_at: DateTime<Utc>,
    pub runtime: AgentRuntime,
}

impl AgentSession {
    pub fn patient_id(&self) -> PatientId {
        self.runtime.patient().id
    }
}

pub type SharedSession = Arc<Mutex<AgentSession>>;

/// Process-wide operator -> session map.
///
/// The map lock is only held to look a session up or swap it; turns run under the
/// session's own mutex, so operators never wait on each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
    admissions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub async fn get(&self, operator_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(operator_id).cloned()
    }

    /// Replaces whatever the operator held before.
    pub async fn put(&self, operator_id: &str, session: AgentSession) -> SharedSession {
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(operator_id.to_string(), Arc::clone(&shared));
        shared
    }

    /// Serializes opening and replacing sessions for one operator. Lookups never wait on it.
    pub async fn admit(&self, operator_id: &str) -> OwnedMutexGuard<()> {
        let gate = {
            let mut admissions = self.admissions.lock().await;
            Arc::clone(admissions.entry(operator_id.to_string()).or_default())
        };
        gate.lock_owned().await
    }

    pub async fn remove(&self, operator_id: &str) -> Option<SharedSession> {
        self.sessions.write().await.remove(operator_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub text: String,
    pub booking_progress: String,
    pub tool_calls: Vec<InvocationRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStarted {
    pub patient_id: PatientId,
    pub patient_name: String,
    /// `None` when an existing session for the same patient was resumed.
    pub greeting: Option<String>,
    pub booking_progress: String,
}

/// Session lifecycle used by every transport.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<SessionStore>,
    patients: Arc<dyn PatientRepository>,
    provider: Arc<dyn CompletionProvider>,
    dispatcher: Dispatcher,
    settings: RuntimeSettings,
}

impl SessionService {
    pub fn new(
        store: Arc<SessionStore>,
        patients: Arc<dyn PatientRepository>,
        provider: Arc<dyn CompletionProvider>,
        dispatcher: Dispatcher,
        settings: RuntimeSettings,
    ) -> Self {
        Self { store, patients, provider, dispatcher, settings }
    }

    /// The booking toolset over the given backend, with a fresh store and the default guardrails.
    pub fn for_booking(
        patients: Arc<dyn PatientRepository>,
        scheduling: Arc<dyn SchedulingRepository>,
        provider: Arc<dyn CompletionProvider>,
        settings: RuntimeSettings,
    ) -> Self {
        let registry = booking_registry(patients.clone(), scheduling);
        Self::new(
            Arc::new(SessionStore::default()),
            patients,
            provider,
            Dispatcher::new(Arc::new(registry), GuardrailPolicy::default()),
            settings,
        )
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Opens a session, or resumes the operator's current one when it is for the same patient.
    pub async fn begin(
        &self,
        operator_id: &str,
        patient_id: PatientId,
    ) -> Result<SessionStarted, SessionError> {
        let _admission = self.store.admit(operator_id).await;
        if let Some(existing) = self.store.get(operator_id).await {
            let session = existing.lock().await;
            if session.patient_id() == patient_id {
                info!(
                    event_name = "agent.session.resumed",
                    operator_id,
                    patient_id = patient_id.0,
                    "session resumed"
                );
                return Ok(SessionStarted {
                    patient_id,
                    patient_name: session.runtime.patient().name.clone(),
                    greeting: None,
                    booking_progress: session.runtime.booking_progress(),
                });
            }
        }

        self.start(operator_id, patient_id).await
    }

    pub async fn message(&self, operator_id: &str, text: &str) -> Result<TurnReply, SessionError> {
        let shared = self.session(operator_id).await?;
        let mut session = shared.lock().await;
        let text = session.runtime.process_turn(text).await;

        Ok(TurnReply {
            text,
            booking_progress: session.runtime.booking_progress(),
            tool_calls: session.runtime.invocations(),
        })
    }

    /// Drops the booking and transcript but keeps the patient, then greets again.
    pub async fn reset(&self, operator_id: &str) -> Result<SessionStarted, SessionError> {
        let shared = self.session(operator_id).await?;
        let mut session = shared.lock().await;
        session.runtime.reset();
        let greeting = session.runtime.greet().await;
        info!(
            event_name = "agent.session.reset",
            operator_id,
            patient_id = session.patient_id().0,
            "session reset"
        );

        Ok(SessionStarted {
            patient_id: session.patient_id(),
            patient_name: session.runtime.patient().name.clone(),
            greeting: Some(greeting),
            booking_progress: session.runtime.booking_progress(),
        })
    }

    /// The previous session stays in place until the new one has greeted; a failed switch keeps it.
    pub async fn switch_subject(
        &self,
        operator_id: &str,
        patient_id: PatientId,
    ) -> Result<SessionStarted, SessionError> {
        let _admission = self.store.admit(operator_id).await;
        self.start(operator_id, patient_id).await
    }

    /// Disconnects leave the session in place so the operator can resume it.
    pub async fn end(&self, operator_id: &str) {
        let held = self.store.get(operator_id).await.is_some();
        info!(event_name = "agent.session.ended", operator_id, held, "operator disconnected");
    }

    async fn session(&self, operator_id: &str) -> Result<SharedSession, SessionError> {
        self.store
            .get(operator_id)
            .await
            .ok_or_else(|| SessionError::NoSession(operator_id.to_string()))
    }

    /// Callers hold the operator's admission.
    async fn start(
        &self,
        operator_id: &str,
        patient_id: PatientId,
    ) -> Result<SessionStarted, SessionError> {
        let patient = self
            .patients
            .load_context(patient_id)
            .await?
            .ok_or(SessionError::UnknownPatient(patient_id))?;

        let mut runtime = AgentRuntime::new(
            patient,
            Arc::clone(&self.provider),
            self.dispatcher.clone(),
            self.settings.clone(),
        )?;
        let greeting = runtime.greet().await;
        let started = SessionStarted {
            patient_id,
            patient_name: runtime.patient().name.clone(),
            greeting: Some(greeting),
            booking_progress: runtime.booking_progress(),
        };

        self.store
            .put(
                operator_id,
                AgentSession { operator_id: operator_id.to_string(), started_at: Utc::now(), runtime },
            )
            .await;
        info!(
            event_name = "agent.session.started",
            operator_id,
            patient_id = patient_id.0,
            "session started"
        );
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Local, Utc};
    use careline_core::domain::appointment::{DepartmentId, ProviderId};
    use careline_core::domain::booking::capability;
    use careline_core::domain::patient::{PatientContext, PatientId};
    use careline_core::domain::scheduling::{Location, ProviderSummary};
    use careline_db::repositories::{InMemoryPatientRepository, InMemorySchedulingRepository};
    use serde_json::json;

    use super::{AgentSession, SessionError, SessionService, SessionStore};
    use crate::capabilities::booking_registry;
    use crate::dispatcher::{Dispatcher, InvocationOutcome};
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::{
        CapabilityCall, Completion, CompletionProvider, CompletionRequest, ProviderError,
        ScriptedProvider,
    };
    use crate::runtime::{AgentRuntime, RuntimeSettings};

    /// Answers from a script after a fixed delay.
    struct SlowProvider {
        script: Arc<ScriptedProvider>,
        delay: StdDuration,
    }

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ProviderError> {
            tokio::time::sleep(self.delay).await;
            self.script.complete(request).await
        }
    }

    fn patient(id: i64, name: &str) -> PatientContext {
        PatientContext {
            id: PatientId(id),
            name: name.to_string(),
            dob: "01/01/1975".to_string(),
            pcp: "Dr. Meredith Grey".to_string(),
            ehr_id: "1234abcd".to_string(),
            notes: String::new(),
            insurance: None,
            referrals: Vec::new(),
            appointments: Vec::new(),
        }
    }

    fn scheduling() -> Arc<InMemorySchedulingRepository> {
        Arc::new(
            InMemorySchedulingRepository::default()
                .with_patient(PatientId(1), "John Doe")
                .with_provider(
                    ProviderSummary {
                        id: ProviderId(2),
                        first_name: "Gregory".to_string(),
                        last_name: "House".to_string(),
                        certification: "MD".to_string(),
                        specialty: "Orthopedics".to_string(),
                    },
                    vec![Location {
                        department_id: DepartmentId(3),
                        location_name: "Jefferson Hospital".to_string(),
                        address: "Claremont Ave, Orange, NJ 07050".to_string(),
                        phone: "(973) 555-0178".to_string(),
                        hours: "M-F 9am-5pm".to_string(),
                    }],
                )
                .with_completed_visit(PatientId(1), ProviderId(2), Local::now().date_naive() - Duration::days(90)),
        )
    }

    fn service(provider: Arc<ScriptedProvider>, scheduling: Arc<InMemorySchedulingRepository>) -> SessionService {
        service_over(provider, scheduling)
    }

    fn service_over(
        provider: Arc<dyn CompletionProvider>,
        scheduling: Arc<InMemorySchedulingRepository>,
    ) -> SessionService {
        let patients = Arc::new(
            InMemoryPatientRepository::default()
                .with_patient(patient(1, "John Doe"))
                .with_patient(patient(2, "Jane Smith")),
        );
        let registry = booking_registry(patients.clone(), scheduling);
        SessionService::new(
            Arc::new(SessionStore::default()),
            patients,
            provider,
            Dispatcher::new(Arc::new(registry), GuardrailPolicy::default()),
            RuntimeSettings::default(),
        )
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> Completion {
        Completion::calls(vec![CapabilityCall::new(id, name, arguments)])
    }

    #[tokio::test]
    async fn begin_greets_once_and_resumes_for_the_same_patient() {
        let provider = Arc::new(ScriptedProvider::new([Completion::text("Hello nurse, John Doe here.")]));
        let service = service(Arc::clone(&provider), scheduling());

        let first = service.begin("nurse-1", PatientId(1)).await.expect("begin");
        let again = service.begin("nurse-1", PatientId(1)).await.expect("resume");

        assert_eq!(first.greeting.as_deref(), Some("Hello nurse, John Doe here."));
        assert_eq!(again.greeting, None);
        assert_eq!(again.patient_name, "John Doe");
        assert_eq!(provider.call_count().await, 1);
        assert_eq!(service.store().len().await, 1);
    }

    #[tokio::test]
    async fn begin_for_another_patient_replaces_the_session() {
        let provider = Arc::new(ScriptedProvider::new([
            Completion::text("Hi for John."),
            Completion::text("Hi for Jane."),
        ]));
        let service = service(provider, scheduling());

        service.begin("nurse-1", PatientId(1)).await.expect("john");
        let jane = service.switch_subject("nurse-1", PatientId(2)).await.expect("jane");

        assert_eq!(jane.greeting.as_deref(), Some("Hi for Jane."));
        let shared = service.store().get("nurse-1").await.expect("session");
        assert_eq!(shared.lock().await.patient_id(), PatientId(2));
    }

    #[tokio::test]
    async fn failed_switch_keeps_the_previous_session() {
        let provider = Arc::new(ScriptedProvider::new([
            Completion::text("Hi for John."),
            Completion::text("Still on John."),
        ]));
        let service = service(provider, scheduling());
        service.begin("nurse-1", PatientId(1)).await.expect("john");

        let switched = service.switch_subject("nurse-1", PatientId(99)).await;

        assert!(matches!(switched, Err(SessionError::UnknownPatient(PatientId(99)))));
        let shared = service.store().get("nurse-1").await.expect("session kept");
        assert_eq!(shared.lock().await.patient_id(), PatientId(1));
        let reply = service.message("nurse-1", "Are you there?").await.expect("turn");
        assert_eq!(reply.text, "Still on John.");
    }

    #[tokio::test]
    async fn lookups_during_a_switch_see_the_previous_session() {
        let script = Arc::new(ScriptedProvider::new([
            Completion::text("Hi for John."),
            Completion::text("Hi for Jane."),
        ]));
        let provider = Arc::new(SlowProvider { script, delay: StdDuration::from_millis(200) });
        let service = service_over(provider, scheduling());
        service.begin("nurse-1", PatientId(1)).await.expect("john");

        let switching = tokio::spawn({
            let service = service.clone();
            async move { service.switch_subject("nurse-1", PatientId(2)).await }
        });
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let during = service.store().get("nurse-1").await.expect("session during switch");
        assert_eq!(during.lock().await.patient_id(), PatientId(1));

        let jane = switching.await.expect("join").expect("jane");
        assert_eq!(jane.greeting.as_deref(), Some("Hi for Jane."));
        let after = service.store().get("nurse-1").await.expect("session after switch");
        assert_eq!(after.lock().await.patient_id(), PatientId(2));
    }

    #[tokio::test]
    async fn concurrent_begins_for_one_operator_greet_once() {
        let script = Arc::new(ScriptedProvider::new([
            Completion::text("Hello nurse."),
            Completion::text("A second greeting."),
        ]));
        let provider = Arc::new(SlowProvider {
            script: Arc::clone(&script),
            delay: StdDuration::from_millis(20),
        });
        let service = service_over(provider, scheduling());

        let (first, second) =
            tokio::join!(service.begin("nurse-1", PatientId(1)), service.begin("nurse-1", PatientId(1)));

        let greetings = [first.expect("first"), second.expect("second")]
            .into_iter()
            .filter_map(|started| started.greeting)
            .collect::<Vec<_>>();
        assert_eq!(greetings, vec!["Hello nurse.".to_string()]);
        assert_eq!(script.call_count().await, 1);
    }

    #[tokio::test]
    async fn store_put_replaces_and_remove_drops() {
        let store = SessionStore::default();
        let runtime = |id: i64, name: &str| {
            AgentRuntime::new(
                patient(id, name),
                Arc::new(ScriptedProvider::default()),
                Dispatcher::new(
                    Arc::new(booking_registry(
                        Arc::new(InMemoryPatientRepository::default()),
                        scheduling(),
                    )),
                    GuardrailPolicy,
                ),
                RuntimeSettings::default(),
            )
            .expect("runtime")
        };
        let session = |runtime: AgentRuntime| AgentSession {
            operator_id: "nurse-1".to_string(),
            started_at: Utc::now(),
            runtime,
        };

        store.put("nurse-1", session(runtime(1, "John Doe"))).await;
        store.put("nurse-1", session(runtime(2, "Jane Smith"))).await;

        assert_eq!(store.len().await, 1);
        let held = store.get("nurse-1").await.expect("held");
        assert_eq!(held.lock().await.patient_id(), PatientId(2));
        assert!(store.remove("nurse-1").await.is_some());
        assert!(store.get("nurse-1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_patients_and_operators_are_errors() {
        let service = service(Arc::new(ScriptedProvider::default()), scheduling());

        assert!(matches!(
            service.begin("nurse-1", PatientId(99)).await,
            Err(SessionError::UnknownPatient(PatientId(99)))
        ));
        assert!(matches!(
            service.message("nurse-2", "hello").await,
            Err(SessionError::NoSession(operator)) if operator == "nurse-2"
        ));
    }

    #[tokio::test]
    async fn premature_commit_sends_no_write_to_the_backend() {
        let scheduling = scheduling();
        let provider = Arc::new(ScriptedProvider::new([
            Completion::text("Hello."),
            call("call_1", capability::SELECT_PROVIDER, json!({"provider_id": 2})),
            call("call_2", capability::SELECT_LOCATION, json!({"department_id": 3, "provider_id": 2})),
            call("call_3", capability::CHECK_APPOINTMENT_HISTORY, json!({"patient_id": 1, "provider_id": 2})),
            call("call_4", capability::BOOK_APPOINTMENT, json!({"notes": "knee pain"})),
            Completion::text("I still need the date and time."),
        ]));
        let service = service(provider, Arc::clone(&scheduling));
        service.begin("nurse-1", PatientId(1)).await.expect("begin");

        let reply = service.message("nurse-1", "Book John with Dr. House at Jefferson").await.expect("turn");

        assert_eq!(reply.text, "I still need the date and time.");
        let commit = reply.tool_calls.last().expect("commit attempt");
        assert_eq!(commit.capability, capability::BOOK_APPOINTMENT);
        assert_eq!(commit.outcome, InvocationOutcome::Refused);
        assert!(scheduling.bookings().await.is_empty());

        let shared = service.store().get("nurse-1").await.expect("session");
        let session = shared.lock().await;
        assert_eq!(session.runtime.booking().missing_fields(), vec!["date", "time"]);
        let refusal = session
            .runtime
            .transcript()
            .entries()
            .iter()
            .rev()
            .find(|entry| entry.tool_call_id.as_deref() == Some("call_4"))
            .expect("refusal entry");
        assert!(refusal.content.contains("Cannot proceed yet. Still need: date, time"));
    }

    #[tokio::test]
    async fn reset_after_a_booking_keeps_the_patient_and_clears_the_slots() {
        let scheduling = scheduling();
        let provider = Arc::new(ScriptedProvider::new([
            Completion::text("Hello."),
            call("call_1", capability::SELECT_PROVIDER, json!({"provider_id": 2})),
            call("call_2", capability::SELECT_LOCATION, json!({"department_id": 3, "provider_id": 2})),
            call("call_3", capability::CHECK_APPOINTMENT_HISTORY, json!({"patient_id": 1, "provider_id": 2})),
            call(
                "call_4",
                capability::SELECT_APPOINTMENT_TIME,
                json!({"date": "2030-01-08", "appointment_time": "10:00"}),
            ),
            call("call_5", capability::BOOK_APPOINTMENT, json!({})),
            Completion::text("Booked."),
            Completion::text("Fresh start for John."),
        ]));
        let service = service(provider, Arc::clone(&scheduling));
        service.begin("nurse-1", PatientId(1)).await.expect("begin");

        let reply = service.message("nurse-1", "Book it").await.expect("turn");
        assert_eq!(reply.text, "Booked.");
        assert_eq!(scheduling.bookings().await.len(), 1);

        let restarted = service.reset("nurse-1").await.expect("reset");

        assert_eq!(restarted.greeting.as_deref(), Some("Fresh start for John."));
        assert_eq!(restarted.patient_id, PatientId(1));
        let shared = service.store().get("nurse-1").await.expect("session");
        let session = shared.lock().await;
        assert_eq!(session.runtime.booking().missing_fields().len(), 5);
        assert!(session.runtime.booking().committed().is_none());
        assert_eq!(session.runtime.patient().name, "John Doe");
    }
}
