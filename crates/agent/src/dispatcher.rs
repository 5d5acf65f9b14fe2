use std::sync::Arc;

use careline_core::domain::appointment::BookingRequest;
use careline_core::domain::booking::{BookingState, Slot};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
use crate::tools::CapabilityRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Ok,
    Error,
    Refused,
}

/// What one invocation produced. `result` is always a JSON object fit for the transcript.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub result: Value,
    pub outcome: InvocationOutcome,
    pub filled: Vec<Slot>,
}

impl ToolOutcome {
    fn error(message: String) -> Self {
        Self { result: json!({ "error": message }), outcome: InvocationOutcome::Error, filled: Vec::new() }
    }

    fn refused(result: Value) -> Self {
        Self { result, outcome: InvocationOutcome::Refused, filled: Vec::new() }
    }
}

/// Runs capabilities by name and folds their results into the booking.
///
/// Never fails: unknown names, handler errors and refused commits all come back
/// as error-marked results.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    policy: GuardrailPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, policy: GuardrailPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn execute(&self, name: &str, arguments: Value, booking: &mut BookingState) -> ToolOutcome {
        let Some(capability) = self.registry.get(name) else {
            warn!(event_name = "agent.capability.unknown", capability = name, "unknown capability requested");
            return ToolOutcome::error(format!("Unknown capability: {name}"));
        };

        let arguments = if capability.is_commit() {
            let decision = self.policy.evaluate(&GuardrailIntent::Commit { booking: &*booking });
            if let Some(refusal) = decision.refusal() {
                if let GuardrailDecision::Deny { reason_code, .. } = &decision {
                    info!(
                        event_name = "agent.commit.refused",
                        capability = name,
                        reason_code = *reason_code,
                        missing = %booking.missing_fields().join(", "),
                        "commit refused"
                    );
                }
                return ToolOutcome::refused(refusal);
            }

            let notes = arguments.get("notes").and_then(Value::as_str);
            match booking.commit_payload(notes) {
                Ok(request) => commit_arguments(&request),
                Err(error) => return ToolOutcome::refused(json!({ "success": false, "error": error.to_string() })),
            }
        } else {
            arguments
        };

        match capability.execute(arguments).await {
            Ok(result) => {
                let filled = booking.absorb(name, &result);
                let outcome = if result.get("error").is_some() {
                    InvocationOutcome::Error
                } else {
                    InvocationOutcome::Ok
                };
                ToolOutcome { result, outcome, filled }
            }
            Err(error) => {
                warn!(event_name = "agent.capability.failed", capability = name, error = %error, "capability failed");
                ToolOutcome::error(format!("Tool execution failed: {error}"))
            }
        }
    }
}

/// Named arguments for the commit handler, built only from slot values.
pub fn commit_arguments(request: &BookingRequest) -> Value {
    json!({
        "patient_id": request.patient_id.0,
        "provider_id": request.provider_id.0,
        "department_id": request.department_id.0,
        "appointment_type": request.appointment_type.as_str(),
        "date": request.date_string(),
        "appointment_time": request.time_string(),
        "notes": request.notes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use careline_core::domain::appointment::{parse_date, parse_time, AppointmentType};
    use careline_core::domain::booking::{capability, BookingState, Slot};
    use careline_core::domain::patient::PatientId;
    use serde_json::{json, Value};

    use super::{Dispatcher, InvocationOutcome};
    use crate::guardrails::GuardrailPolicy;
    use crate::tools::{Capability, CapabilityError, CapabilityRegistry, CapabilitySchema};

    struct Canned {
        schema: CapabilitySchema,
        reply: Result<Value, &'static str>,
        commit: bool,
        calls: Arc<AtomicUsize>,
        seen: Arc<std::sync::Mutex<Vec<Value>>>,
    }

    impl Canned {
        fn new(name: &'static str, reply: Result<Value, &'static str>) -> Self {
            Self {
                schema: CapabilitySchema::new(name, "canned"),
                reply,
                commit: false,
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }

        fn commit(mut self) -> Self {
            self.commit = true;
            self
        }
    }

    #[async_trait]
    impl Capability for Canned {
        fn schema(&self) -> &CapabilitySchema {
            &self.schema
        }

        fn is_commit(&self) -> bool {
            self.commit
        }

        async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("lock").push(arguments);
            self.reply.clone().map_err(|message| CapabilityError::Backend(message.to_string()))
        }
    }

    fn dispatcher(capabilities: Vec<Canned>) -> Dispatcher {
        let registry = capabilities
            .into_iter()
            .fold(CapabilityRegistry::builder(), |builder, capability| builder.register(capability))
            .build();
        Dispatcher::new(Arc::new(registry), GuardrailPolicy::default())
    }

    fn one_provider() -> Value {
        json!({"found": true, "count": 1, "providers": [
            {"id": 2, "first_name": "Gregory", "last_name": "House", "certification": "MD", "specialty": "Orthopedics"}
        ]})
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error_result() {
        let dispatcher = dispatcher(Vec::new());
        let mut booking = BookingState::new(PatientId(1));

        let outcome = dispatcher.execute("query_database", json!({}), &mut booking).await;

        assert_eq!(outcome.result, json!({"error": "Unknown capability: query_database"}));
        assert_eq!(outcome.outcome, InvocationOutcome::Error);
    }

    #[tokio::test]
    async fn handler_failures_are_reduced_to_error_results() {
        let dispatcher = dispatcher(vec![Canned::new(
            capability::GET_PROVIDERS_BY_SPECIALTY,
            Err("connection reset"),
        )]);
        let mut booking = BookingState::new(PatientId(1));

        let outcome = dispatcher
            .execute(capability::GET_PROVIDERS_BY_SPECIALTY, json!({"specialty": "x"}), &mut booking)
            .await;

        assert_eq!(outcome.result, json!({"error": "Tool execution failed: connection reset"}));
        assert!(booking.provider_id().is_none());
    }

    #[tokio::test]
    async fn unambiguous_lookup_fills_the_provider_slot() {
        let dispatcher =
            dispatcher(vec![Canned::new(capability::GET_PROVIDERS_BY_SPECIALTY, Ok(one_provider()))]);
        let mut booking = BookingState::new(PatientId(1));

        let outcome = dispatcher
            .execute(capability::GET_PROVIDERS_BY_SPECIALTY, json!({"specialty": "Orthopedics"}), &mut booking)
            .await;

        assert_eq!(outcome.outcome, InvocationOutcome::Ok);
        assert_eq!(outcome.filled, vec![Slot::Provider]);
        assert_eq!(booking.provider_name(), Some("Dr. Gregory House"));
        assert!(!booking.missing_fields().contains(&"provider"));
    }

    #[tokio::test]
    async fn incomplete_commit_never_reaches_the_handler() {
        let book = Canned::new(capability::BOOK_APPOINTMENT, Ok(json!({"success": true}))).commit();
        let calls = Arc::clone(&book.calls);
        let dispatcher = dispatcher(vec![book]);
        let mut booking = BookingState::new(PatientId(1));

        let outcome = dispatcher
            .execute(capability::BOOK_APPOINTMENT, json!({"date": "2030-01-08"}), &mut booking)
            .await;

        assert_eq!(outcome.outcome, InvocationOutcome::Refused);
        assert_eq!(outcome.result["success"], json!(false));
        assert_eq!(
            outcome.result["error"],
            json!("Cannot proceed yet. Still need: provider, location/department, appointment type (NEW/ESTABLISHED), date, time")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn commit_payload_comes_from_slots_and_runs_once() {
        let book = Canned::new(
            capability::BOOK_APPOINTMENT,
            Ok(json!({"success": true, "appointment_id": 42})),
        )
        .commit();
        let calls = Arc::clone(&book.calls);
        let seen = Arc::clone(&book.seen);
        let dispatcher = dispatcher(vec![book]);

        let mut booking = BookingState::new(PatientId(1));
        booking.set_provider(careline_core::ProviderId(2), "Dr. Gregory House");
        booking.set_location(careline_core::DepartmentId(3), "Jefferson Hospital");
        booking.set_appointment_type(AppointmentType::Established);
        booking.set_schedule(parse_date("2030-01-08").expect("date"), parse_time("10:00").expect("time"));

        let arguments = json!({"provider_id": 99, "date": "1999-01-01", "notes": "knee pain"});
        let first = dispatcher.execute(capability::BOOK_APPOINTMENT, arguments.clone(), &mut booking).await;
        let second = dispatcher.execute(capability::BOOK_APPOINTMENT, arguments, &mut booking).await;

        assert_eq!(first.outcome, InvocationOutcome::Ok);
        assert_eq!(booking.committed(), Some(careline_core::AppointmentId(42)));
        assert_eq!(second.outcome, InvocationOutcome::Refused);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let sent = seen.lock().expect("lock")[0].clone();
        assert_eq!(
            sent,
            json!({
                "patient_id": 1,
                "provider_id": 2,
                "department_id": 3,
                "appointment_type": "ESTABLISHED",
                "date": "2030-01-08",
                "appointment_time": "10:00",
                "notes": "knee pain",
            })
        );
    }
}
