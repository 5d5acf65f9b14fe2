use careline_core::domain::booking::BookingState;
use serde_json::{json, Value};

/// An action the model asked for that needs a policy check before it runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent<'a> {
    Commit { booking: &'a BookingState },
}

impl GuardrailIntent<'_> {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::Commit { .. } => "booking.commit",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny {
        reason_code: &'static str,
        user_message: String,
        missing_fields: Vec<&'static str>,
    },
}

impl GuardrailDecision {
    /// The synthetic result handed back to the provider instead of running the action.
    pub fn refusal(&self) -> Option<Value> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, user_message, missing_fields } => Some(json!({
                "success": false,
                "error": user_message,
                "reason": reason_code,
                "missing_fields": missing_fields,
            })),
        }
    }
}

/// Commit gate. A committed booking is terminal for its conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy;

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent<'_>) -> GuardrailDecision {
        match intent {
            GuardrailIntent::Commit { booking } => {
                if let Some(appointment_id) = booking.committed() {
                    return GuardrailDecision::Deny {
                        reason_code: "booking_already_committed",
                        user_message: format!(
                            "Appointment {} is already booked in this conversation. Reset the conversation to book another.",
                            appointment_id.0
                        ),
                        missing_fields: Vec::new(),
                    };
                }

                let missing_fields = booking.missing_fields();
                if missing_fields.is_empty() {
                    GuardrailDecision::Allow
                } else {
                    GuardrailDecision::Deny {
                        reason_code: "booking_incomplete",
                        user_message: format!(
                            "Cannot proceed yet. Still need: {}",
                            missing_fields.join(", ")
                        ),
                        missing_fields,
                    }
                }
            }
        }
    }
}
