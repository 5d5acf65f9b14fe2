use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;

use crate::domain::appointment::{
    parse_date, parse_time, AppointmentId, AppointmentType, BookingRequest, DepartmentId,
    ProviderId, DATE_FORMAT, TIME_FORMAT,
};
use crate::domain::patient::PatientId;
use crate::errors::DomainError;

/// Capability names whose results feed the booking slots.
pub mod capability {
    pub const GET_PROVIDERS_BY_SPECIALTY: &str = "get_providers_by_specialty";
    pub const SELECT_PROVIDER: &str = "select_provider";
    pub const GET_PROVIDER_LOCATIONS: &str = "get_provider_locations";
    pub const SELECT_LOCATION: &str = "select_location";
    pub const GET_AVAILABLE_TIMES: &str = "get_available_times";
    pub const SELECT_APPOINTMENT_TIME: &str = "select_appointment_time";
    pub const CHECK_APPOINTMENT_HISTORY: &str = "check_appointment_history";
    pub const CHECK_INSURANCE: &str = "check_insurance";
    pub const SET_PATIENT_INSURANCE: &str = "set_patient_insurance";
    pub const GET_SELF_PAY_RATE: &str = "get_self_pay_rate";
    pub const BOOK_APPOINTMENT: &str = "book_appointment";
}

/// A required field of the pending booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Provider,
    Location,
    AppointmentType,
    Date,
    Time,
}

impl Slot {
    /// Required slots in the order they are reported to the operator.
    pub const REQUIRED: [Slot; 5] =
        [Slot::Provider, Slot::Location, Slot::AppointmentType, Slot::Date, Slot::Time];

    pub fn label(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Location => "location/department",
            Self::AppointmentType => "appointment type (NEW/ESTABLISHED)",
            Self::Date => "date",
            Self::Time => "time",
        }
    }
}

/// Accumulator for the appointment being booked in one conversation.
///
/// Slots start empty and are only filled from unambiguous capability results;
/// a filled slot is never cleared. Starting over means building a new value
/// with [`BookingState::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingState {
    patient_id: PatientId,
    provider_id: Option<ProviderId>,
    provider_name: Option<String>,
    department_id: Option<DepartmentId>,
    location_name: Option<String>,
    appointment_type: Option<AppointmentType>,
    date: Option<NaiveDate>,
    appointment_time: Option<NaiveTime>,
    notes: Option<String>,
    committed: Option<AppointmentId>,
}

impl BookingState {
    pub fn new(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            provider_id: None,
            provider_name: None,
            department_id: None,
            location_name: None,
            appointment_type: None,
            date: None,
            appointment_time: None,
            notes: None,
            committed: None,
        }
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn provider_id(&self) -> Option<ProviderId> {
        self.provider_id
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn department_id(&self) -> Option<DepartmentId> {
        self.department_id
    }

    pub fn location_name(&self) -> Option<&str> {
        self.location_name.as_deref()
    }

    pub fn appointment_type(&self) -> Option<AppointmentType> {
        self.appointment_type
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn appointment_time(&self) -> Option<NaiveTime> {
        self.appointment_time
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn committed(&self) -> Option<AppointmentId> {
        self.committed
    }

    pub fn set_provider(&mut self, provider_id: ProviderId, provider_name: impl Into<String>) {
        self.provider_id = Some(provider_id);
        self.provider_name = Some(provider_name.into());
    }

    pub fn set_location(&mut self, department_id: DepartmentId, location_name: impl Into<String>) {
        self.department_id = Some(department_id);
        self.location_name = Some(location_name.into());
    }

    pub fn set_appointment_type(&mut self, appointment_type: AppointmentType) {
        self.appointment_type = Some(appointment_type);
    }

    pub fn set_schedule(&mut self, date: NaiveDate, appointment_time: NaiveTime) {
        self.date = Some(date);
        self.appointment_time = Some(appointment_time);
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        let notes = notes.into();
        if !notes.trim().is_empty() {
            self.notes = Some(notes);
        }
    }

    pub fn mark_committed(&mut self, appointment_id: AppointmentId) {
        self.committed = Some(appointment_id);
    }

    pub fn missing_slots(&self) -> Vec<Slot> {
        Slot::REQUIRED.into_iter().filter(|slot| !self.is_filled(*slot)).collect()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.missing_slots().into_iter().map(Slot::label).collect()
    }

    pub fn is_complete(&self) -> bool {
        Slot::REQUIRED.into_iter().all(|slot| self.is_filled(slot))
    }

    fn is_filled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Provider => self.provider_id.is_some(),
            Slot::Location => self.department_id.is_some(),
            Slot::AppointmentType => self.appointment_type.is_some(),
            Slot::Date => self.date.is_some(),
            Slot::Time => self.appointment_time.is_some(),
        }
    }

    /// Builds the commit payload. Notes passed here win over notes already recorded.
    pub fn commit_payload(&self, notes: Option<&str>) -> Result<BookingRequest, DomainError> {
        let (
            Some(provider_id),
            Some(department_id),
            Some(appointment_type),
            Some(date),
            Some(appointment_time),
        ) = (self.provider_id, self.department_id, self.appointment_type, self.date, self.appointment_time)
        else {
            return Err(DomainError::IncompleteBooking {
                missing: self.missing_fields().into_iter().map(str::to_string).collect(),
            });
        };

        let notes = notes
            .filter(|value| !value.trim().is_empty())
            .or(self.notes.as_deref())
            .unwrap_or_default()
            .to_string();

        Ok(BookingRequest {
            patient_id: self.patient_id,
            provider_id,
            department_id,
            appointment_type,
            date,
            appointment_time,
            notes,
        })
    }

    /// Folds a successful capability result into the slots and returns the slots it filled.
    ///
    /// Lookups only fill a slot when they produced exactly one candidate.
    pub fn absorb(&mut self, capability_name: &str, result: &Value) -> Vec<Slot> {
        if result.get("error").is_some() {
            return Vec::new();
        }

        match capability_name {
            capability::GET_PROVIDERS_BY_SPECIALTY | capability::SELECT_PROVIDER => {
                self.absorb_provider(result)
            }
            capability::GET_PROVIDER_LOCATIONS | capability::SELECT_LOCATION => {
                self.absorb_location(result)
            }
            capability::CHECK_APPOINTMENT_HISTORY => self.absorb_history(result),
            capability::SELECT_APPOINTMENT_TIME => self.absorb_schedule(result),
            capability::BOOK_APPOINTMENT => {
                self.absorb_commit(result);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn absorb_provider(&mut self, result: &Value) -> Vec<Slot> {
        let Some(candidate) = single_candidate(result, "providers") else {
            return Vec::new();
        };
        let Some(provider_id) = candidate.get("id").and_then(Value::as_i64) else {
            return Vec::new();
        };

        let first_name = candidate.get("first_name").and_then(Value::as_str).unwrap_or_default();
        let last_name = candidate.get("last_name").and_then(Value::as_str).unwrap_or_default();
        self.set_provider(ProviderId(provider_id), format!("Dr. {first_name} {last_name}"));
        vec![Slot::Provider]
    }

    fn absorb_location(&mut self, result: &Value) -> Vec<Slot> {
        let Some(candidate) = single_candidate(result, "locations") else {
            return Vec::new();
        };
        let Some(department_id) = candidate.get("department_id").and_then(Value::as_i64) else {
            return Vec::new();
        };

        let location_name =
            candidate.get("location_name").and_then(Value::as_str).unwrap_or_default();
        self.set_location(DepartmentId(department_id), location_name);
        vec![Slot::Location]
    }

    fn absorb_history(&mut self, result: &Value) -> Vec<Slot> {
        let verdict = result
            .get("appointment_type")
            .and_then(Value::as_str)
            .and_then(|value| value.parse::<AppointmentType>().ok());

        match verdict {
            Some(appointment_type) => {
                self.set_appointment_type(appointment_type);
                vec![Slot::AppointmentType]
            }
            None => Vec::new(),
        }
    }

    fn absorb_schedule(&mut self, result: &Value) -> Vec<Slot> {
        let date = result.get("date").and_then(Value::as_str).and_then(|v| parse_date(v).ok());
        let time = result
            .get("appointment_time")
            .and_then(Value::as_str)
            .and_then(|v| parse_time(v).ok());

        match (date, time) {
            (Some(date), Some(time)) => {
                self.set_schedule(date, time);
                vec![Slot::Date, Slot::Time]
            }
            _ => Vec::new(),
        }
    }

    fn absorb_commit(&mut self, result: &Value) {
        let succeeded = result.get("success").and_then(Value::as_bool).unwrap_or(false);
        if let (true, Some(appointment_id)) =
            (succeeded, result.get("appointment_id").and_then(Value::as_i64))
        {
            self.mark_committed(AppointmentId(appointment_id));
        }
    }

    /// Human-readable progress, one line per field.
    pub fn summary(&self, patient_name: &str) -> String {
        let mut lines = vec![format!("Patient: {patient_name}")];

        lines.push(match &self.provider_name {
            Some(name) => format!("Provider: {name}"),
            None => "Provider: (not selected)".to_string(),
        });
        lines.push(match &self.location_name {
            Some(name) => format!("Location: {name}"),
            None => "Location: (not selected)".to_string(),
        });
        lines.push(match self.appointment_type {
            Some(appointment_type) => format!("Type: {appointment_type}"),
            None => "Type: (not determined)".to_string(),
        });
        lines.push(match (self.date, self.appointment_time) {
            (Some(date), Some(time)) => format!(
                "Date/Time: {} at {}",
                date.format(DATE_FORMAT),
                time.format(TIME_FORMAT)
            ),
            (Some(date), None) => format!("Date: {} (time not selected)", date.format(DATE_FORMAT)),
            _ => "Date/Time: (not selected)".to_string(),
        });
        if let Some(notes) = &self.notes {
            lines.push(format!("Notes: {notes}"));
        }
        if let Some(appointment_id) = self.committed {
            lines.push(format!("Booked: appointment #{}", appointment_id.0));
        }

        lines.join("\n")
    }
}

fn single_candidate<'a>(result: &'a Value, key: &str) -> Option<&'a Value> {
    match result.get(key)?.as_array()?.as_slice() {
        [only] => Some(only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{capability, BookingState, Slot};
    use crate::domain::appointment::{
        parse_date, parse_time, AppointmentId, AppointmentType, DepartmentId, ProviderId,
    };
    use crate::domain::patient::PatientId;
    use crate::errors::DomainError;

    fn providers(count: i64) -> serde_json::Value {
        let providers = (1..=count)
            .map(|id| json!({"id": id, "first_name": "Gregory", "last_name": format!("House{id}")}))
            .collect::<Vec<_>>();
        json!({"found": count > 0, "providers": providers, "count": count})
    }

    fn filled() -> BookingState {
        let mut state = BookingState::new(PatientId(1));
        state.set_provider(ProviderId(2), "Dr. Gregory House");
        state.set_location(DepartmentId(3), "PPTH Orthopedics");
        state.set_appointment_type(AppointmentType::Established);
        state.set_schedule(
            parse_date("2026-02-15").expect("date"),
            parse_time("10:00").expect("time"),
        );
        state
    }

    #[test]
    fn single_provider_result_fills_the_provider_slot() {
        let mut state = BookingState::new(PatientId(1));
        let updated = state.absorb(capability::GET_PROVIDERS_BY_SPECIALTY, &providers(1));

        assert_eq!(updated, vec![Slot::Provider]);
        assert_eq!(state.provider_id(), Some(ProviderId(1)));
        assert_eq!(state.provider_name(), Some("Dr. Gregory House1"));
        assert!(!state.missing_fields().contains(&"provider"));
    }

    #[test]
    fn ambiguous_or_empty_provider_results_leave_slot_empty() {
        for count in [0, 2, 3] {
            let mut state = BookingState::new(PatientId(1));
            let updated = state.absorb(capability::GET_PROVIDERS_BY_SPECIALTY, &providers(count));

            assert!(updated.is_empty(), "count {count} should not fill a slot");
            assert_eq!(state.provider_id(), None);
            assert!(state.missing_fields().contains(&"provider"));
        }
    }

    #[test]
    fn error_results_never_fill_slots() {
        let mut state = BookingState::new(PatientId(1));
        let mut result = providers(1);
        result["error"] = json!("Tool error: connection refused");

        assert!(state.absorb(capability::GET_PROVIDERS_BY_SPECIALTY, &result).is_empty());
        assert_eq!(state.provider_id(), None);
    }

    #[test]
    fn location_and_history_and_schedule_results_fill_their_slots() {
        let mut state = BookingState::new(PatientId(1));
        state.absorb(
            capability::GET_PROVIDER_LOCATIONS,
            &json!({"found": true, "locations": [{"department_id": 4, "location_name": "Jefferson Hospital"}], "count": 1}),
        );
        state.absorb(
            capability::CHECK_APPOINTMENT_HISTORY,
            &json!({"appointment_type": "NEW", "reason": "never seen", "last_visit": null}),
        );
        state.absorb(
            capability::SELECT_APPOINTMENT_TIME,
            &json!({"available": true, "date": "2026-03-02", "appointment_time": "13:30"}),
        );

        assert_eq!(state.department_id(), Some(DepartmentId(4)));
        assert_eq!(state.location_name(), Some("Jefferson Hospital"));
        assert_eq!(state.appointment_type(), Some(AppointmentType::New));
        assert_eq!(state.missing_fields(), vec!["provider"]);
    }

    #[test]
    fn two_locations_do_not_fill_location() {
        let mut state = BookingState::new(PatientId(1));
        let updated = state.absorb(
            capability::GET_PROVIDER_LOCATIONS,
            &json!({"found": true, "locations": [
                {"department_id": 4, "location_name": "Jefferson Hospital"},
                {"department_id": 5, "location_name": "PPTH Orthopedics"}
            ], "count": 2}),
        );

        assert!(updated.is_empty());
        assert!(state.missing_fields().contains(&"location/department"));
    }

    #[test]
    fn missing_fields_is_the_ordered_complement_of_completeness() {
        let mut state = BookingState::new(PatientId(1));
        assert_eq!(
            state.missing_fields(),
            vec![
                "provider",
                "location/department",
                "appointment type (NEW/ESTABLISHED)",
                "date",
                "time"
            ]
        );
        assert!(!state.is_complete());

        state.set_provider(ProviderId(2), "Dr. Gregory House");
        state.set_location(DepartmentId(3), "PPTH Orthopedics");
        state.set_appointment_type(AppointmentType::New);
        assert_eq!(state.missing_fields(), vec!["date", "time"]);
        assert!(!state.is_complete());

        assert!(filled().is_complete());
        assert!(filled().missing_fields().is_empty());
    }

    #[test]
    fn commit_payload_requires_every_slot() {
        let state = BookingState::new(PatientId(1));
        let error = state.commit_payload(None).expect_err("incomplete state must not commit");
        assert!(matches!(error, DomainError::IncompleteBooking { ref missing } if missing.len() == 5));
    }

    #[test]
    fn commit_payload_reproduces_slot_values() {
        let state = filled();
        let payload = state.commit_payload(Some("knee pain follow-up")).expect("complete");

        assert_eq!(payload.patient_id, PatientId(1));
        assert_eq!(payload.provider_id, ProviderId(2));
        assert_eq!(payload.department_id, DepartmentId(3));
        assert_eq!(payload.appointment_type, AppointmentType::Established);
        assert_eq!(payload.date_string(), "2026-02-15");
        assert_eq!(payload.time_string(), "10:00");
        assert_eq!(payload.notes, "knee pain follow-up");
    }

    #[test]
    fn successful_booking_marks_state_committed_without_touching_slots() {
        let mut state = filled();
        let before = state.missing_fields();
        let updated = state.absorb(
            capability::BOOK_APPOINTMENT,
            &json!({"success": true, "appointment_id": 42, "confirmation": "Appointment booked successfully"}),
        );

        assert!(updated.is_empty());
        assert_eq!(state.committed(), Some(AppointmentId(42)));
        assert_eq!(state.missing_fields(), before);
    }

    #[test]
    fn summary_reports_unfilled_and_filled_fields() {
        let empty = BookingState::new(PatientId(1)).summary("John Doe");
        assert!(empty.contains("Provider: (not selected)"));
        assert!(empty.contains("Date/Time: (not selected)"));

        let full = filled().summary("John Doe");
        assert!(full.contains("Provider: Dr. Gregory House"));
        assert!(full.contains("Date/Time: 2026-02-15 at 10:00"));
        assert!(full.contains("Type: ESTABLISHED"));
    }
}
