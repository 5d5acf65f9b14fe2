//! Booking capabilities backed by the scheduling and patient repositories.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use careline_core::domain::appointment::{
    parse_date, parse_time, AppointmentType, BookingRequest, DepartmentId, ProviderId,
};
use careline_core::domain::booking::capability;
use careline_core::domain::patient::PatientId;
use careline_db::repositories::{PatientRepository, RepositoryError, SchedulingRepository};
use chrono::{Duration, Local, NaiveDate};
use serde_json::{json, Value};

use crate::tools::{
    Arguments, Capability, CapabilityError, CapabilityRegistry, CapabilitySchema, ParameterKind,
};

/// Window within which a completed visit makes the next one ESTABLISHED.
pub const HISTORY_WINDOW_DAYS: i64 = 5 * 365;

impl From<RepositoryError> for CapabilityError {
    fn from(error: RepositoryError) -> Self {
        Self::Backend(error.to_string())
    }
}

/// The full booking toolset, commit action last.
pub fn booking_registry(
    patients: Arc<dyn PatientRepository>,
    scheduling: Arc<dyn SchedulingRepository>,
) -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .register(GetProvidersBySpecialty::new(Arc::clone(&scheduling)))
        .register(SelectProvider::new(Arc::clone(&scheduling)))
        .register(GetProviderLocations::new(Arc::clone(&scheduling)))
        .register(SelectLocation::new(Arc::clone(&scheduling)))
        .register(GetAvailableTimes::new(Arc::clone(&scheduling)))
        .register(SelectAppointmentTime::new(Arc::clone(&scheduling)))
        .register(CheckAppointmentHistory::new(Arc::clone(&scheduling)))
        .register(CheckInsurance::new(Arc::clone(&scheduling)))
        .register(SetPatientInsurance::new(patients))
        .register(GetSelfPayRate::new(Arc::clone(&scheduling)))
        .register(BookAppointment::new(scheduling))
        .build()
}

pub struct GetProvidersBySpecialty {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl GetProvidersBySpecialty {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::GET_PROVIDERS_BY_SPECIALTY,
            "Find all providers with a specialty (e.g. 'Orthopedics', 'Primary Care', 'Surgery'). Returns their IDs, names and certifications.",
        )
        .required("specialty", ParameterKind::String, "The medical specialty to search for");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for GetProvidersBySpecialty {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let specialty = arguments.str("specialty")?;
        let providers = self.scheduling.providers_by_specialty(specialty).await?;

        if providers.is_empty() {
            return Ok(json!({
                "found": false,
                "message": format!("No providers found with specialty '{specialty}'"),
            }));
        }
        Ok(json!({ "found": true, "count": providers.len(), "providers": providers }))
    }
}

pub struct SelectProvider {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl SelectProvider {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::SELECT_PROVIDER,
            "Record the provider the nurse chose when a lookup returned several.",
        )
        .required("provider_id", ParameterKind::Integer, "The chosen provider's ID number");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for SelectProvider {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let provider_id = Arguments::parse(arguments)?.int("provider_id")?;
        match self.scheduling.provider_by_id(ProviderId(provider_id)).await? {
            Some(provider) => Ok(json!({
                "found": true,
                "count": 1,
                "message": format!("Selected {}", provider.display_name()),
                "providers": [provider],
            })),
            None => Ok(json!({ "error": format!("No provider with ID {provider_id}") })),
        }
    }
}

pub struct GetProviderLocations {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl GetProviderLocations {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::GET_PROVIDER_LOCATIONS,
            "Get all locations where a provider works, including addresses, phone numbers and office hours.",
        )
        .required("provider_id", ParameterKind::Integer, "The provider's ID number");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for GetProviderLocations {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let provider_id = Arguments::parse(arguments)?.int("provider_id")?;
        let locations = self.scheduling.provider_locations(ProviderId(provider_id)).await?;

        if locations.is_empty() {
            return Ok(json!({
                "found": false,
                "message": format!("No locations found for provider ID {provider_id}"),
            }));
        }
        Ok(json!({ "found": true, "count": locations.len(), "locations": locations }))
    }
}

pub struct SelectLocation {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl SelectLocation {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::SELECT_LOCATION,
            "Record the location the nurse chose when a provider works at several.",
        )
        .required("department_id", ParameterKind::Integer, "The chosen department/location ID")
        .optional(
            "provider_id",
            ParameterKind::Integer,
            "The selected provider's ID, to check they practice there",
        );
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for SelectLocation {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let department_id = DepartmentId(arguments.int("department_id")?);

        let location = match arguments.int("provider_id") {
            Ok(provider_id) => {
                let provider_id = ProviderId(provider_id);
                let locations = self.scheduling.provider_locations(provider_id).await?;
                let location =
                    locations.into_iter().find(|location| location.department_id == department_id);
                if location.is_none() {
                    return Ok(json!({
                        "error": format!(
                            "Provider {} does not see patients at department {}",
                            provider_id.0, department_id.0
                        ),
                    }));
                }
                location
            }
            Err(CapabilityError::MissingArgument(_)) => {
                self.scheduling.location_by_id(department_id).await?
            }
            Err(error) => return Err(error),
        };

        match location {
            Some(location) => Ok(json!({
                "found": true,
                "count": 1,
                "message": format!("Selected {}", location.location_name),
                "locations": [location],
            })),
            None => Ok(json!({ "error": format!("Department {} not found", department_id.0) })),
        }
    }
}

pub struct GetAvailableTimes {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl GetAvailableTimes {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::GET_AVAILABLE_TIMES,
            "Get office hours and already booked times for a provider at a location, for one date or a date range.",
        )
        .required("provider_id", ParameterKind::Integer, "The provider's ID number")
        .required("department_id", ParameterKind::Integer, "The department/location ID")
        .required(
            "start_date",
            ParameterKind::String,
            "Date in YYYY-MM-DD format; the single date to check, or the start of the range when end_date is given",
        )
        .optional("end_date", ParameterKind::String, "End of the date range in YYYY-MM-DD format");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for GetAvailableTimes {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let provider_id = ProviderId(arguments.int("provider_id")?);
        let department_id = DepartmentId(arguments.int("department_id")?);
        let start = parse_date(arguments.str("start_date")?)?;
        let end = match arguments.optional_str("end_date")? {
            Some(end_date) => parse_date(end_date)?,
            None => start,
        };
        if end < start {
            return Err(CapabilityError::InvalidArgument {
                name: "end_date",
                expected: "on or after start_date",
            });
        }

        let Some(location) = self.scheduling.location_by_id(department_id).await? else {
            return Ok(json!({ "error": format!("Department {} not found", department_id.0) }));
        };

        let mut booked_times: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for slot in self.scheduling.booked_slots(provider_id, department_id, start, end).await? {
            booked_times.entry(slot.date_string()).or_default().push(slot.time_string());
        }

        Ok(json!({
            "office_hours": location.hours,
            "date_range": format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d")),
            "booked_times": booked_times,
            "message": format!("Office hours: {}. Booked times provided by date.", location.hours),
        }))
    }
}

pub struct SelectAppointmentTime {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl SelectAppointmentTime {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::SELECT_APPOINTMENT_TIME,
            "Record the date and time the nurse agreed to. Checks the slot is not already taken when provider and location are given.",
        )
        .required("date", ParameterKind::String, "Date in YYYY-MM-DD format")
        .required("appointment_time", ParameterKind::String, "Time in HH:MM format (24-hour)")
        .optional("provider_id", ParameterKind::Integer, "The selected provider's ID")
        .optional("department_id", ParameterKind::Integer, "The selected department/location ID");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for SelectAppointmentTime {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let date = parse_date(arguments.str("date")?)?;
        let time = parse_time(arguments.str("appointment_time")?)?;
        let date_string = date.format("%Y-%m-%d").to_string();
        let time_string = time.format("%H:%M").to_string();

        if let (Ok(provider_id), Ok(department_id)) =
            (arguments.int("provider_id"), arguments.int("department_id"))
        {
            let booked = self
                .scheduling
                .booked_slots(ProviderId(provider_id), DepartmentId(department_id), date, date)
                .await?;
            if booked.iter().any(|slot| slot.appointment_time == time) {
                return Ok(json!({
                    "error": format!("{date_string} at {time_string} is already booked for this provider"),
                }));
            }
        }

        Ok(json!({
            "date": date_string,
            "appointment_time": time_string,
            "message": format!("Selected {date_string} at {time_string}"),
        }))
    }
}

pub struct CheckAppointmentHistory {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
    as_of: Option<NaiveDate>,
}

impl CheckAppointmentHistory {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::CHECK_APPOINTMENT_HISTORY,
            "Check whether the patient completed a visit with the provider in the last 5 years, which decides NEW vs ESTABLISHED.",
        )
        .required("patient_id", ParameterKind::Integer, "The patient's ID number")
        .required("provider_id", ParameterKind::Integer, "The provider's ID number");
        Self { schema, scheduling, as_of: None }
    }

    /// Pins "today" for the history window.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.as_of = Some(today);
        self
    }
}

#[async_trait]
impl Capability for CheckAppointmentHistory {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let patient_id = PatientId(arguments.int("patient_id")?);
        let provider_id = ProviderId(arguments.int("provider_id")?);

        let today = self.as_of.unwrap_or_else(|| Local::now().date_naive());
        let since = today - Duration::days(HISTORY_WINDOW_DAYS);

        match self.scheduling.last_completed_visit(patient_id, provider_id, since).await? {
            Some(last_visit) => {
                let last_visit = last_visit.format("%Y-%m-%d").to_string();
                Ok(json!({
                    "appointment_type": AppointmentType::Established.as_str(),
                    "reason": format!("Patient has seen this provider before (last visit: {last_visit})"),
                    "last_visit": last_visit,
                }))
            }
            None => Ok(json!({
                "appointment_type": AppointmentType::New.as_str(),
                "reason": "Patient has not seen this provider in the last 5 years (or ever)",
                "last_visit": null,
            })),
        }
    }
}

pub struct CheckInsurance {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl CheckInsurance {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::CHECK_INSURANCE,
            "Check whether an insurance plan is accepted. Lists the accepted plans when the name is unknown.",
        )
        .required("insurance_name", ParameterKind::String, "Insurance provider name");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for CheckInsurance {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let insurance_name = arguments.str("insurance_name")?;

        match self.scheduling.find_insurance(insurance_name).await? {
            Some(plan) if plan.accepted => Ok(json!({
                "accepted": true,
                "matched_name": plan.name,
                "message": format!("Yes, {} is accepted", plan.name),
            })),
            Some(plan) => Ok(json!({
                "accepted": false,
                "matched_name": plan.name,
                "message": format!("{} is in our system but is not currently accepted", plan.name),
            })),
            None => {
                let accepted_insurances = self.scheduling.accepted_insurances().await?;
                Ok(json!({
                    "accepted": false,
                    "message": format!("'{insurance_name}' not found in our system"),
                    "accepted_insurances": accepted_insurances,
                }))
            }
        }
    }
}

pub struct SetPatientInsurance {
    schema: CapabilitySchema,
    patients: Arc<dyn PatientRepository>,
}

impl SetPatientInsurance {
    pub fn new(patients: Arc<dyn PatientRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::SET_PATIENT_INSURANCE,
            "Set or update the patient's insurance. Unknown plans are recorded as not accepted.",
        )
        .required("patient_id", ParameterKind::Integer, "The patient's ID number")
        .required("insurance_name", ParameterKind::String, "Insurance provider name");
        Self { schema, patients }
    }
}

#[async_trait]
impl Capability for SetPatientInsurance {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let patient_id = PatientId(arguments.int("patient_id")?);
        let insurance_name = arguments.str("insurance_name")?;

        let assignment = self.patients.set_insurance(patient_id, insurance_name).await?;
        let plan = &assignment.insurance;
        let message = if plan.accepted {
            format!("Insurance set to {}. This plan is accepted.", plan.name)
        } else {
            format!("Insurance set to {}. This plan is not accepted; the patient will need to self-pay.", plan.name)
        };

        Ok(json!({
            "success": true,
            "insurance_name": plan.name,
            "accepted": plan.accepted,
            "created": assignment.created,
            "message": message,
        }))
    }
}

pub struct GetSelfPayRate {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl GetSelfPayRate {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::GET_SELF_PAY_RATE,
            "Get the self-pay rate for a specialty.",
        )
        .required("specialty", ParameterKind::String, "Specialty name");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for GetSelfPayRate {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let specialty = arguments.str("specialty")?;

        match self.scheduling.self_pay_rate(specialty).await? {
            Some(rate) => Ok(json!({
                "found": true,
                "specialty": rate.specialty,
                "rate": rate.rate.to_string(),
                "message": format!("Self-pay rate for {}: ${}", rate.specialty, rate.rate),
            })),
            None => Ok(json!({
                "found": false,
                "message": format!("No rate found for specialty '{specialty}'"),
            })),
        }
    }
}

pub struct BookAppointment {
    schema: CapabilitySchema,
    scheduling: Arc<dyn SchedulingRepository>,
}

impl BookAppointment {
    pub fn new(scheduling: Arc<dyn SchedulingRepository>) -> Self {
        let schema = CapabilitySchema::new(
            capability::BOOK_APPOINTMENT,
            "Book the appointment (final action). Only call once the nurse has confirmed provider, location, type, date and time.",
        )
        .required("patient_id", ParameterKind::Integer, "The patient's ID number")
        .required("provider_id", ParameterKind::Integer, "The provider's ID number")
        .required("department_id", ParameterKind::Integer, "The department/location ID")
        .required("appointment_type", ParameterKind::String, "NEW or ESTABLISHED")
        .required("date", ParameterKind::String, "Date in YYYY-MM-DD format")
        .required("appointment_time", ParameterKind::String, "Time in HH:MM format (24-hour)")
        .optional("notes", ParameterKind::String, "Optional notes for the appointment");
        Self { schema, scheduling }
    }
}

#[async_trait]
impl Capability for BookAppointment {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    fn is_commit(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let arguments = Arguments::parse(arguments)?;
        let request = BookingRequest {
            patient_id: PatientId(arguments.int("patient_id")?),
            provider_id: ProviderId(arguments.int("provider_id")?),
            department_id: DepartmentId(arguments.int("department_id")?),
            appointment_type: arguments.str("appointment_type")?.parse::<AppointmentType>()?,
            date: parse_date(arguments.str("date")?)?,
            appointment_time: parse_time(arguments.str("appointment_time")?)?,
            notes: arguments.optional_str("notes")?.unwrap_or_default().to_string(),
        };

        match self.scheduling.book(&request).await {
            Ok(confirmation) => Ok(json!({
                "success": true,
                "appointment_id": confirmation.appointment_id.0,
                "confirmation": format!(
                    "Appointment booked for {} with {} at {} on {} at {} ({}). Please arrive by {}.",
                    confirmation.patient,
                    confirmation.provider,
                    confirmation.location,
                    confirmation.date,
                    confirmation.appointment_time,
                    confirmation.appointment_type,
                    confirmation.arrival_time
                ),
                "details": confirmation,
            })),
            Err(error @ (RepositoryError::Conflict(_) | RepositoryError::NotFound(_))) => {
                Ok(json!({ "success": false, "error": error.to_string() }))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use careline_core::domain::appointment::{parse_date, DepartmentId, ProviderId};
    use careline_core::domain::booking::capability;
    use careline_core::domain::patient::{InsuranceCoverage, PatientContext, PatientId};
    use careline_core::domain::scheduling::{Location, ProviderSummary, SelfPayRate};
    use careline_db::repositories::{InMemoryPatientRepository, InMemorySchedulingRepository};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{booking_registry, CheckAppointmentHistory};
    use crate::tools::{Capability, CapabilityError, CapabilityRegistry};

    fn provider(id: i64, first_name: &str, last_name: &str, specialty: &str) -> ProviderSummary {
        ProviderSummary {
            id: ProviderId(id),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            certification: "MD".to_string(),
            specialty: specialty.to_string(),
        }
    }

    fn location(id: i64, name: &str) -> Location {
        Location {
            department_id: DepartmentId(id),
            location_name: name.to_string(),
            address: "1 Main St".to_string(),
            phone: "(555) 555-0100".to_string(),
            hours: "M-F 9am-5pm".to_string(),
        }
    }

    fn scheduling() -> Arc<InMemorySchedulingRepository> {
        Arc::new(
            InMemorySchedulingRepository::default()
                .with_patient(PatientId(1), "John Doe")
                .with_provider(provider(1, "Meredith", "Grey", "Primary Care"), vec![location(1, "Sloan Primary Care")])
                .with_provider(
                    provider(2, "Gregory", "House", "Orthopedics"),
                    vec![location(2, "PPTH Orthopedics"), location(3, "Jefferson Hospital")],
                )
                .with_provider(provider(3, "Temperance", "Brennan", "Orthopedics"), vec![location(3, "Jefferson Hospital")])
                .with_completed_visit(PatientId(1), ProviderId(2), parse_date("2024-08-12").expect("date"))
                .with_insurance(InsuranceCoverage { id: 1, name: "Aetna".to_string(), accepted: true })
                .with_insurance(InsuranceCoverage { id: 2, name: "Cigna".to_string(), accepted: false })
                .with_rate(SelfPayRate { specialty: "Orthopedics".to_string(), rate: Decimal::from(300) }),
        )
    }

    fn registry(scheduling: Arc<InMemorySchedulingRepository>) -> CapabilityRegistry {
        let patients = InMemoryPatientRepository::default()
            .with_patient(PatientContext {
                id: PatientId(1),
                name: "John Doe".to_string(),
                dob: "01/01/1975".to_string(),
                pcp: String::new(),
                ehr_id: String::new(),
                notes: String::new(),
                insurance: None,
                referrals: Vec::new(),
                appointments: Vec::new(),
            })
            .with_insurance(InsuranceCoverage { id: 1, name: "Aetna".to_string(), accepted: true });
        booking_registry(Arc::new(patients), scheduling)
    }

    async fn run(registry: &CapabilityRegistry, name: &str, arguments: serde_json::Value) -> serde_json::Value {
        registry.get(name).expect("registered").execute(arguments).await.expect("execute")
    }

    #[test]
    fn registry_holds_every_capability_with_a_single_commit() {
        let registry = registry(scheduling());

        assert_eq!(registry.len(), 11);
        assert_eq!(registry.commit_capability(), Some(capability::BOOK_APPOINTMENT));
        assert!(registry.get(capability::SELECT_APPOINTMENT_TIME).is_some());
        assert!(registry.get("query_database").is_none());
    }

    #[tokio::test]
    async fn specialty_lookup_reports_candidates_or_absence() {
        let registry = registry(scheduling());

        let orthopedics =
            run(&registry, capability::GET_PROVIDERS_BY_SPECIALTY, json!({"specialty": "orthopedics"})).await;
        assert_eq!(orthopedics["count"], json!(2));
        assert_eq!(orthopedics["providers"][0]["id"], json!(2));

        let cardiology =
            run(&registry, capability::GET_PROVIDERS_BY_SPECIALTY, json!({"specialty": "Cardiology"})).await;
        assert_eq!(cardiology["found"], json!(false));
    }

    #[tokio::test]
    async fn select_location_checks_the_provider_practices_there() {
        let registry = registry(scheduling());

        let ok = run(
            &registry,
            capability::SELECT_LOCATION,
            json!({"provider_id": 2, "department_id": 3}),
        )
        .await;
        assert_eq!(ok["locations"][0]["location_name"], json!("Jefferson Hospital"));

        let wrong = run(
            &registry,
            capability::SELECT_LOCATION,
            json!({"provider_id": 1, "department_id": 3}),
        )
        .await;
        assert!(wrong.get("error").is_some());
    }

    #[tokio::test]
    async fn history_window_decides_the_appointment_type() {
        let scheduling = scheduling();
        let recent = CheckAppointmentHistory::new(scheduling.clone()).as_of(parse_date("2026-10-16").expect("date"));
        let later = CheckAppointmentHistory::new(scheduling).as_of(parse_date("2031-01-01").expect("date"));
        let arguments = json!({"patient_id": 1, "provider_id": 2});

        let established = recent.execute(arguments.clone()).await.expect("execute");
        assert_eq!(established["appointment_type"], json!("ESTABLISHED"));
        assert_eq!(established["last_visit"], json!("2024-08-12"));

        let lapsed = later.execute(arguments).await.expect("execute");
        assert_eq!(lapsed["appointment_type"], json!("NEW"));
        assert_eq!(lapsed["last_visit"], json!(null));
    }

    #[tokio::test]
    async fn insurance_checks_cover_accepted_unaccepted_and_unknown_plans() {
        let registry = registry(scheduling());

        let aetna = run(&registry, capability::CHECK_INSURANCE, json!({"insurance_name": "aet"})).await;
        assert_eq!(aetna["accepted"], json!(true));
        assert_eq!(aetna["matched_name"], json!("Aetna"));

        let cigna = run(&registry, capability::CHECK_INSURANCE, json!({"insurance_name": "Cigna"})).await;
        assert_eq!(cigna["accepted"], json!(false));

        let unknown = run(&registry, capability::CHECK_INSURANCE, json!({"insurance_name": "Acme"})).await;
        assert_eq!(unknown["accepted_insurances"], json!(["Aetna"]));
    }

    #[tokio::test]
    async fn set_patient_insurance_registers_unknown_plans() {
        let registry = registry(scheduling());

        let result = run(
            &registry,
            capability::SET_PATIENT_INSURANCE,
            json!({"patient_id": 1, "insurance_name": "Acme Health"}),
        )
        .await;

        assert_eq!(result["success"], json!(true));
        assert_eq!(result["created"], json!(true));
        assert_eq!(result["accepted"], json!(false));
    }

    #[tokio::test]
    async fn self_pay_rate_is_reported_as_text() {
        let registry = registry(scheduling());

        let rate = run(&registry, capability::GET_SELF_PAY_RATE, json!({"specialty": "Orthopedics"})).await;
        assert_eq!(rate["rate"], json!("300"));
        assert_eq!(rate["message"], json!("Self-pay rate for Orthopedics: $300"));
    }

    #[tokio::test]
    async fn available_times_group_booked_slots_by_date() {
        let scheduling = scheduling();
        let registry = registry(scheduling.clone());
        run(
            &registry,
            capability::BOOK_APPOINTMENT,
            json!({
                "patient_id": 1, "provider_id": 2, "department_id": 3,
                "appointment_type": "ESTABLISHED", "date": "2030-01-08", "appointment_time": "10:00",
            }),
        )
        .await;

        let times = run(
            &registry,
            capability::GET_AVAILABLE_TIMES,
            json!({"provider_id": 2, "department_id": 3, "start_date": "2030-01-07", "end_date": "2030-01-09"}),
        )
        .await;
        assert_eq!(times["booked_times"], json!({"2030-01-08": ["10:00"]}));
        assert_eq!(times["date_range"], json!("2030-01-07 to 2030-01-09"));

        let taken = run(
            &registry,
            capability::SELECT_APPOINTMENT_TIME,
            json!({"date": "2030-01-08", "appointment_time": "10:00", "provider_id": 2, "department_id": 3}),
        )
        .await;
        assert!(taken.get("error").is_some());
    }

    #[tokio::test]
    async fn booking_echoes_confirmation_and_rejects_conflicts() {
        let scheduling = scheduling();
        let registry = registry(scheduling.clone());
        let arguments = json!({
            "patient_id": 1, "provider_id": 2, "department_id": 3,
            "appointment_type": "ESTABLISHED", "date": "2030-01-08", "appointment_time": "10:00",
            "notes": "knee pain",
        });

        let booked = run(&registry, capability::BOOK_APPOINTMENT, arguments.clone()).await;
        assert_eq!(booked["success"], json!(true));
        assert_eq!(booked["details"]["arrival_time"], json!("09:50"));
        assert_eq!(booked["details"]["type"], json!("ESTABLISHED"));
        assert!(booked["confirmation"].as_str().expect("text").contains("Please arrive by 09:50"));

        let conflict = run(&registry, capability::BOOK_APPOINTMENT, arguments).await;
        assert_eq!(conflict["success"], json!(false));
        assert_eq!(scheduling.bookings().await.len(), 1);
    }

    #[tokio::test]
    async fn booking_validates_type_date_and_time() {
        let registry = registry(scheduling());
        let book = registry.get(capability::BOOK_APPOINTMENT).expect("registered");

        let error = book
            .execute(json!({
                "patient_id": 1, "provider_id": 2, "department_id": 3,
                "appointment_type": "WALK-IN", "date": "2030-01-08", "appointment_time": "10:00",
            }))
            .await
            .expect_err("invalid type");
        assert!(matches!(error, CapabilityError::Domain(_)));

        let error = book
            .execute(json!({
                "patient_id": 1, "provider_id": 2, "department_id": 3,
                "appointment_type": "NEW", "date": "01/08/2030", "appointment_time": "10:00",
            }))
            .await
            .expect_err("invalid date");
        assert!(error.to_string().contains("expected YYYY-MM-DD"));
    }
}
