use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use careline_core::domain::appointment::{
    AppointmentId, BookingConfirmation, BookingRequest, DepartmentId, ProviderId,
};
use careline_core::domain::patient::{InsuranceCoverage, PatientContext, PatientId};
use careline_core::domain::scheduling::{
    BookedSlot, InsuranceAssignment, Location, ProviderSummary, SelfPayRate,
};

use super::{PatientRepository, RepositoryError, SchedulingRepository};

#[derive(Default)]
pub struct InMemoryPatientRepository {
    patients: RwLock<HashMap<PatientId, PatientContext>>,
    insurances: RwLock<Vec<InsuranceCoverage>>,
}

impl InMemoryPatientRepository {
    pub fn with_patient(mut self, patient: PatientContext) -> Self {
        self.patients.get_mut().insert(patient.id, patient);
        self
    }

    pub fn with_insurance(mut self, insurance: InsuranceCoverage) -> Self {
        self.insurances.get_mut().push(insurance);
        self
    }
}

#[async_trait::async_trait]
impl PatientRepository for InMemoryPatientRepository {
    async fn load_context(&self, id: PatientId) -> Result<Option<PatientContext>, RepositoryError> {
        let patients = self.patients.read().await;
        Ok(patients.get(&id).cloned())
    }

    async fn set_insurance(
        &self,
        id: PatientId,
        insurance_name: &str,
    ) -> Result<InsuranceAssignment, RepositoryError> {
        let insurance_name = insurance_name.trim();
        let mut patients = self.patients.write().await;
        let patient =
            patients.get_mut(&id).ok_or_else(|| RepositoryError::NotFound(format!("patient {id}")))?;

        let mut insurances = self.insurances.write().await;
        let existing =
            insurances.iter().find(|plan| plan.name.eq_ignore_ascii_case(insurance_name)).cloned();
        let (insurance, created) = match existing {
            Some(insurance) => (insurance, false),
            None => {
                let insurance = InsuranceCoverage {
                    id: insurances.iter().map(|plan| plan.id).max().unwrap_or(0) + 1,
                    name: insurance_name.to_string(),
                    accepted: false,
                };
                insurances.push(insurance.clone());
                (insurance, true)
            }
        };

        patient.insurance = Some(insurance.clone());
        Ok(InsuranceAssignment { insurance, created })
    }
}

/// Scheduling backend held in memory; every successful booking is kept for inspection.
#[derive(Default)]
pub struct InMemorySchedulingRepository {
    patients: HashMap<PatientId, String>,
    providers: Vec<ProviderSummary>,
    locations: HashMap<ProviderId, Vec<Location>>,
    completed_visits: Vec<(PatientId, ProviderId, NaiveDate)>,
    insurances: Vec<InsuranceCoverage>,
    rates: Vec<SelfPayRate>,
    appointments: RwLock<Vec<BookingRequest>>,
}

impl InMemorySchedulingRepository {
    pub fn with_patient(mut self, id: PatientId, name: impl Into<String>) -> Self {
        self.patients.insert(id, name.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderSummary, locations: Vec<Location>) -> Self {
        self.locations.insert(provider.id, locations);
        self.providers.push(provider);
        self
    }

    pub fn with_completed_visit(
        mut self,
        patient_id: PatientId,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Self {
        self.completed_visits.push((patient_id, provider_id, date));
        self
    }

    pub fn with_insurance(mut self, insurance: InsuranceCoverage) -> Self {
        self.insurances.push(insurance);
        self
    }

    pub fn with_rate(mut self, rate: SelfPayRate) -> Self {
        self.rates.push(rate);
        self
    }

    pub async fn bookings(&self) -> Vec<BookingRequest> {
        self.appointments.read().await.clone()
    }
}

#[async_trait::async_trait]
impl SchedulingRepository for InMemorySchedulingRepository {
    async fn providers_by_specialty(
        &self,
        specialty: &str,
    ) -> Result<Vec<ProviderSummary>, RepositoryError> {
        let specialty = specialty.trim();
        Ok(self
            .providers
            .iter()
            .filter(|provider| provider.specialty.eq_ignore_ascii_case(specialty))
            .cloned()
            .collect())
    }

    async fn provider_by_id(
        &self,
        id: ProviderId,
    ) -> Result<Option<ProviderSummary>, RepositoryError> {
        Ok(self.providers.iter().find(|provider| provider.id == id).cloned())
    }

    async fn provider_locations(&self, id: ProviderId) -> Result<Vec<Location>, RepositoryError> {
        Ok(self.locations.get(&id).cloned().unwrap_or_default())
    }

    async fn location_by_id(&self, id: DepartmentId) -> Result<Option<Location>, RepositoryError> {
        Ok(self.locations.values().flatten().find(|location| location.department_id == id).cloned())
    }

    async fn booked_slots(
        &self,
        provider_id: ProviderId,
        department_id: DepartmentId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BookedSlot>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut slots: Vec<BookedSlot> = appointments
            .iter()
            .filter(|request| {
                request.provider_id == provider_id
                    && request.department_id == department_id
                    && request.date >= start
                    && request.date <= end
            })
            .map(|request| BookedSlot { date: request.date, appointment_time: request.appointment_time })
            .collect();
        slots.sort();
        Ok(slots)
    }

    async fn last_completed_visit(
        &self,
        patient_id: PatientId,
        provider_id: ProviderId,
        since: NaiveDate,
    ) -> Result<Option<NaiveDate>, RepositoryError> {
        Ok(self
            .completed_visits
            .iter()
            .filter(|(patient, provider, date)| {
                *patient == patient_id && *provider == provider_id && *date >= since
            })
            .map(|(_, _, date)| *date)
            .max())
    }

    async fn find_insurance(
        &self,
        name: &str,
    ) -> Result<Option<InsuranceCoverage>, RepositoryError> {
        let needle = name.trim().to_ascii_lowercase();
        Ok(self
            .insurances
            .iter()
            .find(|plan| plan.name.to_ascii_lowercase().contains(&needle))
            .cloned())
    }

    async fn accepted_insurances(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.insurances.iter().filter(|plan| plan.accepted).map(|plan| plan.name.clone()).collect())
    }

    async fn self_pay_rate(&self, specialty: &str) -> Result<Option<SelfPayRate>, RepositoryError> {
        let specialty = specialty.trim();
        Ok(self.rates.iter().find(|rate| rate.specialty.eq_ignore_ascii_case(specialty)).cloned())
    }

    async fn book(&self, request: &BookingRequest) -> Result<BookingConfirmation, RepositoryError> {
        let patient = self
            .patients
            .get(&request.patient_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("patient {}", request.patient_id)))?;
        let provider = self
            .providers
            .iter()
            .find(|provider| provider.id == request.provider_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("provider {}", request.provider_id.0)))?;
        let location = self
            .locations
            .get(&request.provider_id)
            .and_then(|locations| {
                locations.iter().find(|location| location.department_id == request.department_id)
            })
            .ok_or_else(|| {
                RepositoryError::Conflict(format!(
                    "{} does not see patients at department {}",
                    provider.display_name(),
                    request.department_id.0
                ))
            })?;

        let mut appointments = self.appointments.write().await;
        let taken = appointments.iter().any(|booked| {
            booked.provider_id == request.provider_id
                && booked.date == request.date
                && booked.appointment_time == request.appointment_time
        });
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "{} is already booked on {} at {}",
                provider.display_name(),
                request.date_string(),
                request.time_string()
            )));
        }

        let id = AppointmentId(appointments.len() as i64 + 1);
        appointments.push(request.clone());

        Ok(BookingConfirmation {
            appointment_id: id,
            patient,
            provider: provider.display_name(),
            location: location.location_name.clone(),
            date: request.date_string(),
            appointment_time: request.time_string(),
            arrival_time: request.arrival_time_string(),
            appointment_type: request.appointment_type,
        })
    }
}
