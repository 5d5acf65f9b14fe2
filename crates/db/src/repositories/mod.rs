use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use careline_core::domain::appointment::{
    BookingConfirmation, BookingRequest, DepartmentId, ProviderId,
};
use careline_core::domain::patient::{InsuranceCoverage, PatientContext, PatientId};
use careline_core::domain::scheduling::{
    BookedSlot, InsuranceAssignment, Location, ProviderSummary, SelfPayRate,
};

pub mod memory;
pub mod patient;
pub mod scheduling;

pub use memory::{InMemoryPatientRepository, InMemorySchedulingRepository};
pub use patient::SqlPatientRepository;
pub use scheduling::SqlSchedulingRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait PatientRepository: Send + Sync {
    /// Loads everything the agent needs to know about a patient, history newest first.
    async fn load_context(&self, id: PatientId) -> Result<Option<PatientContext>, RepositoryError>;

    /// Points the patient at an insurance plan, registering unknown plans as not accepted.
    async fn set_insurance(
        &self,
        id: PatientId,
        insurance_name: &str,
    ) -> Result<InsuranceAssignment, RepositoryError>;
}

#[async_trait]
pub trait SchedulingRepository: Send + Sync {
    async fn providers_by_specialty(
        &self,
        specialty: &str,
    ) -> Result<Vec<ProviderSummary>, RepositoryError>;

    async fn provider_by_id(&self, id: ProviderId)
        -> Result<Option<ProviderSummary>, RepositoryError>;

    async fn provider_locations(&self, id: ProviderId) -> Result<Vec<Location>, RepositoryError>;

    async fn location_by_id(&self, id: DepartmentId) -> Result<Option<Location>, RepositoryError>;

    /// Scheduled appointments for a provider at a location within an inclusive date range.
    async fn booked_slots(
        &self,
        provider_id: ProviderId,
        department_id: DepartmentId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BookedSlot>, RepositoryError>;

    /// Most recent completed visit on or after `since`.
    async fn last_completed_visit(
        &self,
        patient_id: PatientId,
        provider_id: ProviderId,
        since: NaiveDate,
    ) -> Result<Option<NaiveDate>, RepositoryError>;

    /// Case-insensitive substring match on the plan name.
    async fn find_insurance(&self, name: &str)
        -> Result<Option<InsuranceCoverage>, RepositoryError>;

    async fn accepted_insurances(&self) -> Result<Vec<String>, RepositoryError>;

    async fn self_pay_rate(&self, specialty: &str) -> Result<Option<SelfPayRate>, RepositoryError>;

    async fn book(&self, request: &BookingRequest) -> Result<BookingConfirmation, RepositoryError>;
}
