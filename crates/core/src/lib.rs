pub mod config;
pub mod domain;
pub mod errors;

pub use domain::appointment::{
    AppointmentId, AppointmentType, BookingConfirmation, BookingRequest, DepartmentId, ProviderId,
};
pub use domain::booking::{BookingState, Slot};
pub use domain::patient::{PatientContext, PatientId};
pub use domain::scheduling::{Location, ProviderSummary};
pub use errors::{ApplicationError, DomainError, InterfaceError};
