use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::domain::patient::PatientId;
use crate::errors::DomainError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppointmentId(pub i64);

/// Classification of a visit, decided from the patient's history with the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentType {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "ESTABLISHED")]
    Established,
}

impl AppointmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Established => "ESTABLISHED",
        }
    }

    /// How long before the slot the patient should arrive.
    pub fn arrival_lead(self) -> Duration {
        match self {
            Self::New => Duration::minutes(30),
            Self::Established => Duration::minutes(10),
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::New => Duration::minutes(30),
            Self::Established => Duration::minutes(15),
        }
    }
}

impl std::fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "ESTABLISHED" => Ok(Self::Established),
            _ => Err(DomainError::InvalidAppointmentType(value.to_string())),
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| DomainError::InvalidDate(value.to_string()))
}

pub fn parse_time(value: &str) -> Result<NaiveTime, DomainError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|_| DomainError::InvalidTime(value.to_string()))
}

/// Payload sent to the booking backend once every slot is filled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRequest {
    pub patient_id: PatientId,
    pub provider_id: ProviderId,
    pub department_id: DepartmentId,
    pub appointment_type: AppointmentType,
    pub date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub notes: String,
}

impl BookingRequest {
    pub fn arrival_time(&self) -> NaiveTime {
        let (arrival, _) =
            self.appointment_time.overflowing_sub_signed(self.appointment_type.arrival_lead());
        arrival
    }

    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_string(&self) -> String {
        self.appointment_time.format(TIME_FORMAT).to_string()
    }

    pub fn arrival_time_string(&self) -> String {
        self.arrival_time().format(TIME_FORMAT).to_string()
    }
}

/// What the backend echoes after a successful booking, enough for a confirmation message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub appointment_id: AppointmentId,
    pub patient: String,
    pub provider: String,
    pub location: String,
    pub date: String,
    pub appointment_time: String,
    pub arrival_time: String,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
}
