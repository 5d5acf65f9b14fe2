use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::appointment::{DepartmentId, ProviderId, DATE_FORMAT, TIME_FORMAT};
use crate::domain::patient::InsuranceCoverage;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub first_name: String,
    pub last_name: String,
    pub certification: String,
    pub specialty: String,
}

impl ProviderSummary {
    pub fn display_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
    }
}

/// A department where a provider sees patients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub department_id: DepartmentId,
    pub location_name: String,
    pub address: String,
    pub phone: String,
    pub hours: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BookedSlot {
    pub date: NaiveDate,
    pub appointment_time: NaiveTime,
}

impl BookedSlot {
    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_string(&self) -> String {
        self.appointment_time.format(TIME_FORMAT).to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfPayRate {
    pub specialty: String,
    pub rate: Decimal,
}

/// Outcome of pointing a patient at an insurance plan by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceAssignment {
    pub insurance: InsuranceCoverage,
    pub created: bool,
}
