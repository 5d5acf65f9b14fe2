use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientId(pub i64);

impl std::fmt::Display for PatientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceCoverage {
    pub id: i64,
    pub name: String,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub specialty: String,
    pub provider: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentHistoryEntry {
    pub date: String,
    pub time: String,
    pub provider: String,
    pub status: String,
    pub notes: String,
}

/// Read-only facts about the patient a booking conversation is about.
///
/// Loaded once when a session begins and never mutated afterwards; a new
/// subject means a new session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientContext {
    pub id: PatientId,
    pub name: String,
    pub dob: String,
    pub pcp: String,
    pub ehr_id: String,
    pub notes: String,
    pub insurance: Option<InsuranceCoverage>,
    pub referrals: Vec<Referral>,
    pub appointments: Vec<AppointmentHistoryEntry>,
}

impl PatientContext {
    pub fn recent_appointments(&self, limit: usize) -> &[AppointmentHistoryEntry] {
        let end = self.appointments.len().min(limit);
        &self.appointments[..end]
    }

    pub fn has_unaccepted_insurance(&self) -> bool {
        self.insurance.as_ref().is_some_and(|insurance| !insurance.accepted)
    }
}
