use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::Row;

use careline_core::domain::appointment::{
    parse_date, parse_time, AppointmentId, BookingConfirmation, BookingRequest, DepartmentId,
    ProviderId, DATE_FORMAT,
};
use careline_core::domain::patient::{InsuranceCoverage, PatientId};
use careline_core::domain::scheduling::{BookedSlot, Location, ProviderSummary, SelfPayRate};

use super::{RepositoryError, SchedulingRepository};
use crate::DbPool;

const PROVIDER_COLUMNS: &str =
    "SELECT p.id, p.first_name, p.last_name, p.certification, s.name AS specialty
     FROM providers p
     JOIN specialties s ON s.id = p.specialty_id";

const LOCATION_COLUMNS: &str =
    "SELECT d.id AS department_id, d.name AS location_name, d.address, d.phone, d.hours
     FROM departments d";

pub struct SqlSchedulingRepository {
    pool: DbPool,
}

impl SqlSchedulingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_provider(row: &sqlx::sqlite::SqliteRow) -> Result<ProviderSummary, RepositoryError> {
    Ok(ProviderSummary {
        id: ProviderId(decode(row.try_get("id"))?),
        first_name: decode(row.try_get("first_name"))?,
        last_name: decode(row.try_get("last_name"))?,
        certification: decode(row.try_get("certification"))?,
        specialty: decode(row.try_get("specialty"))?,
    })
}

fn row_to_location(row: &sqlx::sqlite::SqliteRow) -> Result<Location, RepositoryError> {
    Ok(Location {
        department_id: DepartmentId(decode(row.try_get("department_id"))?),
        location_name: decode(row.try_get("location_name"))?,
        address: decode(row.try_get("address"))?,
        phone: decode(row.try_get("phone"))?,
        hours: decode(row.try_get("hours"))?,
    })
}

fn row_to_slot(row: &sqlx::sqlite::SqliteRow) -> Result<BookedSlot, RepositoryError> {
    let date: String = decode(row.try_get("date"))?;
    let time: String = decode(row.try_get("appointment_time"))?;

    Ok(BookedSlot {
        date: parse_date(&date).map_err(|e| RepositoryError::Decode(e.to_string()))?,
        appointment_time: parse_time(&time).map_err(|e| RepositoryError::Decode(e.to_string()))?,
    })
}

#[async_trait::async_trait]
impl SchedulingRepository for SqlSchedulingRepository {
    async fn providers_by_specialty(
        &self,
        specialty: &str,
    ) -> Result<Vec<ProviderSummary>, RepositoryError> {
        sqlx::query(&format!("{PROVIDER_COLUMNS} WHERE s.name = ? ORDER BY p.id"))
            .bind(specialty.trim())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_provider)
            .collect()
    }

    async fn provider_by_id(
        &self,
        id: ProviderId,
    ) -> Result<Option<ProviderSummary>, RepositoryError> {
        let row = sqlx::query(&format!("{PROVIDER_COLUMNS} WHERE p.id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_provider).transpose()
    }

    async fn provider_locations(&self, id: ProviderId) -> Result<Vec<Location>, RepositoryError> {
        sqlx::query(&format!(
            "{LOCATION_COLUMNS}
             JOIN provider_departments pd ON pd.department_id = d.id
             WHERE pd.provider_id = ?
             ORDER BY d.id"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_location)
        .collect()
    }

    async fn location_by_id(&self, id: DepartmentId) -> Result<Option<Location>, RepositoryError> {
        let row = sqlx::query(&format!("{LOCATION_COLUMNS} WHERE d.id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_location).transpose()
    }

    async fn booked_slots(
        &self,
        provider_id: ProviderId,
        department_id: DepartmentId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BookedSlot>, RepositoryError> {
        sqlx::query(
            "SELECT date, appointment_time
             FROM appointments
             WHERE provider_id = ? AND department_id = ?
               AND date >= ? AND date <= ?
               AND status = 'scheduled'
             ORDER BY date, appointment_time",
        )
        .bind(provider_id.0)
        .bind(department_id.0)
        .bind(start.format(DATE_FORMAT).to_string())
        .bind(end.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_slot)
        .collect()
    }

    async fn last_completed_visit(
        &self,
        patient_id: PatientId,
        provider_id: ProviderId,
        since: NaiveDate,
    ) -> Result<Option<NaiveDate>, RepositoryError> {
        let last: Option<String> = sqlx::query_scalar(
            "SELECT date
             FROM appointments
             WHERE patient_id = ? AND provider_id = ? AND date >= ? AND status = 'completed'
             ORDER BY date DESC
             LIMIT 1",
        )
        .bind(patient_id.0)
        .bind(provider_id.0)
        .bind(since.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await?;

        last.map(|date| parse_date(&date).map_err(|e| RepositoryError::Decode(e.to_string())))
            .transpose()
    }

    async fn find_insurance(
        &self,
        name: &str,
    ) -> Result<Option<InsuranceCoverage>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, accepted FROM insurances WHERE name LIKE ? ORDER BY id LIMIT 1",
        )
        .bind(format!("%{}%", name.trim()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(InsuranceCoverage {
                id: decode(row.try_get("id"))?,
                name: decode(row.try_get("name"))?,
                accepted: decode(row.try_get::<i64, _>("accepted"))? != 0,
            })),
            None => Ok(None),
        }
    }

    async fn accepted_insurances(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT name FROM insurances WHERE accepted = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn self_pay_rate(&self, specialty: &str) -> Result<Option<SelfPayRate>, RepositoryError> {
        let row = sqlx::query("SELECT name, self_pay_rate FROM specialties WHERE name = ?")
            .bind(specialty.trim())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let rate: String = decode(row.try_get("self_pay_rate"))?;

        Ok(Some(SelfPayRate {
            specialty: decode(row.try_get("name"))?,
            rate: Decimal::from_str(&rate).map_err(|e| RepositoryError::Decode(e.to_string()))?,
        }))
    }

    async fn book(&self, request: &BookingRequest) -> Result<BookingConfirmation, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let patient: Option<String> =
            sqlx::query_scalar("SELECT first_name || ' ' || last_name FROM patients WHERE id = ?")
                .bind(request.patient_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let patient =
            patient.ok_or_else(|| RepositoryError::NotFound(format!("patient {}", request.patient_id)))?;

        let provider: Option<String> = sqlx::query_scalar(
            "SELECT 'Dr. ' || first_name || ' ' || last_name FROM providers WHERE id = ?",
        )
        .bind(request.provider_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let provider = provider
            .ok_or_else(|| RepositoryError::NotFound(format!("provider {}", request.provider_id.0)))?;

        let location: Option<String> =
            sqlx::query_scalar("SELECT name FROM departments WHERE id = ?")
                .bind(request.department_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let location = location.ok_or_else(|| {
            RepositoryError::NotFound(format!("department {}", request.department_id.0))
        })?;

        let practices_there: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM provider_departments WHERE provider_id = ? AND department_id = ?)",
        )
        .bind(request.provider_id.0)
        .bind(request.department_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if practices_there == 0 {
            return Err(RepositoryError::Conflict(format!(
                "{provider} does not see patients at {location}"
            )));
        }

        let taken: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM appointments
                WHERE provider_id = ? AND date = ? AND appointment_time = ? AND status = 'scheduled'
             )",
        )
        .bind(request.provider_id.0)
        .bind(request.date_string())
        .bind(request.time_string())
        .fetch_one(&mut *tx)
        .await?;
        if taken != 0 {
            return Err(RepositoryError::Conflict(format!(
                "{provider} is already booked on {} at {}",
                request.date_string(),
                request.time_string()
            )));
        }

        let inserted = sqlx::query(
            "INSERT INTO appointments
                (patient_id, provider_id, department_id, appointment_type, date,
                 appointment_time, arrival_time, status, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'scheduled', ?)",
        )
        .bind(request.patient_id.0)
        .bind(request.provider_id.0)
        .bind(request.department_id.0)
        .bind(request.appointment_type.as_str())
        .bind(request.date_string())
        .bind(request.time_string())
        .bind(request.arrival_time_string())
        .bind(&request.notes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(BookingConfirmation {
            appointment_id: AppointmentId(inserted.last_insert_rowid()),
            patient,
            provider,
            location,
            date: request.date_string(),
            appointment_time: request.time_string(),
            arrival_time: request.arrival_time_string(),
            appointment_type: request.appointment_type,
        })
    }
}
