use sqlx::Row;

use careline_core::domain::patient::{
    AppointmentHistoryEntry, InsuranceCoverage, PatientContext, PatientId, Referral,
};
use careline_core::domain::scheduling::InsuranceAssignment;

use super::{PatientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPatientRepository {
    pool: DbPool,
}

impl SqlPatientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_insurance(row: &sqlx::sqlite::SqliteRow) -> Result<InsuranceCoverage, RepositoryError> {
    Ok(InsuranceCoverage {
        id: decode(row.try_get("id"))?,
        name: decode(row.try_get("name"))?,
        accepted: decode(row.try_get::<i64, _>("accepted"))? != 0,
    })
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<AppointmentHistoryEntry, RepositoryError> {
    let first_name: String = decode(row.try_get("first_name"))?;
    let last_name: String = decode(row.try_get("last_name"))?;

    Ok(AppointmentHistoryEntry {
        date: decode(row.try_get("date"))?,
        time: decode(row.try_get("appointment_time"))?,
        provider: format!("Dr. {first_name} {last_name}"),
        status: decode(row.try_get("status"))?,
        notes: decode(row.try_get("notes"))?,
    })
}

fn row_to_referral(row: &sqlx::sqlite::SqliteRow) -> Result<Referral, RepositoryError> {
    let first_name: Option<String> = decode(row.try_get("first_name"))?;
    let last_name: Option<String> = decode(row.try_get("last_name"))?;

    Ok(Referral {
        specialty: decode(row.try_get("specialty"))?,
        provider: match (first_name, last_name) {
            (Some(first), Some(last)) => Some(format!("{last}, {first} MD")),
            _ => None,
        },
    })
}

#[async_trait::async_trait]
impl PatientRepository for SqlPatientRepository {
    async fn load_context(&self, id: PatientId) -> Result<Option<PatientContext>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT p.id, p.first_name, p.last_name, p.dob, p.pcp, p.ehr_id, p.notes,
                    i.id AS insurance_id, i.name AS insurance_name, i.accepted AS insurance_accepted
             FROM patients p
             LEFT JOIN insurances i ON i.id = p.insurance_id
             WHERE p.id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let first_name: String = decode(row.try_get("first_name"))?;
        let last_name: String = decode(row.try_get("last_name"))?;
        let insurance_id: Option<i64> = decode(row.try_get("insurance_id"))?;
        let insurance = match insurance_id {
            Some(insurance_id) => Some(InsuranceCoverage {
                id: insurance_id,
                name: decode(row.try_get("insurance_name"))?,
                accepted: decode(row.try_get::<i64, _>("insurance_accepted"))? != 0,
            }),
            None => None,
        };

        let appointments = sqlx::query(
            "SELECT a.date, a.appointment_time, a.status, a.notes, pr.first_name, pr.last_name
             FROM appointments a
             JOIN providers pr ON pr.id = a.provider_id
             WHERE a.patient_id = ?
             ORDER BY a.date DESC, a.appointment_time DESC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_history)
        .collect::<Result<Vec<_>, _>>()?;

        let referrals = sqlx::query(
            "SELECT s.name AS specialty, pr.first_name, pr.last_name
             FROM referrals r
             JOIN specialties s ON s.id = r.specialty_id
             LEFT JOIN providers pr ON pr.id = r.provider_id
             WHERE r.patient_id = ?
             ORDER BY r.id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_referral)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PatientContext {
            id: PatientId(decode(row.try_get("id"))?),
            name: format!("{first_name} {last_name}"),
            dob: decode(row.try_get("dob"))?,
            pcp: decode(row.try_get("pcp"))?,
            ehr_id: decode(row.try_get("ehr_id"))?,
            notes: decode(row.try_get("notes"))?,
            insurance,
            referrals,
            appointments,
        }))
    }

    async fn set_insurance(
        &self,
        id: PatientId,
        insurance_name: &str,
    ) -> Result<InsuranceAssignment, RepositoryError> {
        let insurance_name = insurance_name.trim();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id, name, accepted FROM insurances WHERE name = ?")
            .bind(insurance_name)
            .fetch_optional(&mut *tx)
            .await?;

        let (insurance, created) = match existing {
            Some(ref row) => (row_to_insurance(row)?, false),
            None => {
                let inserted =
                    sqlx::query("INSERT INTO insurances (name, accepted) VALUES (?, 0)")
                        .bind(insurance_name)
                        .execute(&mut *tx)
                        .await?;
                let insurance = InsuranceCoverage {
                    id: inserted.last_insert_rowid(),
                    name: insurance_name.to_string(),
                    accepted: false,
                };
                (insurance, true)
            }
        };

        let updated = sqlx::query("UPDATE patients SET insurance_id = ? WHERE id = ?")
            .bind(insurance.id)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("patient {id}")));
        }

        tx.commit().await?;
        Ok(InsuranceAssignment { insurance, created })
    }
}
