use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Row counts the demo clinic dataset is expected to produce, per table.
const EXPECTED_ROWS: &[(&str, i64)] = &[
    ("specialties", 3),
    ("providers", 4),
    ("departments", 4),
    ("provider_departments", 5),
    ("insurances", 5),
    ("patients", 2),
    ("referrals", 2),
    ("appointments", 5),
];

/// Deterministic clinic data for tests and local demos.
///
/// Two orthopedists and a provider with two locations make it easy to drive
/// the agent into ambiguous lookups.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_clinic.sql");

    pub async fn load(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(EXPECTED_ROWS.len());

        for (table, expected) in EXPECTED_ROWS {
            // Table names come from the constant above, never from input.
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}"))
                .fetch_one(pool)
                .await?;
            checks.push((*table, count >= *expected));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
