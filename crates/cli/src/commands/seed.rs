use careline_db::{migrations, DemoDataset, VerificationResult};

use crate::commands::{open_pool, prepare, CommandResult, StepError};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = seed(&pool).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(SeedOutcome::AlreadyPresent) => {
            CommandResult::success("seed", "demo clinic dataset already present; nothing loaded")
        }
        Ok(SeedOutcome::Loaded) => CommandResult::success(
            "seed",
            "demo clinic dataset loaded: 4 providers across 4 departments, patients John Doe (1) and Jane Smith (2)",
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

enum SeedOutcome {
    Loaded,
    AlreadyPresent,
}

async fn seed(pool: &careline_db::DbPool) -> Result<SeedOutcome, StepError> {
    migrations::run_pending(pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let before = DemoDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
    if before.all_present {
        return Ok(SeedOutcome::AlreadyPresent);
    }

    DemoDataset::load(pool).await.map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let after = DemoDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
    if !after.all_present {
        return Err(("seed_verification", verification_message(&after), 6u8));
    }
    Ok(SeedOutcome::Loaded)
}

fn verification_message(verification: &VerificationResult) -> String {
    let failed = verification
        .checks
        .iter()
        .filter_map(|(table, present)| (!present).then_some(*table))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "some demo data failed to load".to_string()
    } else {
        format!("demo data missing from tables: {}", failed.join(", "))
    }
}
