//! Terminal transport for the booking conversation.
//!
//! Lines starting with `/` are session commands: `/reset`, `/patient <id>`, `/quit`.
//! Everything else is sent to the agent as one nurse message.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use careline_agent::{OpenAiCompatibleClient, RuntimeSettings, SessionService, SessionStarted};
use careline_core::config::{AppConfig, LogFormat};
use careline_core::domain::patient::PatientId;
use careline_db::{migrations, SqlPatientRepository, SqlSchedulingRepository};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;

use crate::commands::{open_pool, prepare, CommandResult};

pub fn run(operator: &str, patient_id: i64) -> CommandResult {
    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    init_logging(&config);

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let provider = OpenAiCompatibleClient::from_config(&config.llm)
            .map_err(|error| ("completion_provider", error.to_string(), 2u8))?;
        let service = SessionService::for_booking(
            Arc::new(SqlPatientRepository::new(pool.clone())),
            Arc::new(SqlSchedulingRepository::new(pool.clone())),
            Arc::new(provider),
            RuntimeSettings::from(&config.agent),
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let outcome = converse(&service, operator, PatientId(patient_id), stdin, io::stdout())
            .await
            .map_err(|error| ("chat_session", format!("{error:#}"), 6u8));
        pool.close().await;
        outcome
    });

    match result {
        Ok(()) => CommandResult::success("chat", "session closed"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

/// Runs one operator's conversation until `/quit` or end of input.
pub async fn converse<R: AsyncBufRead + Unpin, W: Write>(
    service: &SessionService,
    operator: &str,
    patient_id: PatientId,
    input: R,
    mut output: W,
) -> Result<()> {
    let started = service.begin(operator, patient_id).await.context("could not open session")?;
    print_started(&mut output, &started)?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("could not read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(command, rest)| (command, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/reset", _) => {
                let started = service.reset(operator).await?;
                print_started(&mut output, &started)?;
            }
            ("/patient", argument) => match argument.parse::<i64>() {
                Ok(id) => match service.switch_subject(operator, PatientId(id)).await {
                    Ok(started) => print_started(&mut output, &started)?,
                    Err(error) => writeln!(output, "! {error}")?,
                },
                Err(_) => writeln!(output, "! usage: /patient <id>")?,
            },
            (command, _) if command.starts_with('/') => {
                writeln!(output, "! unknown command {command}; try /reset, /patient <id>, or /quit")?
            }
            _ => {
                let reply = service.message(operator, line).await?;
                writeln!(output, "agent> {}", reply.text)?;
                writeln!(output, "{}", reply.booking_progress)?;
            }
        }
        output.flush()?;
    }

    service.end(operator).await;
    info!(event_name = "transport.chat.closed", operator_id = %operator, "terminal session closed");
    Ok(())
}

fn print_started<W: Write>(output: &mut W, started: &SessionStarted) -> Result<()> {
    writeln!(output, "== {} (patient {})", started.patient_name, started.patient_id)?;
    if let Some(greeting) = &started.greeting {
        writeln!(output, "agent> {greeting}")?;
    }
    writeln!(output, "{}", started.booking_progress)?;
    output.flush()?;
    Ok(())
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(level).with_writer(io::stderr);

    // A second init in the same process is harmless; ignore it.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
