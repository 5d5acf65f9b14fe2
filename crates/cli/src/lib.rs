pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "careline",
    about = "Careline operator CLI",
    long_about = "Prepare the scheduling database, inspect configuration, check readiness, and book appointments from the terminal.",
    after_help = "Examples:\n  careline migrate\n  careline seed\n  careline doctor --json\n  careline chat --patient 1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo clinic dataset (skipped when it is already present)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, completion provider settings, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Book an appointment for a patient in an interactive terminal session")]
    Chat {
        #[arg(long, help = "Patient ID to open the session for")]
        patient: i64,
        #[arg(long, default_value = "terminal", help = "Operator identity for the session")]
        operator: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chat { patient, operator } => commands::chat::run(&operator, patient),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
