pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "winback",
    about = "Winback operator CLI",
    long_about = "Operate the winback SMS agent: console simulation, migrations, bulk \
                  outreach, and configuration checks.",
    after_help = "Examples:\n  winback console --phone 4805551000 --reset\n  winback migrate\n  winback outreach --targets targets.json --max-active 25\n  winback doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Simulate an SMS conversation for one phone number on the terminal")]
    Console {
        #[arg(long, help = "Phone number to converse as")]
        phone: String,
        #[arg(long, help = "Clear persisted messages and flow state before starting")]
        reset: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Send the first outreach message to each target in a JSON file")]
    Outreach {
        #[arg(long, help = "Path to a JSON array of outreach targets")]
        targets: PathBuf,
        #[arg(long, help = "Override the active-conversation throttle limit")]
        max_active: Option<u64>,
        #[arg(long, help = "Message template with {name}-style placeholders")]
        template: Option<String>,
    },
    #[command(about = "Validate configuration and database connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Console { phone, reset } => commands::console::run(&phone, reset),
        Command::Migrate => commands::migrate::run(),
        Command::Outreach { targets, max_active, template } => {
            commands::outreach::run(&targets, max_active, template.as_deref())
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
