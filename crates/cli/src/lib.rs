pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Airline concierge operator CLI",
    long_about = "Check runtime readiness, apply session store migrations, and run single agent turns.",
    after_help = "Examples:\n  concierge doctor --json\n  concierge migrate\n  concierge chat --message \"What is my seat?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending session store migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, model provider readiness, and session store connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one customer turn against the configured store and print the response")]
    Chat {
        #[arg(long, help = "Customer message for this turn")]
        message: String,
        #[arg(long, help = "Continue an existing conversation")]
        conversation: Option<String>,
        #[arg(
            long,
            requires = "conversation",
            help = "Fail instead of starting a new conversation when the id is unknown"
        )]
        require_existing: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { message, conversation, require_existing } => {
            commands::chat::run(&message, conversation.as_deref(), require_existing)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
