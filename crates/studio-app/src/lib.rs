//! Studio App: composition root and command line front end.
//!
//! This crate is the DI wiring layer. It assembles the platform adapters
//! into an `AppContext` and runs one request per invocation.

pub mod app;
pub mod config;


use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

pub use app::{build_context, execute, execute_with, init, log_events, ExecuteRequest};
pub use config::load_config;

#[derive(Debug, Parser)]
#[command(
    name = "studio",
    about = "Conversational image and 3D studio agent",
    after_help = "Examples:\n  studio \"draw a red bicycle\"\n  studio --session <id> \"now make it 3D\""
)]
pub struct Cli {
    #[arg(long, short, help = "Path to the TOML configuration (default: studio.toml)")]
    config: Option<PathBuf>,
    #[arg(long, default_value = "", help = "Session to continue; omit to start a new one")]
    session: String,
    #[arg(long, default_value = "anonymous", help = "User the session belongs to")]
    user: String,
    #[arg(long, default_value = "", help = "Model family or model name (gemini, llama3.2:1b, gpt-4o...)")]
    model: String,
    #[arg(help = "What to ask the agent")]
    prompt: String,
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init(config).await {
        log::error!("Startup failed: {}", e);
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    let request = ExecuteRequest {
        prompt: cli.prompt,
        username: cli.user,
        session_id: cli.session,
        base_model: cli.model,
    };
    let output = match execute(request).await {
        Ok(output) => output,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
