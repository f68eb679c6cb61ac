//! CardComposer CLI
//!
//! Commands: generate, templates, validate
//! Outputs JSON to stdout, logs to stderr
//! Returns 1 when definitions or config cannot be loaded, 2 when a face fails

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardcomposer_core::{Capabilities, Deck, EngineConfig};

#[derive(Parser)]
#[command(name = "cardcomposer-cli")]
#[command(about = "CardComposer CLI - declarative card face rendering")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the card definitions file
    #[arg(short, long, default_value = "cards.json")]
    cards: PathBuf,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every card face and print the run report
    Generate,

    /// List labelled faces with their cumulative templates and size
    Templates,

    /// Compose every face without rendering
    Validate,
}

fn init_logging() {
    let log_format =
        std::env::var("CARDCOMPOSER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cardcomposer_core=info,cardcomposer_cli=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn emit<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(r#"{{"success": false, "error": "Failed to encode output: {e}"}}"#),
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    emit(&serde_json::json!({
        "success": false,
        "error": error.to_string(),
    }));
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => return fail(e),
        },
        None => EngineConfig::default(),
    };

    let deck = match Deck::load(&cli.cards) {
        Ok(deck) => deck,
        Err(e) => return fail(e),
    };

    match cli.command {
        Commands::Generate => {
            let capabilities = match Capabilities::standard() {
                Ok(c) => c,
                Err(e) => return fail(e),
            };
            match deck.generate_all(&capabilities, &config) {
                Ok(report) => {
                    let success = report.is_success();
                    emit(&serde_json::json!({
                        "success": success,
                        "report": report,
                    }));
                    if success {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2) // At least one face failed
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Templates => match deck.validate() {
            Ok(faces) => {
                let templates: Vec<_> = faces
                    .iter()
                    .filter(|f| f.label.is_some())
                    .map(|f| {
                        serde_json::json!({
                            "label": f.label,
                            "is_template": f.is_template,
                            "templates": f.templates,
                            "size": f.size,
                            "error": f.error,
                        })
                    })
                    .collect();
                emit(&templates);
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::Validate => match deck.validate() {
            Ok(faces) => {
                let valid = faces.iter().all(|f| f.error.is_none());
                emit(&serde_json::json!({
                    "valid": valid,
                    "faces": faces,
                }));
                if valid {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2) // Composition failure
                }
            }
            Err(e) => {
                emit(&serde_json::json!({
                    "valid": false,
                    "error": e.to_string(),
                }));
                ExitCode::from(2)
            }
        },
    }
}
