//! textspeak - speak text through the online TTS service into one MP3 file.

use clap::Parser;
use std::error::Error;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use textspeak::{Notification, Settings, SpeechService};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Simple text-to-speech program
#[derive(Parser)]
#[command(name = "textspeak")]
#[command(author = "Erki Suurjaak")]
#[command(version)]
#[command(
    about = "Feeds text in chunks to the online speech service \
             and combines the received MP3s into one file",
    long_about = None
)]
struct Cli {
    /// Text to speak; read from stdin when omitted
    text: Option<String>,

    /// Language code, e.g. en, de, fi
    #[arg(short, long)]
    language: Option<String>,

    /// Where to save the merged MP3
    #[arg(short, long, default_value = "speech.mp3")]
    output: PathBuf,

    /// Only report the merged result, not every chunk
    #[arg(long)]
    all_at_once: bool,

    /// Extra configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List supported languages and exit
    #[arg(long)]
    languages: bool,

    /// Print notifications as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let mut cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    if cli.languages {
        for language in &settings.languages {
            println!("{}\t{}", language.code, language.name);
        }
        return Ok(());
    }

    let text = match cli.text.take() {
        Some(text) => text,
        None => {
            if io::stdin().is_terminal() {
                eprintln!("Enter text, end with Ctrl-D:");
            }
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let language = cli
        .language
        .clone()
        .unwrap_or_else(|| settings.default_language.clone());

    let (service, mut notifications) = SpeechService::new(&settings)?;
    let result = speak(&service, &mut notifications, &text, &language, &cli).await;
    let removed = service.cleanup();
    debug!(removed, "temporary files removed");
    result
}

async fn speak(
    service: &SpeechService,
    notifications: &mut tokio::sync::mpsc::UnboundedReceiver<Notification>,
    text: &str,
    language: &str,
    cli: &Cli,
) -> Result<(), Box<dyn Error>> {
    let id = service.submit(text, language, cli.all_at_once)?;
    info!(request = %id, language, "speaking");

    while let Some(notification) = notifications.recv().await {
        if cli.json {
            println!("{}", serde_json::to_string(&notification)?);
        }
        match notification {
            Notification::Progress {
                received, total, ..
            } if !cli.json => {
                println!("Received {}/{} chunks", received, total);
            }
            Notification::Completed { .. } => {
                let bytes = service.save(id, &cli.output)?;
                if !cli.json {
                    println!("Saved {} bytes to {}", bytes, cli.output.display());
                }
                return Ok(());
            }
            Notification::Failed { message, .. } => {
                return Err(message.into());
            }
            _ => {}
        }
    }
    Err("speech service stopped before finishing".into())
}
