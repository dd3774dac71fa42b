//! Tracklog CLI
//!
//! Command-line client for the Tracklog API server.
//!
//! # Usage
//!
//! ```bash
//! tracklog --help
//! tracklog health
//! tracklog reverse "Hello World"
//! tracklog search --word hello --severity error
//! tracklog search --all
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::models::{
    ErrorStatus, ReverseSentenceRequest, ReverseSentenceResponse, SearchWordRequest,
    SearchWordResponse,
};

/// Tracklog CLI - tracked word operations and audit search
#[derive(Parser)]
#[command(name = "tracklog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API server URL
    #[arg(
        short,
        long,
        env = "TRACKLOG_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API server health
    Health,

    /// Reverse every word of a sentence
    Reverse {
        /// Sentence to reverse
        sentence: String,
    },

    /// Search audit records
    Search {
        /// Word matched against recorded requests and responses
        #[arg(short, long)]
        word: Option<String>,

        /// Return records without requiring a word
        #[arg(short, long)]
        all: bool,

        /// Severity filter (INFO or ERROR)
        #[arg(short, long)]
        severity: Option<String>,
    },
}

impl Commands {
    fn search_request(
        word: Option<String>,
        all: bool,
        severity: Option<String>,
    ) -> SearchWordRequest {
        SearchWordRequest {
            word,
            all_records: all.then_some(true),
            severity,
        }
    }
}

/// HTTP client for the API server.
struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn health(&self) -> Result<serde_json::Value> {
        let url = format!("{}/health", self.base_url);
        tracing::debug!(%url, "GET");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !response.status().is_success() {
            bail!("Health check failed with status {}", response.status());
        }
        Ok(response.json().await?)
    }

    /// Posts a request and decodes the envelope, whatever the status.
    async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<(reqwest::StatusCode, Res)>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "POST");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        let envelope = response
            .json::<Res>()
            .await
            .with_context(|| format!("Unexpected response from {url} ({status})"))?;
        Ok((status, envelope))
    }
}

fn print_errors(errors: &[ErrorStatus]) {
    for error in errors {
        eprintln!("error {}: {}", error.code, error.message);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let client = ApiClient::new(&cli.api_url);

    match cli.command {
        Some(Commands::Health) => {
            let health = client.health().await?;
            if cli.json {
                print_json(&health)?;
            } else {
                println!(
                    "{} {} ({}), persistence {}",
                    health["service"].as_str().unwrap_or("unknown"),
                    health["status"].as_str().unwrap_or("unknown"),
                    health["version"].as_str().unwrap_or("?"),
                    health["persistence"].as_str().unwrap_or("unknown"),
                );
            }
        }
        Some(Commands::Reverse { sentence }) => {
            let (status, response): (_, ReverseSentenceResponse) = client
                .post("/words/reverse", &ReverseSentenceRequest { sentence })
                .await?;

            if cli.json {
                print_json(&response)?;
            } else if let Some(reversed) = &response.reversed_sentence {
                println!("{reversed}");
            }
            if !response.errors.is_empty() {
                print_errors(&response.errors);
                bail!("Reverse failed with status {status}");
            }
        }
        Some(Commands::Search {
            word,
            all,
            severity,
        }) => {
            let request = Commands::search_request(word, all, severity);
            let (status, response): (_, SearchWordResponse) =
                client.post("/words/search", &request).await?;

            if cli.json {
                print_json(&response)?;
            } else {
                for record in &response.records {
                    let sentence = record
                        .request
                        .as_ref()
                        .map_or("-", |request| request.sentence.as_str());
                    let reversed = record
                        .response
                        .as_ref()
                        .and_then(|response| response.reversed_sentence.as_deref())
                        .unwrap_or("-");
                    println!(
                        "{}  {:<5}  {}  {sentence} -> {reversed}",
                        record.unique_id, record.severity, record.service_name
                    );
                }
            }
            if !response.errors.is_empty() {
                print_errors(&response.errors);
                bail!("Search failed with status {status}");
            }
        }
        None => {
            println!("Tracklog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}
