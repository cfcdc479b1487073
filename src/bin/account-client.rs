//! Interactive terminal client for the account registry server.
//!
//! Reads `action id [number]` lines from stdin, sends each as one request
//! and prints the response record.

use account_registry::client::{parse_command, Client};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

const PROMPT: &str =
    "Enter command (set_balance, get_balance, set_credit, get_credit) and account number: ";

#[derive(Parser, Debug)]
#[command(name = "account-client")]
#[command(version)]
#[command(about = "Interactive client for the account registry server", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    connect: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut client = Client::connect(&args.connect).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{PROMPT}");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let request = match parse_command(&line) {
            Ok(request) => request,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match client.call(&request).await {
            Ok(response) => println!("Response: {}", serde_json::to_string(&response)?),
            Err(e) => {
                error!(error = %e, "Request failed");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
