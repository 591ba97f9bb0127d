use std::time::Duration;

use clap::{Args, Subcommand};
use condux_client::{Client, ClientConfig, Persistence};
use condux_transport::WebSocketTransport;
use serde_json::Value;
use tracing::debug;

use crate::exit::{client_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod action;
pub mod listen;
pub mod request;
pub mod version;

/// Time given to the socket task to write pending frames and the close
/// handshake before the runtime shuts down.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Subscribe to topics and print their events.
    Listen(ListenArgs),
    /// Dispatch a named action to the server.
    Action(ActionArgs),
    /// Send a correlated request on a topic and print the response.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format).await,
        Command::Action(args) => action::run(args).await,
        Command::Request(args) => request::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Server URL (ws:// or wss://).
    pub url: String,
    /// Topic to subscribe to. Repeat for several topics.
    #[arg(long = "topic", short = 't', value_name = "TOPIC", required = true)]
    pub topics: Vec<String>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Maximum time to wait for the first connection (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct ActionArgs {
    /// Server URL (ws:// or wss://).
    pub url: String,
    /// Action name.
    pub name: String,
    /// JSON payload. Default: null.
    #[arg(long)]
    pub json: Option<String>,
    /// Maximum time to wait for the connection (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Server URL (ws:// or wss://).
    pub url: String,
    /// Topic to send the request on.
    pub topic: String,
    /// JSON request constraints.
    #[arg(long)]
    pub json: String,
    /// Maximum time to wait for the connection and for the response.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Client for a one-shot command: no reconnection, requests bounded by `limit`.
fn one_shot_client(url: &str, limit: Duration) -> Client {
    let config = ClientConfig::default()
        .with_persistence(Persistence::disabled())
        .with_request_timeout(Some(limit));
    Client::with_config(WebSocketTransport::new(url), config)
}

async fn connect(client: &Client, limit: Duration) -> CliResult<()> {
    client
        .connect()
        .map_err(|err| client_error("connect failed", err))?;
    tokio::time::timeout(limit, client.ready())
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("connect timed out after {limit:?}")))
}

async fn shutdown(client: &Client) {
    client.flush().await;
    client.disconnect();
    debug!("waiting for socket to close");
    tokio::time::sleep(CLOSE_GRACE).await;
}

fn parse_json(flag: &str, input: &str) -> CliResult<Value> {
    serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("{flag} is not valid JSON: {err}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn parse_json_reports_usage_error() {
        assert_eq!(parse_json("--json", "{\"a\":1}").unwrap()["a"], 1);
        let err = parse_json("--json", "{oops").expect_err("invalid JSON should fail");
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("--json is not valid JSON"));
    }
}
