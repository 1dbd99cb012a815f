//! Interactive probe: type requests, see replies.
//!
//! Reads lines of the form `METHOD URL [JSON-BODY]` from stdin, sends each
//! one to the backend and prints the reply as a JSON line. `exit` closes
//! the connection and quits.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use depot_core::telemetry::{self, LogFormat};
use depot_core::{ClientConfig, Dispatcher, Framing, Method, Reply, Request};

#[derive(Debug, Parser)]
#[command(name = "depot-probe", about = "Send requests to the depot backend by hand")]
struct Cli {
    /// Backend host; overrides DEPOT_HOST.
    #[arg(long)]
    host: Option<String>,
    /// Backend port; overrides DEPOT_PORT.
    #[arg(long)]
    port: Option<u16>,
    /// Response timeout in milliseconds; overrides DEPOT_TIMEOUT_MS.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// `unframed` or `lines`; overrides DEPOT_FRAMING.
    #[arg(long)]
    framing: Option<Framing>,
    /// Do not send the hello frame after connecting.
    #[arg(long)]
    no_greeting: bool,
    #[arg(long, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    /// tracing filter directive, e.g. `depot_core=debug`.
    #[arg(long)]
    log_filter: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum LineError {
    #[error(transparent)]
    Method(#[from] depot_core::http::UnknownMethod),
    #[error("expected `METHOD URL [JSON-BODY]`")]
    MissingUrl,
    #[error("body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
    #[error("body must be a JSON object")]
    BodyNotObject,
}

/// Apply command-line overrides on top of `base`.
fn build_config(cli: &Cli, mut config: ClientConfig) -> ClientConfig {
    if let Some(host) = &cli.host {
        config.endpoint.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.endpoint.port = port;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(framing) = cli.framing {
        config.framing = framing;
    }
    if cli.no_greeting {
        config.greeting = None;
    }
    config
}

fn parse_line(line: &str) -> Result<Request, LineError> {
    let (method, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let method: Method = method.parse()?;
    let rest = rest.trim_start();
    let (url, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if url.is_empty() {
        return Err(LineError::MissingUrl);
    }
    let body = match body.trim() {
        "" => Map::new(),
        text => match serde_json::from_str::<Value>(text)? {
            Value::Object(body) => body,
            _ => return Err(LineError::BodyNotObject),
        },
    };
    Ok(Request::new(method, url).with_body(body))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = telemetry::initialise(cli.log_filter.as_deref(), cli.log_format) {
        eprintln!("depot-probe: {err}");
        return ExitCode::FAILURE;
    }
    let config = match ClientConfig::from_env() {
        Ok(base) => build_config(&cli, base),
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Dispatcher::new(config);
    if let Err(err) = dispatcher.connect().await {
        tracing::error!(error = %err, "initial connect failed; requests will report not connected");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed to read stdin");
                return ExitCode::FAILURE;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        let reply = match parse_line(line) {
            Ok(request) => dispatcher.request(&request).await,
            Err(err) => Reply::fail(err.to_string()),
        };
        match serde_json::to_string(&reply) {
            Ok(text) => println!("{text}"),
            Err(err) => tracing::error!(error = %err, "failed to render reply"),
        }
    }
    dispatcher.close().await;
    ExitCode::SUCCESS
}
