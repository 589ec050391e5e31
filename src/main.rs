//! mongoprobe - MongoDB monitoring probe

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongoprobe::{Args, Probe, ProbeOptions};

/// One JSON-lines request from stdin.
#[derive(Deserialize)]
struct Request {
    key: String,
    #[serde(default)]
    params: Vec<String>,
}

/// One JSON-lines reply on stdout.
#[derive(Serialize)]
struct Response {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mongoprobe={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!(
        "mongoprobe {} (commit {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP"),
    );

    let mut options = match &args.config {
        Some(path) => match ProbeOptions::load(path) {
            Ok(options) => {
                info!("Options loaded from {}", path.display());
                options
            }
            Err(e) => {
                error!("Cannot load options: {}", e);
                std::process::exit(1);
            }
        },
        None => ProbeOptions::default(),
    };

    options.configure(args.timeout);
    if let Err(e) = options.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!(
        timeout = options.timeout,
        keep_alive = options.keep_alive,
        sessions = options.sessions.len(),
        "Probe configured"
    );

    let mut probe = Probe::new(options, args.timeout);
    probe.start();

    match &args.key {
        Some(key) => {
            // One-shot: export a single metric and print its value.
            let result = probe.export(key, &args.params).await;
            probe.stop().await;
            match result {
                Ok(value) => println!("{}", render(&value)),
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("Serving requests on stdin; Ctrl-C to stop");
            serve(&probe).await;
            probe.stop().await;
        }
    }

    Ok(())
}

/// Read JSON-lines requests from stdin until it closes or the process
/// is interrupted, answering each on stdout.
async fn serve<C>(probe: &Probe<C>)
where
    C: mongoprobe::conn::Connect,
    C::Session: mongoprobe::target::TargetSession,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("stdin error: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Bad request line: {}", e);
                continue;
            }
        };

        let response = match probe.export(&request.key, &request.params).await {
            Ok(value) => Response {
                key: request.key,
                value: Some(value),
                error: None,
            },
            Err(e) => Response {
                key: request.key,
                value: None,
                error: Some(e.to_string()),
            },
        };

        match serde_json::to_string(&response) {
            Ok(raw) => println!("{}", raw),
            Err(e) => error!("Cannot serialize response: {}", e),
        }
    }
}

/// Plain values print bare; anything else prints as JSON.
fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
