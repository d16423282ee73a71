//! turnstile-cli — command-line client for the turnstile gateway
//!
//! # Subcommands
//! - `create-session --user <id>`       — create a session, print its id
//! - `chat <session-id> <message>`      — one unary turn
//! - `stream <session-id> <message>`    — one streaming turn, deltas to stdout
//! - `traces <session-id>`              — list the session's traces
//! - `status`                           — gateway health

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Debug, Parser)]
#[command(
    name = "turnstile-cli",
    version,
    about = "Client for the turnstile AI-agent gateway"
)]
struct Cli {
    /// Gateway URL (overrides TURNSTILE_HTTP_URL env var)
    #[arg(long, env = "TURNSTILE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new session
    CreateSession {
        /// Owning user id
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Run one unary chat turn
    Chat {
        session_id: String,
        message: String,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },

    /// Run one streaming chat turn, printing deltas as they arrive
    Stream {
        session_id: String,
        message: String,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },

    /// List the traces recorded for a session
    Traces { session_id: String },

    /// Show gateway health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::CreateSession { user } => {
            let body: serde_json::Value = client
                .post(format!("{server}/api/v1/sessions"))
                .json(&json!({"user_id": user}))
                .send()
                .await
                .context("gateway unreachable")?
                .json()
                .await?;
            match body.get("id").and_then(|v| v.as_str()) {
                Some(id) => println!("{id}"),
                None => bail!("create failed: {body}"),
            }
        }

        Commands::Chat {
            session_id,
            message,
            provider,
            model,
        } => {
            let body: serde_json::Value = client
                .post(format!("{server}/api/v1/sessions/{session_id}/chat"))
                .json(&chat_payload(&message, provider, model))
                .send()
                .await
                .context("gateway unreachable")?
                .json()
                .await?;
            if let Some(error) = body.get("error") {
                bail!("chat failed: {error}");
            }
            println!("{}", body["message"]["content"].as_str().unwrap_or(""));
            eprintln!(
                "tokens={} cost={} trace={}",
                body["usage"]["total_tokens"],
                body["cost"],
                body["trace_id"].as_str().unwrap_or("-")
            );
        }

        Commands::Stream {
            session_id,
            message,
            provider,
            model,
        } => {
            let response = client
                .post(format!("{server}/api/v1/sessions/{session_id}/chat/stream"))
                .json(&chat_payload(&message, provider, model))
                .send()
                .await
                .context("gateway unreachable")?;
            if !response.status().is_success() {
                bail!("stream failed: {}", response.text().await?);
            }

            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(piece) = body.next().await {
                let piece = piece?;
                buffer.push_str(std::str::from_utf8(&piece)?);

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer = buffer[pos + 1..].to_string();
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let event: serde_json::Value = serde_json::from_str(data)?;
                    match event["type"].as_str().unwrap_or("") {
                        "content_delta" => {
                            use std::io::Write;
                            print!("{}", event["content_delta"].as_str().unwrap_or(""));
                            std::io::stdout().flush().ok();
                        }
                        "final_response" => {
                            eprintln!(
                                "\ntokens={} cost={}",
                                event["usage"]["total_tokens"], event["cost"]
                            );
                        }
                        "error" => bail!("stream error: {}", event["error"]),
                        "done" => println!(),
                        _ => {}
                    }
                }
            }
        }

        Commands::Traces { session_id } => {
            let body: serde_json::Value = client
                .get(format!("{server}/api/v1/sessions/{session_id}/traces"))
                .send()
                .await
                .context("gateway unreachable")?
                .json()
                .await?;
            if let Some(error) = body.get("error") {
                bail!("traces failed: {error}");
            }
            for trace in body["traces"].as_array().unwrap_or(&Vec::new()) {
                println!(
                    "{}  {}  {}  tokens={} cost={}",
                    trace["id"].as_str().unwrap_or("-"),
                    trace["agent_name"].as_str().unwrap_or("-"),
                    trace["status"].as_str().unwrap_or("-"),
                    trace["cost_tokens"],
                    trace["cost_api"]
                );
            }
            eprintln!(
                "total={} tokens={} cost={}",
                body["total"], body["total_cost"]["tokens"], body["total_cost"]["api_cost"]
            );
        }

        Commands::Status => {
            let body: serde_json::Value = client
                .get(format!("{server}/health"))
                .send()
                .await
                .context("gateway unreachable")?
                .json()
                .await?;
            println!(
                "status={} version={}",
                body["status"].as_str().unwrap_or("unknown"),
                body["version"].as_str().unwrap_or("-")
            );
        }
    }

    Ok(())
}

fn chat_payload(
    message: &str,
    provider: Option<String>,
    model: Option<String>,
) -> serde_json::Value {
    let mut payload = json!({
        "messages": [{"role": "user", "content": message}],
    });
    if let Some(provider) = provider {
        payload["provider"] = json!(provider);
    }
    if let Some(model) = model {
        payload["model"] = json!(model);
    }
    payload
}
