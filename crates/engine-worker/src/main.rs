//! Engine worker CLI
//!
//! Resolves the best move for each FEN given on the command line (or one per
//! stdin line) through the configured engine tiers, printing one JSON object per
//! position on stdout.

use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engine_worker::chess_core::{self, notation, Position};
use engine_worker::{EngineConfig, FallbackPolicy, MoveRequest, Resolution, SearchOutcome};

#[derive(Parser, Debug)]
#[command(name = "engine-worker", about = "Ask a UCI engine for the best move in FEN positions")]
struct Cli {
    /// Search depth for every position
    #[arg(long)]
    depth: Option<u32>,

    /// Time budget per position, in milliseconds
    #[arg(long)]
    movetime: Option<u64>,

    /// Positions to analyse; read from stdin when omitted
    fens: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the JSON results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    info!(
        engine = %config.engine.label(),
        fallback = config.fallback_engine.is_some(),
        placeholder = config.placeholder_move.is_some(),
        depth = config.session.default_depth,
        "Worker config loaded"
    );

    let fens = if cli.fens.is_empty() {
        read_stdin_fens().await?
    } else {
        cli.fens.clone()
    };

    let mut policy = FallbackPolicy::from_config(&config);
    let mut failed = 0usize;

    for fen in &fens {
        let report = match chess_core::validate(fen) {
            Ok(position) => {
                let request = MoveRequest {
                    position,
                    depth: cli.depth,
                    movetime: cli.movetime.map(Duration::from_millis),
                };
                match policy.resolve(&request).await {
                    Ok(resolution) => report(&request.position, resolution),
                    Err(e) => {
                        error!(fen = %fen, error = %e, "Move resolution failed");
                        failed += 1;
                        json!({ "fen": fen, "error": e.to_string() })
                    }
                }
            }
            Err(e) => {
                failed += 1;
                json!({ "fen": fen, "error": e.to_string() })
            }
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    info!("Shutting down engines");
    policy.close().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {} positions failed", fens.len());
    }
    Ok(())
}

async fn read_stdin_fens() -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fens = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            fens.push(line.to_string());
        }
    }
    Ok(fens)
}

/// JSON report for one resolved position, with SAN added to engine moves.
fn report(position: &Position, resolution: Resolution) -> Value {
    let failures: Vec<String> = resolution.failures().iter().map(ToString::to_string).collect();
    match resolution {
        Resolution::Engine {
            tier,
            mut outcome,
            ..
        } => {
            if let SearchOutcome::BestMove(result) = &mut outcome {
                result.san = notation::san_for_uci(position, &result.best_move);
            }
            json!({
                "fen": position,
                "tier": tier,
                "authoritative": true,
                "result": outcome,
                "failures": failures,
            })
        }
        Resolution::Placeholder { best_move, .. } => json!({
            "fen": position,
            "tier": "placeholder",
            "authoritative": false,
            "result": { "outcome": "placeholder", "best_move": best_move },
            "failures": failures,
        }),
    }
}
