//! Crowd Replay - run a recorded detection stream through the analysis session
//!
//! Reads JSONL detection records and prints one snapshot JSON per line on
//! stdout. Logs go to stderr.
//!
//! Usage:
//!   crowd-replay --config config/dev.toml recordings/front-door.jsonl
//!   cat recording.jsonl | crowd-replay -c config/dev.toml

use clap::Parser;
use crowd_flow::domain::snapshot::ConnectionState;
use crowd_flow::infra::Config;
use crowd_flow::io::ReplayReader;
use crowd_flow::services::{AnalysisSession, TickInput};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Crowd Replay - offline analysis of recorded detections
#[derive(Parser, Debug)]
#[command(name = "crowd-replay", version, about, long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Recording to replay; reads stdin when omitted or "-"
    input: Option<String>,

    /// Only print the final snapshot
    #[arg(long)]
    last_only: bool,
}

fn open_input(path: Option<&str>) -> io::Result<Box<dyn BufRead>> {
    match path {
        None | Some("-") => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::from_file(&config_path)?;
    let mut session = AnalysisSession::new(&config)?;
    let reader = ReplayReader::new(open_input(args.input.as_deref())?);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let base = Instant::now();
    let mut last = None;
    let mut ticks = 0u64;

    for frame in reader {
        let frame = frame?;
        let output = session.tick(TickInput {
            now: base + Duration::from_millis(frame.ts_ms),
            timestamp_ms: frame.ts_ms,
            detections: frame.detections,
            connection: ConnectionState::Connected,
        });
        ticks += 1;
        if args.last_only {
            last = Some(output.snapshot);
        } else {
            serde_json::to_writer(&mut out, &output.snapshot)?;
            out.write_all(b"\n")?;
        }
    }

    if let Some(snapshot) = last {
        serde_json::to_writer(&mut out, &snapshot)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    info!(ticks = %ticks, session_id = %session.session_id(), "replay_complete");
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "replay_failed");
            ExitCode::FAILURE
        }
    }
}
