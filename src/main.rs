use anyhow::{Context, Result};
use clap::Parser;
use heaptrace::cli::{Cli, Command, ReplayArgs};
use heaptrace::logger::{self, decode_trace, TRACE_FILE_NAME};
use heaptrace::replay::{self, EventScript};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Replay an event script into a trace file
fn run_replay(args: &ReplayArgs) -> Result<()> {
    let options = args.trace_options().context("invalid trace options")?;
    let script = EventScript::from_file(&args.script)
        .with_context(|| format!("failed to load event script {}", args.script.display()))?;
    let sink = logger::open_sink(&options).context("failed to open trace sink")?;

    let outcome = replay::replay(&script, sink, &options)?;
    if let Some(err) = outcome.error {
        return Err(anyhow::Error::new(err).context("heap trace aborted"));
    }
    println!(
        "{} -> {}",
        outcome.summary,
        options.app_dir().join(TRACE_FILE_NAME).display()
    );
    Ok(())
}

/// Print a binary trace as ascii records
fn run_decode(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records =
        decode_trace(file).with_context(|| format!("failed to decode {}", path.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for record in &records {
        writeln!(out, "{}", record)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match &args.command {
        Command::Replay(replay_args) => run_replay(replay_args),
        Command::Decode { trace } => run_decode(trace),
    }
}
