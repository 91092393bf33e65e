//! CLI argument parsing for heaptrace

use crate::error::Result;
use crate::options::TraceOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "heaptrace")]
#[command(version)]
#[command(about = "Heap graph tracer: replays instrumentation events into heap traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON event script and write its heap trace
    Replay(ReplayArgs),

    /// Print a binary trace as ascii records
    Decode {
        /// Binary trace file
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Event script (JSON)
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Trace options file (.toml or .json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory the trace file is written to
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Write ascii records instead of MessagePack
    #[arg(long)]
    pub ascii: bool,

    /// Keep every last-use update instead of only the latest
    #[arg(long = "track-all-uses")]
    pub track_all_uses: bool,

    /// Log primitive-over-primitive field writes too
    #[arg(long = "log-all-putfields")]
    pub log_all_putfields: bool,

    /// Emit a DEBUG record for the first argument of every call to NAME
    #[arg(long = "debug-function", value_name = "NAME")]
    pub debug_function: Option<String>,
}

impl ReplayArgs {
    /// Options from `--config` with the command-line flags applied on top.
    ///
    /// Replay always writes to the filesystem sink.
    pub fn trace_options(&self) -> Result<TraceOptions> {
        let mut options = match &self.config {
            Some(path) => TraceOptions::from_file(path)?,
            None => TraceOptions::default(),
        };
        options.sync_filesystem_sink = true;
        options.ascii_encoded_sink |= self.ascii;
        options.track_all_uses |= self.track_all_uses;
        options.log_all_putfields |= self.log_all_putfields;
        if let Some(name) = &self.debug_function {
            options.debug_function_name = Some(name.clone());
        }
        if let Some(out) = &self.out {
            options.app_directory = Some(out.clone());
        }
        options.validate()?;
        Ok(options)
    }
}
