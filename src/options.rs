//! Trace options
//!
//! The option set handed to the dispatcher at construction (the `init` step).
//! Keys use the camelCase names the instrumentation side passes:
//!
//! ```toml
//! trackAllUses = false
//! logAllPutfields = false
//! useHiddenPropertyForIds = false
//! debugFunctionName = "checkLeak"
//! syncFilesystemSink = true
//! asciiEncodedSink = true
//! appDirectory = "/tmp/app"
//! segmentCapacity = 4096
//! ```

use crate::error::{Result, TraceError};
use crate::logger::DEFAULT_SEGMENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where and how the trace is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    AsciiFile,
    BinaryFile,
    BinarySocket,
}

/// Options recognized by the tracer
///
/// # Example
/// ```
/// use heaptrace::options::{SinkMode, TraceOptions};
///
/// let options = TraceOptions::default();
/// assert!(!options.track_all_uses);
/// assert_eq!(options.sink_mode().unwrap(), SinkMode::BinarySocket);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TraceOptions {
    /// Retain every last-use update instead of only the latest
    pub track_all_uses: bool,

    /// Disable the primitive field-write elision
    pub log_all_putfields: bool,

    /// Ask the host to stash ids in a hidden slot on each object
    pub use_hidden_property_for_ids: bool,

    /// Emit a DEBUG record whenever a function with this name is invoked
    pub debug_function_name: Option<String>,

    /// Write the trace to a local file instead of a socket
    pub sync_filesystem_sink: bool,

    /// Ascii instead of binary encoding (filesystem sink only)
    pub ascii_encoded_sink: bool,

    /// Directory of the traced application; trace files go here
    pub app_directory: Option<PathBuf>,

    /// Trace server for the socket sink
    pub socket_address: String,

    /// Records per segment before the sink asks for a flush
    pub segment_capacity: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            track_all_uses: false,
            log_all_putfields: false,
            use_hidden_property_for_ids: false,
            debug_function_name: None,
            sync_filesystem_sink: false,
            ascii_encoded_sink: false,
            app_directory: None,
            socket_address: "127.0.0.1:8080".to_string(),
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
        }
    }
}

impl TraceOptions {
    /// Load options from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: TraceOptions = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| TraceError::InvalidOptions(format!("{}: {}", path.display(), e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| TraceError::InvalidOptions(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(TraceError::InvalidOptions(format!(
                    "{}: expected a .toml or .json file",
                    path.display()
                )))
            }
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject option combinations the tracer cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity == 0 {
            return Err(TraceError::UnsupportedConfig(
                "segmentCapacity must be at least 1".to_string(),
            ));
        }
        self.sink_mode().map(|_| ())
    }

    /// Sink selected by the encoding and transport flags
    pub fn sink_mode(&self) -> Result<SinkMode> {
        match (self.sync_filesystem_sink, self.ascii_encoded_sink) {
            (true, true) => Ok(SinkMode::AsciiFile),
            (true, false) => Ok(SinkMode::BinaryFile),
            (false, false) => Ok(SinkMode::BinarySocket),
            (false, true) => Err(TraceError::UnsupportedConfig(
                "ascii encoding is only available for the filesystem sink".to_string(),
            )),
        }
    }

    /// Directory trace files are written to
    pub fn app_dir(&self) -> &Path {
        self.app_directory.as_deref().unwrap_or_else(|| Path::new("."))
    }
}
