//! Event logger boundary
//!
//! The dispatcher hands every record to an [`EventLogger`]. The core never
//! decides how records are encoded or where they go; that is the sink's job.
//! This module defines the boundary and ships the reference sinks:
//!
//! - [`MemoryLogger`]: records kept in a `Vec`, for tests and in-process analysis
//! - [`StreamLogger`]: ascii or binary (MessagePack) encoding over any `Write`
//!
//! # Segments and flush points
//!
//! Sinks buffer records in segments. A segment may only be closed at a flush
//! point, a top-level site recorded by the dispatcher at `endExpression`:
//!
//! ```text
//! flush_point() == Pending ──endExpression(site)──► Recorded(site)
//!        ▲                                                │
//!        └──────── flush_segment(): TOP_LEVEL_FLUSH,site ◄┘
//! ```

mod memory;
mod stream;

pub use memory::MemoryLogger;
pub use stream::{decode_trace, Encoding, StreamLogger};

use crate::error::{Result, TraceError};
use crate::options::{SinkMode, TraceOptions};
use crate::record::Record;
use crate::value::{FreeVars, Iid, LogicalTime, ObjectId, ScriptId, SourceId};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::TcpStream;

/// File name used by the filesystem sinks
pub const TRACE_FILE_NAME: &str = "mem-trace";

/// Default number of records per segment
pub const DEFAULT_SEGMENT_CAPACITY: usize = 4096;

/// Flush-point state of the current segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPoint {
    /// No flush point recorded since the last segment boundary
    Pending,
    /// Flush point for the current segment
    Recorded(SourceId),
}

/// Sink for trace records
///
/// Implementors provide [`append`](EventLogger::append) and the clock and
/// segment queries; the typed `log_*` helpers build the [`Record`]s.
pub trait EventLogger {
    /// Append one record; the sink's logical clock advances by one
    fn append(&mut self, record: Record) -> Result<()>;

    /// Logical time of the next record
    fn logical_time(&self) -> LogicalTime;

    fn flush_point(&self) -> FlushPoint;

    fn set_flush_point(&mut self, script_id: ScriptId, site: Iid);

    /// Whether the current segment should be closed at the next flush point
    fn segment_full(&self) -> bool {
        false
    }

    /// Close the current segment, emitting its flush record
    fn flush_segment(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush everything and invoke `on_complete` once the data is durable
    fn end(&mut self, on_complete: Box<dyn FnOnce()>) -> Result<()>;

    /// Stop accepting records
    fn stop_tracing(&mut self);

    fn log_declare(&mut self, site: Iid, name: &str, id: ObjectId) -> Result<()> {
        self.append(Record::Declare {
            site,
            name: name.to_string(),
            id,
        })
    }

    fn log_create_obj(&mut self, site: SourceId, id: ObjectId) -> Result<()> {
        self.append(Record::CreateObj { site, id })
    }

    fn log_create_fun(
        &mut self,
        site: SourceId,
        id: ObjectId,
        prototype_id: ObjectId,
        enter_site: Iid,
    ) -> Result<()> {
        self.append(Record::CreateFun {
            site,
            id,
            prototype_id,
            enter_site,
        })
    }

    fn log_putfield(&mut self, site: Iid, base_id: ObjectId, name: &str, value_id: ObjectId) -> Result<()> {
        self.append(Record::PutField {
            site,
            base_id,
            name: name.to_string(),
            value_id,
        })
    }

    fn log_write(&mut self, site: Iid, name: &str, id: ObjectId) -> Result<()> {
        self.append(Record::Write {
            site,
            name: name.to_string(),
            id,
        })
    }

    fn log_last_use(&mut self, id: ObjectId, site: SourceId, time: LogicalTime) -> Result<()> {
        self.append(Record::LastUse { id, site, time })
    }

    fn log_call(
        &mut self,
        site: Iid,
        callee_id: Option<ObjectId>,
        enter_site: Iid,
        stable_id: u32,
    ) -> Result<()> {
        self.append(Record::Call {
            site,
            callee_id,
            enter_site,
            stable_id,
        })
    }

    fn log_return(&mut self, id: ObjectId) -> Result<()> {
        self.append(Record::Return { id })
    }

    fn log_function_enter(&mut self, site: Iid, fun_id: ObjectId) -> Result<()> {
        self.append(Record::FunctionEnter { site, fun_id })
    }

    fn log_function_exit(&mut self, site: Iid) -> Result<()> {
        self.append(Record::FunctionExit { site })
    }

    fn log_script_enter(&mut self, site: Iid, script_id: ScriptId, file_name: &str) -> Result<()> {
        self.append(Record::ScriptEnter {
            site,
            script_id,
            file_name: file_name.to_string(),
        })
    }

    fn log_script_exit(&mut self, site: Iid) -> Result<()> {
        self.append(Record::ScriptExit { site })
    }

    fn log_source_mapping(&mut self, site: Iid, position: [u32; 4]) -> Result<()> {
        let [start_line, start_column, end_line, end_column] = position;
        self.append(Record::SourceMapping {
            site,
            start_line,
            start_column,
            end_line,
            end_column,
        })
    }

    fn log_free_vars(&mut self, site: Iid, names: FreeVars) -> Result<()> {
        self.append(Record::FreeVars { site, names })
    }

    fn log_update_iid(&mut self, id: ObjectId, site: Iid) -> Result<()> {
        self.append(Record::UpdateIid { id, site })
    }

    fn log_debug(&mut self, site: Iid, id: ObjectId) -> Result<()> {
        self.append(Record::Debug { site, id })
    }
}

impl<L: EventLogger + ?Sized> EventLogger for Box<L> {
    fn append(&mut self, record: Record) -> Result<()> {
        (**self).append(record)
    }

    fn logical_time(&self) -> LogicalTime {
        (**self).logical_time()
    }

    fn flush_point(&self) -> FlushPoint {
        (**self).flush_point()
    }

    fn set_flush_point(&mut self, script_id: ScriptId, site: Iid) {
        (**self).set_flush_point(script_id, site)
    }

    fn segment_full(&self) -> bool {
        (**self).segment_full()
    }

    fn flush_segment(&mut self) -> Result<()> {
        (**self).flush_segment()
    }

    fn end(&mut self, on_complete: Box<dyn FnOnce()>) -> Result<()> {
        (**self).end(on_complete)
    }

    fn stop_tracing(&mut self) {
        (**self).stop_tracing()
    }
}

/// Open the sink selected by `options`
///
/// - ascii + filesystem: `<appDirectory>/mem-trace`, one line per record
/// - filesystem: `<appDirectory>/mem-trace`, MessagePack
/// - otherwise: MessagePack over TCP to `socketAddress`, preceded by the app
///   directory on its own line when one is configured
pub fn open_sink(options: &TraceOptions) -> Result<Box<dyn EventLogger>> {
    let capacity = options.segment_capacity;
    match options.sink_mode()? {
        SinkMode::AsciiFile => {
            let path = options.app_dir().join(TRACE_FILE_NAME);
            tracing::debug!(path = %path.display(), "opening ascii trace file");
            let file = BufWriter::new(File::create(&path)?);
            Ok(Box::new(StreamLogger::ascii(file).with_segment_capacity(capacity)))
        }
        SinkMode::BinaryFile => {
            let path = options.app_dir().join(TRACE_FILE_NAME);
            tracing::debug!(path = %path.display(), "opening binary trace file");
            let file = BufWriter::new(File::create(&path)?);
            Ok(Box::new(StreamLogger::binary(file).with_segment_capacity(capacity)))
        }
        SinkMode::BinarySocket => {
            let address = options.socket_address.as_str();
            tracing::debug!(address, "connecting trace socket");
            let mut stream = TcpStream::connect(address).map_err(|e| {
                TraceError::UnsupportedConfig(format!("cannot reach trace server at {}: {}", address, e))
            })?;
            if let Some(dir) = &options.app_directory {
                writeln!(stream, "{}", dir.display())?;
            }
            Ok(Box::new(
                StreamLogger::binary(BufWriter::new(stream)).with_segment_capacity(capacity),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_logger_delegates() {
        let mut logger: Box<dyn EventLogger> = Box::new(MemoryLogger::new());
        logger.log_declare(1, "x", ObjectId(1)).unwrap();
        logger.log_return(ObjectId(1)).unwrap();
        assert_eq!(logger.logical_time(), 2);
        assert_eq!(logger.flush_point(), FlushPoint::Pending);
        logger.set_flush_point(3, 9);
        assert_eq!(logger.flush_point(), FlushPoint::Recorded(SourceId::new(3, 9)));
    }

    #[test]
    fn test_source_mapping_fields_in_order() {
        let mut logger = MemoryLogger::new();
        logger.log_source_mapping(5, [1, 2, 3, 4]).unwrap();
        assert_eq!(
            logger.records()[0],
            Record::SourceMapping {
                site: 5,
                start_line: 1,
                start_column: 2,
                end_line: 3,
                end_column: 4
            }
        );
    }

    #[test]
    fn test_open_sink_writes_ascii_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = TraceOptions {
            sync_filesystem_sink: true,
            ascii_encoded_sink: true,
            app_directory: Some(dir.path().to_path_buf()),
            ..TraceOptions::default()
        };
        let mut sink = open_sink(&options).unwrap();
        sink.log_script_exit(4).unwrap();
        sink.end(Box::new(|| {})).unwrap();
        drop(sink);
        let text = std::fs::read_to_string(dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(text, "SCRIPT_EXIT,4\n");
    }

    #[test]
    fn test_open_sink_rejects_ascii_socket() {
        let options = TraceOptions {
            ascii_encoded_sink: true,
            ..TraceOptions::default()
        };
        assert!(matches!(
            open_sink(&options),
            Err(TraceError::UnsupportedConfig(_))
        ));
    }
}
