//! Streaming sinks: ascii lines or MessagePack values over any `Write`

use super::{EventLogger, FlushPoint, DEFAULT_SEGMENT_CAPACITY};
use crate::error::Result;
use crate::logical_clock::LogicalClock;
use crate::record::Record;
use crate::value::{Iid, LogicalTime, ScriptId, SourceId};
use std::io::{BufRead, BufReader, Read, Write};

/// Wire encoding of a [`StreamLogger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One comma-separated line per record
    Ascii,
    /// One self-describing MessagePack value per record
    Binary,
}

/// Sink that encodes records into a segment buffer and writes whole
/// segments to `W`
pub struct StreamLogger<W: Write> {
    writer: W,
    encoding: Encoding,
    buffer: Vec<u8>,
    clock: LogicalClock,
    flush_point: Option<SourceId>,
    segment_capacity: usize,
    segment_records: usize,
    stopped: bool,
}

impl<W: Write> StreamLogger<W> {
    pub fn new(writer: W, encoding: Encoding) -> Self {
        Self {
            writer,
            encoding,
            buffer: Vec::new(),
            clock: LogicalClock::new(),
            flush_point: None,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            segment_records: 0,
            stopped: false,
        }
    }

    pub fn ascii(writer: W) -> Self {
        Self::new(writer, Encoding::Ascii)
    }

    pub fn binary(writer: W) -> Self {
        Self::new(writer, Encoding::Binary)
    }

    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.segment_capacity = capacity.max(1);
        self
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Bytes encoded but not yet written
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Recover the writer; buffered records that were never flushed are lost
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_buffer(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        self.writer.flush()?;
        self.segment_records = 0;
        Ok(())
    }
}

impl<W: Write> EventLogger for StreamLogger<W> {
    fn append(&mut self, record: Record) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        match self.encoding {
            Encoding::Ascii => writeln!(self.buffer, "{}", record)?,
            Encoding::Binary => rmp_serde::encode::write_named(&mut self.buffer, &record)?,
        }
        self.clock.tick();
        self.segment_records += 1;
        Ok(())
    }

    fn logical_time(&self) -> LogicalTime {
        self.clock.now()
    }

    fn flush_point(&self) -> FlushPoint {
        match self.flush_point {
            Some(site) => FlushPoint::Recorded(site),
            None => FlushPoint::Pending,
        }
    }

    fn set_flush_point(&mut self, script_id: ScriptId, site: Iid) {
        self.flush_point = Some(SourceId::new(script_id, site));
    }

    fn segment_full(&self) -> bool {
        self.segment_records >= self.segment_capacity
    }

    fn flush_segment(&mut self) -> Result<()> {
        if let Some(site) = self.flush_point.take() {
            self.append(Record::TopLevelFlush { site })?;
        }
        tracing::debug!(bytes = self.buffer.len(), "writing trace segment");
        self.write_buffer()
    }

    fn end(&mut self, on_complete: Box<dyn FnOnce()>) -> Result<()> {
        self.write_buffer()?;
        on_complete();
        Ok(())
    }

    fn stop_tracing(&mut self) {
        if self.stopped {
            return;
        }
        // records appended before the stop still reach the writer
        if let Err(err) = self.write_buffer() {
            tracing::warn!(%err, "failed to write trace segment on stop");
        }
        self.stopped = true;
    }
}

/// Decode a binary trace written by a [`StreamLogger`] with
/// [`Encoding::Binary`]
pub fn decode_trace<R: Read>(reader: R) -> Result<Vec<Record>> {
    let mut reader = BufReader::new(reader);
    let mut records = Vec::new();
    while !reader.fill_buf()?.is_empty() {
        let record: Record = rmp_serde::from_read(&mut reader)?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FreeVars, ObjectId};

    fn sample_records() -> Vec<Record> {
        vec![
            Record::ScriptEnter {
                site: 1,
                script_id: 7,
                file_name: "app.js".into(),
            },
            Record::CreateObj {
                site: SourceId::new(7, 12),
                id: ObjectId(1),
            },
            Record::Declare {
                site: 12,
                name: "x".into(),
                id: ObjectId(1),
            },
            Record::FreeVars {
                site: 20,
                names: FreeVars::Any,
            },
            Record::Call {
                site: 3,
                callee_id: None,
                enter_site: 9,
                stable_id: 7,
            },
        ]
    }

    #[test]
    fn test_ascii_lines() {
        let mut logger = StreamLogger::ascii(Vec::new());
        for rec in sample_records().into_iter().take(3) {
            logger.append(rec).unwrap();
        }
        logger.end(Box::new(|| {})).unwrap();
        let text = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(
            text,
            "SCRIPT_ENTER,1,7,app.js\nCREATE_OBJ,7:12,1\nDECLARE,12,x,1\n"
        );
    }

    #[test]
    fn test_binary_decodes_back() {
        let mut logger = StreamLogger::binary(Vec::new());
        for rec in sample_records() {
            logger.append(rec).unwrap();
        }
        logger.end(Box::new(|| {})).unwrap();
        let bytes = logger.into_inner();
        let decoded = decode_trace(bytes.as_slice()).unwrap();
        assert_eq!(decoded, sample_records());
    }

    #[test]
    fn test_nothing_written_before_segment_flush() {
        let mut logger = StreamLogger::ascii(Vec::new()).with_segment_capacity(2);
        logger.log_return(ObjectId(1)).unwrap();
        assert!(logger.buffered_len() > 0);
        assert!(!logger.segment_full());
        logger.log_return(ObjectId(2)).unwrap();
        assert!(logger.segment_full());

        logger.set_flush_point(1, 5);
        logger.flush_segment().unwrap();
        assert_eq!(logger.buffered_len(), 0);
        assert!(!logger.segment_full());
        assert_eq!(logger.flush_point(), FlushPoint::Pending);
        let text = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(text, "RETURN,1\nRETURN,2\nTOP_LEVEL_FLUSH,1:5\n");
    }

    #[test]
    fn test_stopped_stream_drops_records() {
        let mut logger = StreamLogger::ascii(Vec::new());
        logger.log_return(ObjectId(1)).unwrap();
        logger.stop_tracing();
        logger.log_return(ObjectId(2)).unwrap();
        assert_eq!(logger.logical_time(), 1);
    }

    #[test]
    fn test_stop_writes_pending_segment() {
        let mut logger = StreamLogger::ascii(Vec::new());
        logger.log_return(ObjectId(1)).unwrap();
        logger.stop_tracing();
        logger.log_return(ObjectId(2)).unwrap();
        assert_eq!(logger.buffered_len(), 0);
        let text = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(text, "RETURN,1\n");
    }

    #[test]
    fn test_decode_empty_trace() {
        let decoded = decode_trace(&[][..]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_truncated_trace_fails() {
        let mut logger = StreamLogger::binary(Vec::new());
        logger.log_declare(1, "long_name", ObjectId(3)).unwrap();
        logger.end(Box::new(|| {})).unwrap();
        let mut bytes = logger.into_inner();
        bytes.truncate(bytes.len() - 2);
        assert!(decode_trace(bytes.as_slice()).is_err());
    }
}
