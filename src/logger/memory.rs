//! In-memory sink

use super::{EventLogger, FlushPoint};
use crate::error::Result;
use crate::logical_clock::LogicalClock;
use crate::record::Record;
use crate::value::{Iid, LogicalTime, ScriptId, SourceId};

/// Sink that keeps every record in memory
///
/// Logical time equals the number of records appended so far.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Vec<Record>,
    clock: LogicalClock,
    flush_point: Option<SourceId>,
    segment_capacity: Option<usize>,
    segment_start: usize,
    segments_flushed: usize,
    stopped: bool,
    ended: bool,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a full segment every `capacity` records
    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.segment_capacity = Some(capacity);
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of segments closed by [`EventLogger::flush_segment`]
    pub fn segments_flushed(&self) -> usize {
        self.segments_flushed
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl EventLogger for MemoryLogger {
    fn append(&mut self, record: Record) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.clock.tick();
        self.records.push(record);
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
        self.segment_capacity
            .is_some_and(|capacity| self.records.len() - self.segment_start >= capacity)
    }

    fn flush_segment(&mut self) -> Result<()> {
        if let Some(site) = self.flush_point.take() {
            self.append(Record::TopLevelFlush { site })?;
        }
        self.segment_start = self.records.len();
        self.segments_flushed += 1;
        Ok(())
    }

    fn end(&mut self, on_complete: Box<dyn FnOnce()>) -> Result<()> {
        self.ended = true;
        on_complete();
        Ok(())
    }

    fn stop_tracing(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectId;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_time_counts_records() {
        let mut logger = MemoryLogger::new();
        assert_eq!(logger.logical_time(), 0);
        logger.log_function_exit(1).unwrap();
        logger.log_function_exit(2).unwrap();
        assert_eq!(logger.logical_time(), 2);
        assert_eq!(logger.records().len(), 2);
    }

    #[test]
    fn test_stopped_logger_drops_records() {
        let mut logger = MemoryLogger::new();
        logger.stop_tracing();
        logger.log_return(ObjectId(1)).unwrap();
        assert!(logger.records().is_empty());
        assert!(logger.is_stopped());
    }

    #[test]
    fn test_segment_capacity_and_flush() {
        let mut logger = MemoryLogger::new().with_segment_capacity(2);
        logger.log_return(ObjectId(1)).unwrap();
        assert!(!logger.segment_full());
        logger.log_return(ObjectId(2)).unwrap();
        assert!(logger.segment_full());

        logger.set_flush_point(1, 40);
        logger.flush_segment().unwrap();
        assert_eq!(
            logger.records().last(),
            Some(&Record::TopLevelFlush {
                site: SourceId::new(1, 40)
            })
        );
        assert_eq!(logger.flush_point(), FlushPoint::Pending);
        assert!(!logger.segment_full());
        assert_eq!(logger.segments_flushed(), 1);
    }

    #[test]
    fn test_end_invokes_callback() {
        let mut logger = MemoryLogger::new();
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        logger.end(Box::new(move || flag.set(true))).unwrap();
        assert!(done.get());
        assert!(logger.is_ended());
    }
}
