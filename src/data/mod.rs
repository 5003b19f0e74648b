//! Persistence of the displacement log.

pub mod storage;

pub use storage::{ConsoleTrace, CsvWriter, MemorySink, RecordSink, TeeSink};
