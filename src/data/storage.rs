//! Log sinks for displacement records.
//!
//! Every record is written and flushed before the next iteration starts, so a run that
//! dies part-way still leaves every completed record on disk.
use crate::{
    error::AppResult,
    measurement::{DisplacementRecord, PositionSample},
};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Header row of the displacement log.
pub const CSV_HEADER: [&str; 3] = ["Voltage", "Distance", ""];

/// Destination for displacement records, appended in iteration order.
pub trait RecordSink {
    /// Write one record. Records reach the sink in iteration order.
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()>;

    /// Diagnostic reading taken after the actuator was stopped.
    fn final_position(
        &mut self,
        _final_position: &PositionSample,
        _last_polled: &PositionSample,
    ) -> AppResult<()> {
        Ok(())
    }

    /// Flush and release. Called exactly once.
    fn close(&mut self) -> AppResult<()>;
}

impl<T: RecordSink + ?Sized> RecordSink for Box<T> {
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()> {
        (**self).append(record)
    }

    fn final_position(
        &mut self,
        final_position: &PositionSample,
        last_polled: &PositionSample,
    ) -> AppResult<()> {
        (**self).final_position(final_position, last_polled)
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }
}

// ============================================================================
// CSV Writer
// ============================================================================

/// Delimited log: `Voltage,Distance,` header, then `<voltage>,<distance>,` per record.
pub struct CsvWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvWriter {
    /// Create (or truncate) the log at `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        tracing::info!("CSV Writer initialized at '{}'.", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvWriter {
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(&[
                format!("{:.6}", record.voltage.0),
                record.displacement.to_string(),
                String::new(),
            ])?;
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        tracing::info!("CSV Writer shut down.");
        Ok(())
    }
}

// ============================================================================
// Console Trace
// ============================================================================

/// Live `<voltage>, <distance>` trace for watching a run. Not machine-parsed.
pub struct ConsoleTrace<W: Write> {
    out: W,
}

impl ConsoleTrace<io::Stdout> {
    /// Trace to standard output.
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleTrace<W> {
    /// Trace to any writer.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for ConsoleTrace<W> {
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()> {
        writeln!(self.out, "{}, {}", record.voltage, record.displacement)?;
        Ok(())
    }

    fn final_position(
        &mut self,
        final_position: &PositionSample,
        last_polled: &PositionSample,
    ) -> AppResult<()> {
        writeln!(self.out, "*{},{}", final_position.ticks, last_polled.ticks)?;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ============================================================================
// Tee
// ============================================================================

/// Forwards every call to two sinks, primary first.
pub struct TeeSink<A, B> {
    primary: A,
    secondary: B,
}

impl<A: RecordSink, B: RecordSink> TeeSink<A, B> {
    /// Combine two sinks.
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: RecordSink, B: RecordSink> RecordSink for TeeSink<A, B> {
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()> {
        self.primary.append(record)?;
        self.secondary.append(record)
    }

    fn final_position(
        &mut self,
        final_position: &PositionSample,
        last_polled: &PositionSample,
    ) -> AppResult<()> {
        self.primary.final_position(final_position, last_polled)?;
        self.secondary.final_position(final_position, last_polled)
    }

    /// Closes both sinks even if the first one fails.
    fn close(&mut self) -> AppResult<()> {
        let primary = self.primary.close();
        let secondary = self.secondary.close();
        primary.and(secondary)
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// What a [`MemorySink`] has received so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkContents {
    /// Appended records, in order
    pub records: Vec<DisplacementRecord>,
    /// `(final, last polled)` when a final reading was reported
    pub final_position: Option<(PositionSample, PositionSample)>,
    /// Number of `close` calls
    pub closes: usize,
}

/// In-memory sink whose contents stay observable through a shared handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    contents: Arc<Mutex<SinkContents>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn contents(&self) -> SinkContents {
        self.contents.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &DisplacementRecord) -> AppResult<()> {
        self.contents.lock().records.push(*record);
        Ok(())
    }

    fn final_position(
        &mut self,
        final_position: &PositionSample,
        last_polled: &PositionSample,
    ) -> AppResult<()> {
        self.contents.lock().final_position = Some((*final_position, *last_polled));
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.contents.lock().closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{ChannelId, VoltageSample};

    fn record(voltage: f64, displacement: i64) -> DisplacementRecord {
        DisplacementRecord {
            voltage: VoltageSample(voltage),
            displacement,
        }
    }

    #[test]
    fn csv_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voltages.csv");

        let mut writer = CsvWriter::create(&path).unwrap();
        writer.append(&record(0.5, 7_000_000)).unwrap();
        writer.append(&record(1.25, 14_000_000)).unwrap();
        writer.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "Voltage,Distance,\n0.500000,7000000,\n1.250000,14000000,\n"
        );
    }

    #[test]
    fn csv_rows_are_on_disk_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.csv");

        let mut writer = CsvWriter::create(&path).unwrap();
        writer.append(&record(2.0, 1)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(writer.path(), path.as_path());
    }

    #[test]
    fn console_trace_format() {
        let mut trace = ConsoleTrace::new(Vec::new());
        trace.append(&record(0.5, -3)).unwrap();
        let sample = |ticks| PositionSample {
            channel: ChannelId(0),
            ticks,
        };
        trace.final_position(&sample(-21), &sample(-20)).unwrap();
        trace.close().unwrap();

        let text = String::from_utf8(trace.into_inner()).unwrap();
        assert_eq!(text, "0.5, -3\n*-21,-20\n");
    }

    #[test]
    fn tee_forwards_to_both_and_closes_both() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let mut tee = TeeSink::new(a.clone(), b.clone());

        tee.append(&record(1.0, 2)).unwrap();
        tee.close().unwrap();

        for sink in [a, b] {
            let contents = sink.contents();
            assert_eq!(contents.records, vec![record(1.0, 2)]);
            assert_eq!(contents.closes, 1);
        }
    }
}
