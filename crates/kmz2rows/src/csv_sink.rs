//! A CSV file used as an append-only sheet.
//!
//! Row 1 is the header. The template is the last row with any non-empty cell.
//! Appends go to the end of the file in a single write.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use geosynth::error::{EngineError, Result};
use geosynth::{ColumnMap, OutputRecord, RecordSink, TemplateRow};

pub struct CsvSheet {
    path: PathBuf,
    rows: Option<Vec<Vec<String>>>,
}

fn sink_error(path: &Path, err: csv::Error) -> EngineError {
    EngineError::Sink(format!("{}: {err}", path.display()))
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rows(&mut self) -> Result<&[Vec<String>]> {
        if self.rows.is_none() {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&self.path)
                .map_err(|e| sink_error(&self.path, e))?;

            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| sink_error(&self.path, e))?;
                rows.push(record.iter().map(str::to_owned).collect());
            }
            self.rows = Some(rows);
        }

        Ok(self.rows.as_deref().unwrap_or_default())
    }

    /// Render `records` as CSV text.
    fn encode(&self, records: &[OutputRecord]) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        for record in records {
            writer
                .write_record(record.to_strings())
                .map_err(|e| sink_error(&self.path, e))?;
        }

        writer
            .into_inner()
            .map_err(|e| EngineError::Sink(format!("{}: {e}", self.path.display())))
    }
}

impl RecordSink for CsvSheet {
    fn schema(&mut self) -> Result<ColumnMap> {
        let path = self.path.clone();
        let header = self
            .rows()?
            .first()
            .ok_or_else(|| EngineError::Sink(format!("{}: no header row", path.display())))?;

        Ok(ColumnMap::from_headers(header))
    }

    fn template(&mut self, schema: &ColumnMap) -> Result<TemplateRow> {
        let rows = self.rows()?;
        Ok(TemplateRow::latest_non_empty(rows.get(1..).unwrap_or_default(), schema.width()))
    }

    fn append(&mut self, records: &[OutputRecord]) -> Result<usize> {
        let mut bytes = self.encode(records)?;

        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                bytes.insert(0, b'\n');
            }
        }

        file.write_all(&bytes)?;
        file.flush()?;

        // Later reads see the appended rows.
        self.rows = None;
        Ok(records.len())
    }
}

/// Create `path` with a header row if it does not exist yet.
pub fn ensure_sheet(path: &Path, header: &[&str]) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| sink_error(path, e))?;
    writer.write_record(header).map_err(|e| sink_error(path, e))?;
    writer.flush()?;
    Ok(())
}
