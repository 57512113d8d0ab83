//! The boundary to the downstream record store.

use crate::error::{EngineError, Result};
use crate::schema::{ColumnMap, OutputRecord, TemplateRow};

/// An append-only destination for synthesized rows.
///
/// `schema` and `template` are read once before a batch; `append` is called at most
/// once per batch with every record. Retries are the caller's business.
pub trait RecordSink {
    fn schema(&mut self) -> Result<ColumnMap>;

    fn template(&mut self, schema: &ColumnMap) -> Result<TemplateRow>;

    fn append(&mut self, records: &[OutputRecord]) -> Result<usize>;
}

/// Header plus rendered rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    appends: usize,
}

impl MemorySink {
    pub fn new<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            appends: 0,
        }
    }

    pub fn with_row<I, S>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of `append` calls so far.
    pub fn appends(&self) -> usize {
        self.appends
    }
}

impl RecordSink for MemorySink {
    fn schema(&mut self) -> Result<ColumnMap> {
        if self.header.is_empty() {
            return Err(EngineError::Sink("sink has no header row".into()));
        }
        Ok(ColumnMap::from_headers(&self.header))
    }

    fn template(&mut self, schema: &ColumnMap) -> Result<TemplateRow> {
        Ok(TemplateRow::latest_non_empty(&self.rows, schema.width()))
    }

    fn append(&mut self, records: &[OutputRecord]) -> Result<usize> {
        self.appends += 1;
        self.rows.extend(records.iter().map(OutputRecord::to_strings));
        Ok(records.len())
    }
}
