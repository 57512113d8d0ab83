//! Output schema: column-name map, typed cells, records and the template row.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The two date layouts accepted by downstream sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// `15/03/2024`
    DayMonthYear,
    /// `2024-03-15`
    #[default]
    YearMonthDay,
}

impl DateFormat {
    pub fn pattern(self) -> &'static str {
        match self {
            DateFormat::DayMonthYear => "%d/%m/%Y",
            DateFormat::YearMonthDay => "%Y-%m-%d",
        }
    }

    pub fn format(self, date: NaiveDate) -> String {
        date.format(self.pattern()).to_string()
    }

    /// Guess the layout of an existing cell.
    ///
    /// Two slashes mean day/month/year; a dash means year-month-day. Anything else
    /// (including an empty cell) is not recognised.
    pub fn sniff(sample: &str) -> Option<DateFormat> {
        let sample = sample.trim();
        if sample.matches('/').count() == 2 {
            Some(DateFormat::DayMonthYear)
        } else if sample.contains('-') {
            Some(DateFormat::YearMonthDay)
        } else {
            None
        }
    }
}

/// One typed output value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    /// A number written with a fixed count of decimals.
    Fixed(f64, usize),
    Date(NaiveDate, DateFormat),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Fixed(n, places) => write!(f, "{n:.places$}"),
            Cell::Date(date, format) => write!(f, "{}", date.format(format.pattern())),
        }
    }
}

/// Column name to position, discovered from the sink's header row.
///
/// Names are trimmed and lower-cased; when a name repeats, the first position wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    positions: HashMap<String, usize>,
    width: usize,
}

#[inline]
fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ColumnMap {
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut positions = HashMap::new();
        let mut width = 0;

        for (i, name) in headers.into_iter().enumerate() {
            width = i + 1;
            let key = normalize(name.as_ref());
            if !key.is_empty() {
                positions.entry(key).or_insert(i);
            }
        }

        Self { positions, width }
    }

    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.positions.get(&normalize(name)).copied()
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// A schema-width row of cells, built fresh per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    cells: Vec<Cell>,
}

impl OutputRecord {
    pub fn new(width: usize) -> Self {
        Self {
            cells: vec![Cell::Empty; width],
        }
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub(crate) fn set(&mut self, index: usize, cell: Cell) {
        if let Some(slot) = self.cells.get_mut(index) {
            *slot = cell;
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Rendered cell texts, the form sinks write.
    pub fn to_strings(&self) -> Vec<String> {
        self.cells.iter().map(Cell::to_string).collect()
    }
}

/// The most recent non-empty row already in the sink. Read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRow {
    cells: Vec<String>,
}

impl TemplateRow {
    /// Row of `width` empty cells, used when the sink holds no data yet.
    pub fn empty(width: usize) -> Self {
        Self {
            cells: vec![String::new(); width],
        }
    }

    /// Wrap `cells`, padded or truncated to `width`.
    pub fn new(mut cells: Vec<String>, width: usize) -> Self {
        cells.resize(width, String::new());
        Self { cells }
    }

    /// Pick the last row with any non-empty cell among `rows` (data rows only).
    pub fn latest_non_empty(rows: &[Vec<String>], width: usize) -> Self {
        rows.iter()
            .rev()
            .find(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|row| Self::new(row.clone(), width))
            .unwrap_or_else(|| Self::empty(width))
    }

    pub fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}
