//! Per-batch anomaly accounting.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Kinds of non-fatal anomalies seen while processing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Placemark without coordinate text (or a line with no usable points).
    MissingGeometry,
    /// Coordinate text that could not be read as `lon,lat[,alt]`.
    MalformedCoordinates,
    /// Placemark without a name element.
    MissingName,
    /// Folder without a name, relabelled `UNKNOWN`.
    UnnamedFolder,
    /// Line geometry with a single point.
    ShortLine,
    /// No classification rule matched.
    Unclassified,
    /// Same folder path, name and geometry as an earlier entity.
    Duplicate,
    /// Nearest-anchor lookup found no candidate.
    UnresolvedAnchor,
}

impl AnomalyKind {
    /// Human wording used in summaries: "<n> entities <phrase>".
    pub fn phrase(self) -> &'static str {
        match self {
            AnomalyKind::MissingGeometry => "skipped: no geometry",
            AnomalyKind::MalformedCoordinates => "skipped: malformed coordinates",
            AnomalyKind::MissingName => "skipped: no name",
            AnomalyKind::UnnamedFolder => "relabelled: folder without name",
            AnomalyKind::ShortLine => "measured as 0 m: fewer than two points",
            AnomalyKind::Unclassified => "excluded: unclassified",
            AnomalyKind::Duplicate => "skipped: duplicate",
            AnomalyKind::UnresolvedAnchor => "unresolved: no anchor found",
        }
    }
}

/// Counts per anomaly kind, returned alongside every batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyReport {
    counts: BTreeMap<AnomalyKind, usize>,
}

impl AnomalyReport {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, kind: AnomalyKind) {
        self.add(kind, 1);
    }

    pub fn add(&mut self, kind: AnomalyKind, n: usize) {
        if n > 0 {
            *self.counts.entry(kind).or_insert(0) += n;
        }
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn merge(&mut self, other: &AnomalyReport) {
        for (&kind, &n) in &other.counts {
            self.add(kind, n);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AnomalyKind, usize)> + '_ {
        self.counts.iter().map(|(&k, &n)| (k, n))
    }
}

impl fmt::Display for AnomalyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no anomalies");
        }

        let mut first = true;
        for (kind, n) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            first = false;

            let noun = if n == 1 { "entity" } else { "entities" };
            write!(f, "{n} {noun} {}", kind.phrase())?;
        }

        Ok(())
    }
}
