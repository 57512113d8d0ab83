//! geosynth: turns folder/placemark geo trees into fixed-schema sheet rows.
//!
//! Stages, leaves first:
//!   tree      : flatten a decoded folder tree into `GeoEntity` values (pre-order)
//!   classify  : ordered folder/name rules -> `Category` + class tag
//!   spatial   : nearest anchor (pole) per point, linear scan or R-tree
//!   length    : geodesic path length of lines (haversine / Vincenty)
//!   derive    : regex and lookup rules -> coded attributes
//!   synth     : computed -> carry-forward -> empty, per output column
//!   pipeline  : batch driver with anomaly report, cancellation, optional rayon
//!
//! Rule tables and output profiles are data (`config`, `rules/default.json`).
//! No file or archive I/O happens here; sinks implement [`sink::RecordSink`].

pub mod classify;
pub mod config;
pub mod derive;
pub mod error;
pub mod geo;
pub mod length;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod sink;
pub mod spatial;
pub mod synth;
pub mod tree;

pub use classify::{Category, Classification, Classifier};
pub use config::EngineConfig;
pub use derive::{AttributeEngine, DerivedAttributes};
pub use error::{EngineError, Result};
pub use geo::{GeodesicMethod, LonLat};
pub use length::{PathLength, PathLengthCalculator};
pub use pipeline::{BatchOutcome, CancelToken, ClassifiedEntity, Engine, PreparedBatch, RunOptions};
pub use report::{AnomalyKind, AnomalyReport};
pub use schema::{Cell, ColumnMap, DateFormat, OutputRecord, TemplateRow};
pub use sink::{MemorySink, RecordSink};
pub use spatial::{Anchor, NearestMatch, NearestNeighbor};
pub use synth::{BatchContext, SynthesisProfile};
pub use tree::{parse_tree, Folder, GeoEntity, Geometry, Node, Placemark};
