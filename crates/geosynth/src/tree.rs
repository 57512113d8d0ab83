//! Folder/placemark trees and their flattening into [`GeoEntity`] values.
//!
//! The input is an already-decoded tree (see the `kmz2rows` binary for KML decoding).
//! Traversal is depth-first, pre-order, so entity order follows document order.

use log::{debug, warn};
use serde::Serialize;

use crate::geo::LonLat;
use crate::report::{AnomalyKind, AnomalyReport};

/// Label given to folders that carry no usable name.
pub const UNKNOWN_FOLDER: &str = "UNKNOWN";

/// A container node. The root folder's own name is not part of any folder path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Folder {
    pub name: Option<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Folder(Folder),
    Placemark(Placemark),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placemark {
    pub name: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<RawGeometry>,
}

/// Geometry as found in the source: a kind plus the raw coordinate text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGeometry {
    pub kind: GeometryKind,
    pub coordinates: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Line,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            children: Vec::new(),
        }
    }

    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.children.push(Node::Folder(folder));
        self
    }

    pub fn with_placemark(mut self, placemark: Placemark) -> Self {
        self.children.push(Node::Placemark(placemark));
        self
    }
}

impl Placemark {
    pub fn point(name: impl Into<String>, coordinates: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
            geometry: Some(RawGeometry {
                kind: GeometryKind::Point,
                coordinates: coordinates.into(),
            }),
        }
    }

    pub fn line(name: impl Into<String>, coordinates: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
            geometry: Some(RawGeometry {
                kind: GeometryKind::Line,
                coordinates: coordinates.into(),
            }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Parsed geometry of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "lowercase")]
pub enum Geometry {
    Point(LonLat),
    Line(Vec<LonLat>),
}

/// One placemark with usable geometry. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoEntity {
    pub name: String,
    pub description: String,
    pub geometry: Geometry,
    /// Root-to-leaf folder names, upper-cased. Never empty.
    pub folder_path: Vec<String>,
}

/// Identity used to collapse exact duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    folder_path: Vec<String>,
    name: String,
    coordinates: Vec<(u64, u64)>,
}

impl GeoEntity {
    /// Top-level folder, the primary category hint.
    pub fn category_hint(&self) -> &str {
        self.folder_path
            .first()
            .map(String::as_str)
            .unwrap_or(UNKNOWN_FOLDER)
    }

    /// Point position, or the first vertex of a line.
    pub fn position(&self) -> LonLat {
        match &self.geometry {
            Geometry::Point(p) => *p,
            // Lines are never constructed empty.
            Geometry::Line(points) => points[0],
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self.geometry, Geometry::Point(_))
    }

    pub fn identity_key(&self) -> EntityKey {
        let coordinates = match &self.geometry {
            Geometry::Point(p) => vec![(p.lon.to_bits(), p.lat.to_bits())],
            Geometry::Line(points) => points
                .iter()
                .map(|p| (p.lon.to_bits(), p.lat.to_bits()))
                .collect(),
        };

        EntityKey {
            folder_path: self.folder_path.clone(),
            name: self.name.clone(),
            coordinates,
        }
    }
}

/// Output of [`parse_tree`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTree {
    pub entities: Vec<GeoEntity>,
    pub report: AnomalyReport,
}

/// Why a coordinate string could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    /// A `lon,lat` token whose numbers did not parse or were not finite.
    Malformed(String),
}

/// Parse `"<lon>,<lat>[,<alt>]"` tuples separated by whitespace.
///
/// Tokens without a comma are ignored; altitude is dropped.
pub fn parse_coordinates(text: &str) -> Result<Vec<LonLat>, CoordinateError> {
    let mut points = Vec::new();

    for token in text.split_whitespace() {
        if !token.contains(',') {
            continue;
        }

        let mut parts = token.split(',');
        let lon = parts.next().and_then(|s| s.trim().parse::<f64>().ok());
        let lat = parts.next().and_then(|s| s.trim().parse::<f64>().ok());

        match (lon, lat) {
            (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => {
                points.push(LonLat::new(lon, lat));
            }
            _ => return Err(CoordinateError::Malformed(token.to_owned())),
        }
    }

    Ok(points)
}

/// Flatten `root` into entities. Pure: the same tree always yields the same output.
pub fn parse_tree(root: &Folder) -> ParsedTree {
    let mut parsed = ParsedTree::default();
    let mut path = Vec::new();

    walk(&root.children, &mut path, &mut parsed);

    debug!(
        "parsed {} entities ({} anomalies)",
        parsed.entities.len(),
        parsed.report.total()
    );

    parsed
}

fn walk(children: &[Node], path: &mut Vec<String>, out: &mut ParsedTree) {
    for child in children {
        match child {
            Node::Folder(folder) => {
                let label = folder
                    .name
                    .as_deref()
                    .map(|n| n.trim().to_uppercase())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| {
                        out.report.record(AnomalyKind::UnnamedFolder);
                        UNKNOWN_FOLDER.to_owned()
                    });

                path.push(label);
                walk(&folder.children, path, out);
                path.pop();
            }
            Node::Placemark(placemark) => {
                if let Some(entity) = to_entity(placemark, path, &mut out.report) {
                    out.entities.push(entity);
                }
            }
        }
    }
}

fn to_entity(pm: &Placemark, path: &[String], report: &mut AnomalyReport) -> Option<GeoEntity> {
    let Some(name) = pm.name.as_deref().map(str::trim) else {
        report.record(AnomalyKind::MissingName);
        warn!("placemark without name in {}; skipped", path.join("/"));
        return None;
    };

    let Some(raw) = pm.geometry.as_ref().filter(|g| !g.coordinates.trim().is_empty()) else {
        report.record(AnomalyKind::MissingGeometry);
        debug!("placemark '{name}' has no geometry; skipped");
        return None;
    };

    let points = match parse_coordinates(&raw.coordinates) {
        Ok(points) => points,
        Err(CoordinateError::Malformed(token)) => {
            report.record(AnomalyKind::MalformedCoordinates);
            warn!("placemark '{name}': malformed coordinate '{token}'; skipped");
            return None;
        }
    };

    if points.is_empty() {
        report.record(AnomalyKind::MissingGeometry);
        warn!("placemark '{name}': no coordinate pairs; skipped");
        return None;
    }

    let geometry = match raw.kind {
        GeometryKind::Point => Geometry::Point(points[0]),
        GeometryKind::Line => {
            if points.len() < 2 {
                report.record(AnomalyKind::ShortLine);
                warn!("line '{name}' has a single point");
            }
            Geometry::Line(points)
        }
    };

    let folder_path = if path.is_empty() {
        vec![UNKNOWN_FOLDER.to_owned()]
    } else {
        path.to_vec()
    };

    Some(GeoEntity {
        name: name.to_owned(),
        description: pm.description.as_deref().unwrap_or("").trim().to_owned(),
        geometry,
        folder_path,
    })
}
