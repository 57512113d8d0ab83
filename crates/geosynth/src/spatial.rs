//! Nearest-anchor lookup.
//!
//! Candidate sets are small (tens to low hundreds of poles per archive), so the
//! default is a linear scan. [`RTreeMatcher`] implements the same trait for larger
//! sets; call sites only see [`NearestNeighbor`].
//!
//! Ranking on squared raw-degree distance ([`DistanceMetric::PlanarSquared`]) is an
//! approximation: it ignores meridian convergence. Over the sub-kilometer radii of
//! last-mile networks it ranks candidates the same way a geodesic does; use one of the
//! geodesic metrics when anchors can be far apart or far from the equator.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::classify::{Category, Classification};
use crate::geo::{GeodesicMethod, LonLat};
use crate::tree::GeoEntity;

/// Relative tolerance under which two distances count as equal.
const TIE_RELATIVE: f64 = 1e-12;

/// A candidate reference point, e.g. a pole.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub id: String,
    pub position: LonLat,
}

/// Result of a nearest-anchor query.
#[derive(Debug, Clone, PartialEq)]
pub enum NearestMatch {
    /// Closest candidate and its distance in the matcher's metric.
    Found { id: String, distance: f64 },
    /// The candidate set was empty; never conflated with an empty id.
    NoCandidates,
}

impl NearestMatch {
    pub fn id(&self) -> Option<&str> {
        match self {
            NearestMatch::Found { id, .. } => Some(id),
            NearestMatch::NoCandidates => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, NearestMatch::Found { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared euclidean distance on raw lon/lat degrees.
    #[default]
    PlanarSquared,
    Haversine,
    Vincenty,
}

impl DistanceMetric {
    #[inline]
    pub fn distance(self, a: LonLat, b: LonLat) -> f64 {
        match self {
            DistanceMetric::PlanarSquared => a.planar_sq(&b),
            DistanceMetric::Haversine => GeodesicMethod::Haversine.distance_m(a, b),
            DistanceMetric::Vincenty => GeodesicMethod::Vincenty.distance_m(a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    #[default]
    Linear,
    Rtree,
}

/// Nearest-candidate search over a fixed, read-only anchor set.
pub trait NearestNeighbor: Send + Sync {
    /// Closest anchor to `query`. Ties within floating-point tolerance go to the
    /// anchor that comes first in the candidate list.
    fn nearest(&self, query: LonLat) -> NearestMatch;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn strictly_closer(d: f64, best: f64) -> bool {
    d < best - best.abs() * TIE_RELATIVE
}

/// Brute-force scan, O(n) per query.
#[derive(Debug, Clone, Default)]
pub struct LinearScan {
    anchors: Vec<Anchor>,
    metric: DistanceMetric,
}

impl LinearScan {
    pub fn new(anchors: Vec<Anchor>, metric: DistanceMetric) -> Self {
        Self { anchors, metric }
    }
}

impl NearestNeighbor for LinearScan {
    fn nearest(&self, query: LonLat) -> NearestMatch {
        let mut best: Option<(&Anchor, f64)> = None;

        for anchor in &self.anchors {
            let d = self.metric.distance(query, anchor.position);
            match best {
                Some((_, best_d)) if !strictly_closer(d, best_d) => {}
                _ => best = Some((anchor, d)),
            }
        }

        match best {
            Some((anchor, distance)) => NearestMatch::Found {
                id: anchor.id.clone(),
                distance,
            },
            None => NearestMatch::NoCandidates,
        }
    }

    fn len(&self) -> usize {
        self.anchors.len()
    }
}

#[derive(Clone, Debug)]
struct IndexedAnchor {
    order: usize,
    point: [f64; 2],
}

impl RTreeObject for IndexedAnchor {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for IndexedAnchor {
    #[inline]
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

/// R-tree backed matcher. Ranks on planar degrees; the reported distance uses the
/// configured metric.
pub struct RTreeMatcher {
    tree: RTree<IndexedAnchor>,
    anchors: Vec<Anchor>,
    metric: DistanceMetric,
}

impl RTreeMatcher {
    pub fn new(anchors: Vec<Anchor>, metric: DistanceMetric) -> Self {
        let items = anchors
            .iter()
            .enumerate()
            .map(|(order, a)| IndexedAnchor {
                order,
                point: [a.position.lon, a.position.lat],
            })
            .collect();

        Self {
            tree: RTree::bulk_load(items),
            anchors,
            metric,
        }
    }
}

impl NearestNeighbor for RTreeMatcher {
    fn nearest(&self, query: LonLat) -> NearestMatch {
        let mut hits = self
            .tree
            .nearest_neighbor_iter_with_distance_2(&[query.lon, query.lat]);

        let Some((first, best)) = hits.next() else {
            return NearestMatch::NoCandidates;
        };

        // Hits arrive in increasing distance; among the tied prefix keep input order.
        let winner = hits
            .take_while(|(_, d)| !strictly_closer(best, *d))
            .fold(first, |w, (hit, _)| if hit.order < w.order { hit } else { w });

        let anchor = &self.anchors[winner.order];
        NearestMatch::Found {
            id: anchor.id.clone(),
            distance: self.metric.distance(query, anchor.position),
        }
    }

    fn len(&self) -> usize {
        self.anchors.len()
    }
}

/// Build a matcher of the requested kind.
pub fn build_matcher(
    kind: MatcherKind,
    anchors: Vec<Anchor>,
    metric: DistanceMetric,
) -> Box<dyn NearestNeighbor> {
    match kind {
        MatcherKind::Linear => Box::new(LinearScan::new(anchors, metric)),
        MatcherKind::Rtree => Box::new(RTreeMatcher::new(anchors, metric)),
    }
}

/// One accepted anchor category and the class tags allowed within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorClause {
    pub category: Category,
    /// Accepted class tags; empty accepts any class, including none.
    #[serde(default)]
    pub classes: Vec<String>,
}

impl AnchorClause {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            classes: Vec::new(),
        }
    }

    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, c: &Classification) -> bool {
        c.category == self.category
            && (self.classes.is_empty()
                || c
                    .class
                    .as_deref()
                    .is_some_and(|tag| self.classes.iter().any(|k| k.eq_ignore_ascii_case(tag))))
    }
}

/// Which classified entities are eligible anchors.
///
/// An entity is eligible when any clause accepts it. Without clauses every
/// anchor category qualifies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorFilter {
    #[serde(default)]
    pub accept: Vec<AnchorClause>,
}

impl AnchorFilter {
    pub fn new(accept: Vec<AnchorClause>) -> Self {
        Self { accept }
    }

    pub fn accepts(&self, c: &Classification) -> bool {
        if self.accept.is_empty() {
            return c.category.is_anchor();
        }

        self.accept.iter().any(|clause| clause.accepts(c))
    }

    /// Point entities passing the filter, in source order.
    pub fn select<'a, I>(&self, classified: I) -> Vec<Anchor>
    where
        I: IntoIterator<Item = (&'a GeoEntity, &'a Classification)>,
    {
        classified
            .into_iter()
            .filter(|(e, c)| e.is_point() && self.accepts(c))
            .map(|(e, _)| Anchor {
                id: e.name.clone(),
                position: e.position(),
            })
            .collect()
    }
}
