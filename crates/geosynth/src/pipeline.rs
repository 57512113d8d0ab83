//! Batch driver: parse, classify, then match/derive/synthesize per entity.
//!
//! Per-entity work only reads shared state (template row, anchor set, compiled
//! rules), so it runs on the rayon pool when asked. Output order is always source
//! traversal order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::classify::{Category, Classification, Classifier};
use crate::config::EngineConfig;
use crate::derive::AttributeEngine;
use crate::error::{EngineError, Result};
use crate::length::PathLengthCalculator;
use crate::report::{AnomalyKind, AnomalyReport};
use crate::schema::{ColumnMap, OutputRecord, TemplateRow};
use crate::sink::RecordSink;
use crate::spatial::{build_matcher, NearestNeighbor};
use crate::synth::{BatchContext, EntityFacts, SynthesisProfile, Synthesized, Synthesizer};
use crate::tree::{parse_tree, Folder, GeoEntity, Geometry};

/// Cooperative cancellation flag, checked between entities.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Synthesize entities on the rayon pool.
    pub parallel: bool,
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Apply `work` to `items` until cancelled. Returns the finished prefix in item
    /// order and whether every item finished.
    fn map_prefix<T, R, F>(&self, items: &[T], work: F) -> (Vec<R>, bool)
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let guarded = |item: &T| (!self.cancelled()).then(|| work(item));

        let results: Vec<Option<R>> = if self.parallel {
            items.par_iter().map(guarded).collect()
        } else {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let result = guarded(item);
                let stop = result.is_none();
                out.push(result);
                if stop {
                    break;
                }
            }
            out
        };

        let complete = results.len() == items.len() && results.iter().all(Option::is_some);
        (results.into_iter().map_while(|r| r).collect(), complete)
    }
}

/// A parsed entity with its classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedEntity {
    #[serde(flatten)]
    pub entity: GeoEntity,
    pub classification: Classification,
}

/// Parsed, classified and de-duplicated input, shared by every profile run.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    pub entities: Vec<ClassifiedEntity>,
    /// Anomalies from parsing, classification and de-duplication.
    pub report: AnomalyReport,
}

impl PreparedBatch {
    pub fn iter(&self) -> impl Iterator<Item = (&GeoEntity, &Classification)> {
        self.entities.iter().map(|c| (&c.entity, &c.classification))
    }
}

/// Records for one profile run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub records: Vec<OutputRecord>,
    /// Anomalies raised while synthesizing this profile.
    pub report: AnomalyReport,
    /// `false` when cancelled; `records` then holds the completed prefix.
    pub completed: bool,
}

/// Compiled rules plus the knobs that go with them.
pub struct Engine {
    config: EngineConfig,
    classifier: Classifier,
    attributes: AttributeEngine,
    calculator: PathLengthCalculator,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::new(&config.classification)?;
        let attributes = AttributeEngine::new(&config.derivation)?;
        let calculator = PathLengthCalculator::new(config.length_method);

        debug!(
            "engine ready: {} classification rules, {} derivation rules, {} profiles",
            classifier.len(),
            attributes.len(),
            config.profiles.len()
        );

        Ok(Self {
            config,
            classifier,
            attributes,
            calculator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self, name: &str) -> Result<&SynthesisProfile> {
        self.config.profile(name)
    }

    /// Parse and classify `root`. Fails only when nothing usable was found.
    pub fn prepare(&self, root: &Folder) -> Result<PreparedBatch> {
        let parsed = parse_tree(root);
        let mut report = parsed.report;

        if parsed.entities.is_empty() {
            warn!("input tree yielded no entities ({report})");
            return Err(EngineError::EmptyInput);
        }

        let mut seen = HashSet::new();
        let mut entities = Vec::with_capacity(parsed.entities.len());

        for entity in parsed.entities {
            if !seen.insert(entity.identity_key()) {
                report.record(AnomalyKind::Duplicate);
                debug!("duplicate '{}' in {}; skipped", entity.name, entity.folder_path.join("/"));
                continue;
            }

            let classification = self.classifier.classify(&entity);
            if classification.category == Category::Unclassified {
                report.record(AnomalyKind::Unclassified);
            }
            debug!(
                "'{}' in {} -> {:?} {}",
                entity.name,
                entity.category_hint(),
                classification.category,
                classification.class_str()
            );

            entities.push(ClassifiedEntity {
                entity,
                classification,
            });
        }

        Ok(PreparedBatch { entities, report })
    }

    /// Synthesize one profile's records against a schema and template.
    pub fn synthesize(
        &self,
        batch: &PreparedBatch,
        profile: &str,
        schema: &ColumnMap,
        template: &TemplateRow,
        ctx: &BatchContext,
        options: &RunOptions,
    ) -> Result<BatchOutcome> {
        let profile = self.profile(profile)?;
        let started = Instant::now();

        let matcher: Option<Box<dyn NearestNeighbor>> = profile.anchor.as_ref().map(|filter| {
            let anchors = filter.select(batch.iter());
            debug!("profile '{}': {} anchor candidates", profile.name, anchors.len());
            build_matcher(self.config.matching.kind, anchors, self.config.matching.metric)
        });

        let synth = Synthesizer::new(profile, schema, template, &self.config.unresolved_marker);

        let selected: Vec<&ClassifiedEntity> = batch
            .entities
            .iter()
            .filter(|c| profile.select.matches(&c.entity, &c.classification))
            .collect();

        info!("profile '{}': synthesizing {} entities", profile.name, selected.len());

        let (results, completed) =
            options.map_prefix(&selected, |item| self.synthesize_one(item, matcher.as_deref(), &synth, ctx));

        let mut outcome = BatchOutcome {
            completed,
            ..BatchOutcome::default()
        };

        for (item, synthesized) in selected.iter().zip(results) {
            if synthesized.unresolved {
                outcome.report.record(AnomalyKind::UnresolvedAnchor);
                warn!("'{}': no anchor candidate for profile '{}'", item.entity.name, profile.name);
            }
            outcome.records.push(synthesized.record);
        }

        if outcome.completed {
            info!(
                "profile '{}': {} records in {:.2?}",
                profile.name,
                outcome.records.len(),
                started.elapsed()
            );
        } else {
            warn!(
                "profile '{}': cancelled after {} of {} records",
                profile.name,
                outcome.records.len(),
                selected.len()
            );
        }

        Ok(outcome)
    }

    fn synthesize_one(
        &self,
        item: &ClassifiedEntity,
        matcher: Option<&dyn NearestNeighbor>,
        synth: &Synthesizer<'_>,
        ctx: &BatchContext,
    ) -> Synthesized {
        let entity = &item.entity;

        let nearest = matcher.map(|m| m.nearest(entity.position()));
        let length = match &entity.geometry {
            Geometry::Line(points) => Some(self.calculator.measure(points)),
            Geometry::Point(_) => None,
        };
        let derived = self.attributes.derive(entity, &item.classification);

        synth.synthesize(
            &EntityFacts {
                entity,
                classification: &item.classification,
                derived: &derived,
                nearest: nearest.as_ref(),
                length,
            },
            ctx,
        )
    }

    /// Read schema and template from `sink`, synthesize, and append the records in
    /// one call. The returned report covers the whole batch.
    pub fn run(
        &self,
        batch: &PreparedBatch,
        profile: &str,
        sink: &mut dyn RecordSink,
        ctx: &BatchContext,
        options: &RunOptions,
    ) -> Result<BatchOutcome> {
        let schema = sink.schema()?;
        let template = sink.template(&schema)?;

        let mut outcome = self.synthesize(batch, profile, &schema, &template, ctx, options)?;
        if !outcome.records.is_empty() {
            sink.append(&outcome.records)?;
        }

        let mut report = batch.report.clone();
        report.merge(&outcome.report);
        outcome.report = report;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::tree::Placemark;
    use chrono::NaiveDate;

    fn engine() -> Engine {
        Engine::new(EngineConfig::builtin().unwrap()).unwrap()
    }

    fn ctx() -> BatchContext {
        BatchContext::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn tree() -> Folder {
        Folder::new("doc")
            .with_folder(
                Folder::new("FAT")
                    .with_placemark(Placemark::point("FAT A01", "101.4,0.5"))
                    .with_placemark(Placemark::point("FAT A02", "101.401,0.5"))
                    .with_placemark(Placemark::point("FAT A01", "101.4,0.5")),
            )
            .with_folder(Folder::new("NEW POLE 7-3").with_placemark(Placemark::point("P1", "101.4,0.5001")))
            .with_folder(Folder::new("SKETCHES").with_placemark(Placemark::point("x", "1,1")))
    }

    #[test]
    fn test_prepare_dedupes_and_counts_unclassified() {
        let batch = engine().prepare(&tree()).unwrap();
        assert_eq!(batch.entities.len(), 4);
        assert_eq!(batch.report.count(AnomalyKind::Duplicate), 1);
        assert_eq!(batch.report.count(AnomalyKind::Unclassified), 1);
    }

    #[test]
    fn test_empty_tree_is_fatal() {
        let empty = Folder::new("doc").with_folder(Folder::new("FAT"));
        assert!(matches!(engine().prepare(&empty), Err(EngineError::EmptyInput)));
    }

    #[test]
    fn test_run_appends_once_in_source_order() {
        let engine = engine();
        let batch = engine.prepare(&tree()).unwrap();
        let mut sink = MemorySink::new(["FAT ID", "Parentid 1"]);

        let outcome = engine
            .run(&batch, "fat", &mut sink, &ctx(), &RunOptions::default())
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(sink.appends(), 1);
        assert_eq!(
            sink.rows(),
            &[
                vec!["FAT A01".to_string(), "P1".to_string()],
                vec!["FAT A02".to_string(), "P1".to_string()],
            ]
        );
        assert_eq!(outcome.report.count(AnomalyKind::Duplicate), 1);
    }

    #[test]
    fn test_run_report_counts_unresolved_once() {
        let engine = engine();
        let tree = Folder::new("doc").with_folder(Folder::new("FAT").with_placemark(Placemark::point("FAT B", "1,1")));
        let batch = engine.prepare(&tree).unwrap();
        let mut sink = MemorySink::new(["FAT ID", "Parentid 1"]);

        let outcome = engine
            .run(&batch, "fat", &mut sink, &ctx(), &RunOptions::default())
            .unwrap();

        assert_eq!(outcome.report.count(AnomalyKind::UnresolvedAnchor), 1);
        assert_eq!(outcome.report.total(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let engine = engine();
        let batch = engine.prepare(&tree()).unwrap();
        let schema = ColumnMap::from_headers(["fat id", "latitude", "longitude", "parentid 1"]);
        let template = TemplateRow::empty(schema.width());

        let seq = engine
            .synthesize(&batch, "fat", &schema, &template, &ctx(), &RunOptions::default())
            .unwrap();
        let par = engine
            .synthesize(
                &batch,
                "fat",
                &schema,
                &template,
                &ctx(),
                &RunOptions {
                    parallel: true,
                    cancel: None,
                },
            )
            .unwrap();

        assert_eq!(seq.records, par.records);
    }

    #[test]
    fn test_cancelled_before_start_returns_empty_prefix() {
        let engine = engine();
        let batch = engine.prepare(&tree()).unwrap();
        let schema = ColumnMap::from_headers(["fat id"]);
        let token = CancelToken::new();
        token.cancel();

        let outcome = engine
            .synthesize(
                &batch,
                "fat",
                &schema,
                &TemplateRow::empty(1),
                &ctx(),
                &RunOptions {
                    parallel: false,
                    cancel: Some(token),
                },
            )
            .unwrap();

        assert!(!outcome.completed);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_cancel_mid_batch_keeps_source_prefix() {
        let items: Vec<usize> = (0..64).collect();
        let expected: Vec<usize> = (0..10).map(|i| i * 10).collect();

        // One worker runs a parallel batch left to right, so the stop point is exact.
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        for parallel in [false, true] {
            let token = CancelToken::new();
            let options = RunOptions {
                parallel,
                cancel: Some(token.clone()),
            };

            let (done, complete) = pool.install(|| {
                options.map_prefix(&items, |&i| {
                    if i == 9 {
                        token.cancel();
                    }
                    i * 10
                })
            });

            assert!(!complete, "parallel: {parallel}");
            assert_eq!(done, expected, "parallel: {parallel}");
        }
    }

    #[test]
    fn test_cancel_on_shared_pool_returns_a_prefix() {
        let items: Vec<usize> = (0..256).collect();
        let token = CancelToken::new();
        let options = RunOptions {
            parallel: true,
            cancel: Some(token.clone()),
        };

        let (done, complete) = options.map_prefix(&items, |&i| {
            if i == 3 {
                token.cancel();
            }
            i
        });

        assert!(done.len() <= items.len());
        assert_eq!(done, items[..done.len()]);
        if !complete {
            assert!(done.len() < items.len());
        }
    }

    #[test]
    fn test_missing_anchor_class_is_unresolved() {
        let engine = engine();
        let tree = Folder::new("doc").with_folder(Folder::new("FAT").with_placemark(Placemark::point("FAT B", "1,1")));
        let batch = engine.prepare(&tree).unwrap();
        let schema = ColumnMap::from_headers(["parentid 1"]);

        let outcome = engine
            .synthesize(&batch, "fat", &schema, &TemplateRow::empty(1), &ctx(), &RunOptions::default())
            .unwrap();

        assert_eq!(outcome.records[0].to_strings(), ["UNRESOLVED"]);
        assert_eq!(outcome.report.count(AnomalyKind::UnresolvedAnchor), 1);
    }
}
