//! Record synthesis: one schema-width row per classified entity.
//!
//! Each column is filled from the first tier that supplies a value:
//!
//! 1. a value computed for this entity (identity, coordinates, derived attributes,
//!    nearest anchor, today's date, batch context);
//! 2. the template row's cell, for columns the profile lists as carry-forward;
//! 3. empty.
//!
//! Profile columns are resolved against the discovered schema once per batch.
//! Columns the schema lacks are skipped.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::classify::{Category, Classification};
use crate::derive::DerivedAttributes;
use crate::length::PathLength;
use crate::schema::{Cell, ColumnMap, DateFormat, OutputRecord, TemplateRow};
use crate::spatial::{AnchorFilter, NearestMatch};
use crate::tree::{Geometry, GeoEntity};

/// Operator-supplied values and the batch date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    values: BTreeMap<String, String>,
    today: NaiveDate,
}

impl BatchContext {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            values: BTreeMap::new(),
            today,
        }
    }

    /// Context dated with the local clock.
    pub fn today() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn date(&self) -> NaiveDate {
        self.today
    }
}

/// Where a column's computed value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "from", content = "value", rename_all = "snake_case")]
pub enum FieldSource {
    Name,
    Description,
    Latitude,
    Longitude,
    /// Path length in meters, rounded to centimeters. Lines only.
    Length,
    /// A derived attribute by field name.
    Derived(String),
    NearestAnchor,
    /// Batch date in the sniffed format.
    Today,
    /// Year of the batch date.
    Year,
    /// A batch-context value by key.
    Context(String),
    Literal(String),
    /// The classification's class tag.
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ColumnRule {
    pub column: String,
    pub value: FieldSource,
    #[serde(default)]
    pub uppercase: bool,
}

/// Which entities a profile synthesizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntitySelector {
    #[serde(default)]
    pub categories: Vec<Category>,
    /// Accepted class tags, compared case-insensitively; empty accepts any.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Top-level folder prefixes; empty accepts any.
    #[serde(default)]
    pub folders: Vec<String>,
}

impl EntitySelector {
    pub fn matches(&self, entity: &GeoEntity, c: &Classification) -> bool {
        let category_ok = self.categories.is_empty() || self.categories.contains(&c.category);

        let class_ok = self.classes.is_empty()
            || c
                .class
                .as_deref()
                .is_some_and(|tag| self.classes.iter().any(|k| k.eq_ignore_ascii_case(tag)));

        let folder = entity.category_hint();
        let folder_ok = self.folders.is_empty()
            || self
                .folders
                .iter()
                .any(|f| folder.starts_with(&f.trim().to_uppercase()));

        category_ok && class_ok && folder_ok && c.category != Category::Unclassified
    }
}

/// A named output layout: which entities, which columns, which defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SynthesisProfile {
    pub name: String,
    pub select: EntitySelector,
    /// Anchors for [`FieldSource::NearestAnchor`] columns.
    #[serde(default)]
    pub anchor: Option<AnchorFilter>,
    pub columns: Vec<ColumnRule>,
    #[serde(default)]
    pub carry_forward: Vec<String>,
    /// Column whose template cell decides the date layout.
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default)]
    pub date_fallback: DateFormat,
}

/// Everything known about one entity at synthesis time.
#[derive(Debug, Clone, Copy)]
pub struct EntityFacts<'a> {
    pub entity: &'a GeoEntity,
    pub classification: &'a Classification,
    pub derived: &'a DerivedAttributes,
    /// `None` when the profile has no anchor set.
    pub nearest: Option<&'a NearestMatch>,
    /// `None` for points.
    pub length: Option<PathLength>,
}

/// One synthesized row.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub record: OutputRecord,
    /// An anchor column was written with the unresolved marker.
    pub unresolved: bool,
}

/// A profile bound to a concrete schema and template for one batch.
#[derive(Debug)]
pub struct Synthesizer<'a> {
    columns: Vec<(usize, &'a ColumnRule)>,
    carry_forward: Vec<usize>,
    template: &'a TemplateRow,
    width: usize,
    date_format: DateFormat,
    unresolved_marker: &'a str,
}

impl<'a> Synthesizer<'a> {
    pub fn new(
        profile: &'a SynthesisProfile,
        schema: &ColumnMap,
        template: &'a TemplateRow,
        unresolved_marker: &'a str,
    ) -> Self {
        let resolve = |column: &str| {
            let index = schema.resolve(column);
            if index.is_none() {
                debug!("profile '{}': schema has no column '{column}'; skipped", profile.name);
            }
            index
        };

        let columns = profile
            .columns
            .iter()
            .filter_map(|rule| resolve(&rule.column).map(|i| (i, rule)))
            .collect();

        let carry_forward = profile
            .carry_forward
            .iter()
            .filter_map(|c| resolve(c))
            .collect();

        let date_format = profile
            .date_column
            .as_deref()
            .and_then(|c| schema.resolve(c))
            .and_then(|i| DateFormat::sniff(template.get(i)))
            .unwrap_or(profile.date_fallback);

        Self {
            columns,
            carry_forward,
            template,
            width: schema.width(),
            date_format,
            unresolved_marker,
        }
    }

    pub fn date_format(&self) -> DateFormat {
        self.date_format
    }

    pub fn synthesize(&self, facts: &EntityFacts<'_>, ctx: &BatchContext) -> Synthesized {
        let mut record = OutputRecord::new(self.width);
        let mut unresolved = false;

        for &(index, rule) in &self.columns {
            if record.get(index).is_some_and(|c| !c.is_empty()) {
                continue;
            }

            if matches!(
                (&rule.value, facts.nearest),
                (FieldSource::NearestAnchor, Some(NearestMatch::NoCandidates))
            ) {
                unresolved = true;
            }

            if let Some(cell) = self.compute(&rule.value, facts, ctx) {
                record.set(index, if rule.uppercase { uppercase(cell) } else { cell });
            }
        }

        for &index in &self.carry_forward {
            if record.get(index).is_some_and(Cell::is_empty) {
                record.set(index, Cell::text(self.template.get(index)));
            }
        }

        Synthesized { record, unresolved }
    }

    fn compute(&self, source: &FieldSource, facts: &EntityFacts<'_>, ctx: &BatchContext) -> Option<Cell> {
        let entity = facts.entity;

        let cell = match source {
            FieldSource::Name => Cell::text(entity.name.as_str()),
            FieldSource::Description => Cell::text(entity.description.as_str()),
            FieldSource::Latitude => Cell::Number(entity.position().lat),
            FieldSource::Longitude => Cell::Number(entity.position().lon),
            FieldSource::Length => match (&entity.geometry, facts.length) {
                (Geometry::Line(_), Some(length)) => Cell::Fixed(length.rounded_cm(), 2),
                _ => return None,
            },
            FieldSource::Derived(field) => Cell::text(facts.derived.get(field)?),
            FieldSource::NearestAnchor => match facts.nearest? {
                NearestMatch::Found { id, .. } => Cell::text(id.as_str()),
                NearestMatch::NoCandidates => Cell::text(self.unresolved_marker),
            },
            FieldSource::Today => Cell::Date(ctx.date(), self.date_format),
            FieldSource::Year => Cell::Text(ctx.date().year().to_string()),
            FieldSource::Context(key) => Cell::text(ctx.get(key)?),
            FieldSource::Literal(s) => Cell::text(s.as_str()),
            FieldSource::Class => Cell::text(facts.classification.class.as_deref()?),
        };

        (!cell.is_empty()).then_some(cell)
    }
}

fn uppercase(cell: Cell) -> Cell {
    match cell {
        Cell::Text(s) => Cell::Text(s.to_uppercase()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LonLat;
    use pretty_assertions::assert_eq;

    fn entity() -> GeoEntity {
        GeoEntity {
            name: "FAT A01".into(),
            description: String::new(),
            geometry: Geometry::Point(LonLat::new(101.4, 0.5)),
            folder_path: vec!["FAT".into()],
        }
    }

    fn profile() -> SynthesisProfile {
        SynthesisProfile {
            name: "fat".into(),
            select: EntitySelector {
                categories: vec![Category::Cabinet],
                ..EntitySelector::default()
            },
            anchor: Some(AnchorFilter::default()),
            columns: vec![
                ColumnRule {
                    column: "name".into(),
                    value: FieldSource::Name,
                    uppercase: false,
                },
                ColumnRule {
                    column: "district".into(),
                    value: FieldSource::Context("district".into()),
                    uppercase: true,
                },
                ColumnRule {
                    column: "parentid 1".into(),
                    value: FieldSource::NearestAnchor,
                    uppercase: false,
                },
                ColumnRule {
                    column: "installation_date".into(),
                    value: FieldSource::Today,
                    uppercase: false,
                },
                ColumnRule {
                    column: "not in sheet".into(),
                    value: FieldSource::Literal("x".into()),
                    uppercase: false,
                },
            ],
            carry_forward: vec!["olt".into(), "district".into()],
            date_column: Some("installation_date".into()),
            date_fallback: DateFormat::YearMonthDay,
        }
    }

    fn schema() -> ColumnMap {
        ColumnMap::from_headers(["Name", "District", "OLT", "Parentid 1", "Installation_Date", "Extra"])
    }

    fn ctx() -> BatchContext {
        BatchContext::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).with("district", "kampar")
    }

    #[test]
    fn test_precedence_and_carry_forward() {
        let template = TemplateRow::new(
            ["old", "OLD DISTRICT", "OLT-7", "P0", "15/03/2024", "keep out"]
                .map(String::from)
                .to_vec(),
            6,
        );
        let profile = profile();
        let synth = Synthesizer::new(&profile, &schema(), &template, "UNRESOLVED");
        assert_eq!(synth.date_format(), DateFormat::DayMonthYear);

        let classification = Classification {
            category: Category::Cabinet,
            class: Some("FAT".into()),
        };
        let derived = DerivedAttributes::default();
        let nearest = NearestMatch::Found {
            id: "P1".into(),
            distance: 0.0,
        };
        let facts = EntityFacts {
            entity: &entity(),
            classification: &classification,
            derived: &derived,
            nearest: Some(&nearest),
            length: None,
        };

        let out = synth.synthesize(&facts, &ctx());
        assert!(!out.unresolved);
        assert_eq!(
            out.record.to_strings(),
            ["FAT A01", "KAMPAR", "OLT-7", "P1", "01/06/2024", ""].map(String::from).to_vec()
        );
    }

    #[test]
    fn test_unresolved_marker_and_fallback_date() {
        let template = TemplateRow::empty(6);
        let profile = profile();
        let synth = Synthesizer::new(&profile, &schema(), &template, "UNRESOLVED");
        assert_eq!(synth.date_format(), DateFormat::YearMonthDay);

        let classification = Classification::unclassified();
        let derived = DerivedAttributes::default();
        let facts = EntityFacts {
            entity: &entity(),
            classification: &classification,
            derived: &derived,
            nearest: Some(&NearestMatch::NoCandidates),
            length: None,
        };

        let out = synth.synthesize(&facts, &BatchContext::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert!(out.unresolved);
        assert_eq!(out.record.get(3), Some(&Cell::Text("UNRESOLVED".into())));
        assert_eq!(out.record.get(4).map(Cell::to_string).as_deref(), Some("2024-06-01"));
        // No context value and a blank template: stays empty.
        assert_eq!(out.record.get(1), Some(&Cell::Empty));
    }

    #[test]
    fn test_selector() {
        let sel = EntitySelector {
            categories: vec![Category::Cable],
            classes: Vec::new(),
            folders: vec!["distribution".into()],
        };
        let cable = Classification {
            category: Category::Cable,
            class: None,
        };
        let mut e = entity();
        e.folder_path = vec!["DISTRIBUTION CABLE".into()];
        assert!(sel.matches(&e, &cable));
        e.folder_path = vec!["CABLE".into()];
        assert!(!sel.matches(&e, &cable));
    }
}
