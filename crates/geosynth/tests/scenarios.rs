//! End-to-end checks of the documented behaviour, driven through the public API with
//! the embedded default rules.

use chrono::NaiveDate;
use geosynth::classify::Category;
use geosynth::spatial::{DistanceMetric, LinearScan};
use geosynth::tree::Placemark;
use geosynth::{
    parse_tree, AnomalyKind, BatchContext, Classification, ColumnMap, Engine, EngineConfig, Folder,
    GeodesicMethod, LonLat, MemorySink, NearestMatch, NearestNeighbor, PathLengthCalculator, RunOptions,
    TemplateRow,
};
use pretty_assertions::assert_eq;

fn engine() -> Engine {
    Engine::new(EngineConfig::builtin().unwrap()).unwrap()
}

fn ctx() -> BatchContext {
    BatchContext::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .with("district", "Kampar")
        .with("subdistrict", "Tambang")
        .with("vendor", "acme")
        .with("archive", "CLUSTER-12.kmz")
}

#[test]
fn fdt_references_nearest_pole_and_capacity_lookup() {
    let tree = Folder::new("CLUSTER-12")
        .with_folder(Folder::new("FDT").with_placemark(Placemark::point("FDT 48 - X1", "101.400000,0.500000,0")))
        .with_folder(
            Folder::new("NEW POLE 7-4")
                .with_placemark(Placemark::point("P-FAR", "101.500000,0.600000,0"))
                .with_placemark(Placemark::point("P-NEAR", "101.400000,0.500100,0")),
        );

    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();
    let schema = ColumnMap::from_headers(["FDT ID", "Parentid 1", "Splitter Count", "Module Count", "FDT Type"]);
    let template = TemplateRow::empty(schema.width());

    let outcome = engine
        .synthesize(&batch, "fdt", &schema, &template, &ctx(), &RunOptions::default())
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(
        outcome.records[0].to_strings(),
        ["FDT 48 - X1", "P-NEAR", "2", "4", "FDT TYPE 48 CORE"]
    );
}

#[test]
fn hundred_meter_line_at_equator() {
    let points = [LonLat::new(101.0, 0.0), LonLat::new(101.0009, 0.0)];
    for method in [GeodesicMethod::Haversine, GeodesicMethod::Vincenty] {
        let length = PathLengthCalculator::new(method).measure(&points);
        assert!(!length.degenerate);
        assert!((length.meters - 100.0).abs() <= 2.0, "{method}: {}", length.meters);
    }

    // Same line through the cable profile.
    let tree = Folder::new("doc").with_folder(
        Folder::new("Distribution Cable")
            .with_placemark(Placemark::line("FO 24/2T - SEG A", "101.0,0.0,0 101.0009,0.0,0")),
    );
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();
    let schema = ColumnMap::from_headers(["cable id", "length"]);
    let outcome = engine
        .synthesize(&batch, "distribution-cable", &schema, &TemplateRow::empty(2), &ctx(), &RunOptions::default())
        .unwrap();

    assert_eq!(outcome.records[0].to_strings()[1], "100.08");
}

#[test]
fn cable_length_keeps_two_decimals() {
    let tree = Folder::new("doc").with_folder(
        Folder::new("DISTRIBUTION CABLE")
            .with_placemark(Placemark::line("FO 12/1T - DROP", "101.0,0.0,0 101.0,0.0,0"))
            .with_placemark(Placemark::line("FO 24/2T - SEG B", "101.0,0.0,0 101.0009,0.0,0")),
    );
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();
    let schema = ColumnMap::from_headers(["cable id", "length"]);
    let outcome = engine
        .synthesize(&batch, "distribution-cable", &schema, &TemplateRow::empty(2), &ctx(), &RunOptions::default())
        .unwrap();

    let lengths: Vec<_> = outcome.records.iter().map(|r| r.to_strings()[1].clone()).collect();
    assert_eq!(lengths, ["0.00", "100.08"]);
}

#[test]
fn empty_anchor_set_is_explicit_no_match() {
    let matcher = LinearScan::new(Vec::new(), DistanceMetric::PlanarSquared);
    let result = matcher.nearest(LonLat::new(101.4, 0.5));

    assert_eq!(result, NearestMatch::NoCandidates);
    assert_eq!(result.id(), None);
    assert!(!result.is_resolved());
}

#[test]
fn tube_and_core_come_from_regex_not_lookup() {
    let config = EngineConfig::builtin().unwrap();
    let attributes = geosynth::AttributeEngine::new(&config.derivation).unwrap();
    let cable = Classification {
        category: Category::Cable,
        class: Some("DISTRIBUTION".into()),
    };

    let attrs = attributes.derive_text("FO 24/2T - SEG A", "", &cable);
    assert_eq!(attrs.get("tube_count"), Some("2"));
    assert_eq!(attrs.get("core_count"), Some("24"));

    // The lookup would say 2 tubes for 24 cores; the earlier regex rule keeps 3.
    let attrs = attributes.derive_text("FO 24/3T - SEG B", "", &cable);
    assert_eq!(attrs.get("tube_count"), Some("3"));
}

#[test]
fn date_follows_template_layout() {
    let tree = Folder::new("doc").with_folder(Folder::new("FAT").with_placemark(Placemark::point("FAT A01", "101.4,0.5")));
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();

    let mut sink = MemorySink::new(["FAT ID", "Installation_Date", "OLT"]).with_row(["FAT OLD", "15/03/2024", "OLT-3"]);
    let outcome = engine
        .run(&batch, "fat", &mut sink, &ctx(), &RunOptions::default())
        .unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(sink.rows()[1], ["FAT A01", "01/06/2024", "OLT-3"]);
}

#[test]
fn placemark_without_coordinates_is_skipped_and_counted() {
    let tree = Folder::new("doc").with_folder(
        Folder::new("FAT")
            .with_placemark(Placemark {
                name: Some("legend".into()),
                ..Placemark::default()
            })
            .with_placemark(Placemark::point("FAT A01", "101.4,0.5")),
    );

    let parsed = parse_tree(&tree);
    assert_eq!(parsed.entities.len(), 1);
    assert_eq!(parsed.entities[0].name, "FAT A01");
    assert_eq!(parsed.report.count(AnomalyKind::MissingGeometry), 1);
    assert_eq!(parsed.report.to_string(), "1 entity skipped: no geometry");
}

#[test]
fn pole_profile_fills_class_attributes() {
    let tree = Folder::new("doc")
        .with_folder(Folder::new("NEW POLE 7-3").with_placemark(Placemark::point("P-01", "101.4,0.5")))
        .with_folder(Folder::new("NEW POLE 9-4").with_placemark(Placemark::point("P-02", "101.41,0.5")));
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();
    let schema = ColumnMap::from_headers(["pole id", "pole height", "poletype", "remarks", "installationyear", "vendorname"]);

    let outcome = engine
        .synthesize(&batch, "pole", &schema, &TemplateRow::empty(6), &ctx(), &RunOptions::default())
        .unwrap();

    let rows: Vec<_> = outcome.records.iter().map(|r| r.to_strings()).collect();
    assert_eq!(
        rows,
        vec![
            ["P-01", "7", "7m3inch", "CLUSTER", "2024", "ACME"].map(String::from).to_vec(),
            ["P-02", "9", "9m4inch", "SUBFEEDER", "2024", "ACME"].map(String::from).to_vec(),
        ]
    );
}

#[test]
fn fdt_parent_may_be_any_existing_pole() {
    let tree = Folder::new("doc")
        .with_folder(Folder::new("FDT").with_placemark(Placemark::point("FDT 48 - X1", "101.4,0.5")))
        .with_folder(Folder::new("EXISTING POLE").with_placemark(Placemark::point("EX-1", "101.4,0.5001")))
        .with_folder(Folder::new("EMR").with_placemark(Placemark::point("EMR-1", "101.4,0.5002")));
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();
    let schema = ColumnMap::from_headers(["fdt id", "parentid 1"]);

    let outcome = engine
        .synthesize(&batch, "fdt", &schema, &TemplateRow::empty(2), &ctx(), &RunOptions::default())
        .unwrap();
    assert_eq!(outcome.records[0].to_strings(), ["FDT 48 - X1", "EX-1"]);
    assert!(outcome.report.is_empty());

    // Only the EMR pole left.
    let tree = Folder::new("doc")
        .with_folder(Folder::new("FDT").with_placemark(Placemark::point("FDT 48 - X1", "101.4,0.5")))
        .with_folder(Folder::new("EMR").with_placemark(Placemark::point("EMR-1", "101.4,0.5002")));
    let batch = engine.prepare(&tree).unwrap();
    let outcome = engine
        .synthesize(&batch, "fdt", &schema, &TemplateRow::empty(2), &ctx(), &RunOptions::default())
        .unwrap();
    assert_eq!(outcome.records[0].to_strings(), ["FDT 48 - X1", "EMR-1"]);
}

#[test]
fn decorated_pole_folders_keep_their_class() {
    let tree = Folder::new("doc")
        .with_folder(Folder::new("FAT").with_placemark(Placemark::point("FAT A01", "101.4,0.5")))
        .with_folder(Folder::new("NEW POLE 7-3 CLUSTER").with_placemark(Placemark::point("P-01", "101.4,0.5001")))
        .with_folder(Folder::new("NEW POLE 7 - 4").with_placemark(Placemark::point("P-02", "101.41,0.5")));
    let engine = engine();
    let batch = engine.prepare(&tree).unwrap();

    let classes: Vec<_> = batch
        .entities
        .iter()
        .map(|c| c.classification.class.as_deref())
        .collect();
    assert_eq!(classes, [Some("FAT"), Some("7-3"), Some("7-4")]);

    let schema = ColumnMap::from_headers(["fat id", "parentid 1"]);
    let outcome = engine
        .synthesize(&batch, "fat", &schema, &TemplateRow::empty(2), &ctx(), &RunOptions::default())
        .unwrap();
    assert_eq!(outcome.records[0].to_strings(), ["FAT A01", "P-01"]);

    let schema = ColumnMap::from_headers(["pole id", "poletype", "remarks"]);
    let outcome = engine
        .synthesize(&batch, "pole", &schema, &TemplateRow::empty(3), &ctx(), &RunOptions::default())
        .unwrap();
    let rows: Vec<_> = outcome.records.iter().map(|r| r.to_strings()).collect();
    assert_eq!(
        rows,
        vec![
            ["P-01", "7m3inch", "CLUSTER"].map(String::from).to_vec(),
            ["P-02", "7m4inch", "SUBFEEDER"].map(String::from).to_vec(),
        ]
    );
}
