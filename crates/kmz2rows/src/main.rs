use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use geosynth::spatial::MatcherKind;
use geosynth::{
    AnomalyKind, AnomalyReport, BatchContext, ColumnMap, Engine, EngineConfig, GeodesicMethod, PreparedBatch,
    RecordSink, RunOptions, SynthesisProfile, TemplateRow,
};

mod csv_sink;
mod kml;
mod kmz;

use csv_sink::{ensure_sheet, CsvSheet};

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum MatcherArg {
    Linear,
    Rtree,
}

impl From<MatcherArg> for MatcherKind {
    fn from(m: MatcherArg) -> Self {
        match m {
            MatcherArg::Linear => MatcherKind::Linear,
            MatcherArg::Rtree => MatcherKind::Rtree,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum GeodesicArg {
    Haversine,
    Vincenty,
}

impl From<GeodesicArg> for GeodesicMethod {
    fn from(g: GeodesicArg) -> Self {
        match g {
            GeodesicArg::Haversine => GeodesicMethod::Haversine,
            GeodesicArg::Vincenty => GeodesicMethod::Vincenty,
        }
    }
}

/// `PROFILE=SHEET.csv`
#[derive(Clone, Debug, PartialEq, Eq)]
struct Target {
    profile: String,
    sheet: PathBuf,
}

fn parse_target(s: &str) -> Result<Target, String> {
    let (profile, sheet) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PROFILE=SHEET.csv, got '{s}'"))?;

    let profile = profile.trim();
    if profile.is_empty() || sheet.trim().is_empty() {
        return Err(format!("expected PROFILE=SHEET.csv, got '{s}'"));
    }

    Ok(Target {
        profile: profile.to_owned(),
        sheet: PathBuf::from(sheet.trim()),
    })
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kmz2rows", version)]
struct Args {
    /// A .kmz/.kml file, or a directory scanned for them.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output sheet per profile, repeatable: --target fat=fat.csv
    #[arg(long = "target", value_parser = parse_target)]
    targets: Vec<Target>,

    /// JSON rule file replacing the built-in rules.
    #[arg(long)]
    rules: Option<PathBuf>,

    #[arg(long, env = "KMZ2ROWS_DISTRICT", default_value = "")]
    district: String,

    #[arg(long, env = "KMZ2ROWS_SUBDISTRICT", default_value = "")]
    subdistrict: String,

    #[arg(long, env = "KMZ2ROWS_VENDOR", default_value = "")]
    vendor: String,

    /// Override the anchor matcher from the rules.
    #[arg(long, value_enum)]
    matcher: Option<MatcherArg>,

    /// Override the path length model from the rules.
    #[arg(long, value_enum)]
    geodesic: Option<GeodesicArg>,

    /// Synthesize entities on all cores.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Run everything but print rows to stdout instead of appending.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Write parsed, classified entities as JSON into this directory.
    #[arg(long)]
    dump_entities: Option<PathBuf>,

    /// Print the rules in effect as JSON and exit.
    #[arg(long, default_value_t = false)]
    print_rules: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.rules {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading rules {}", path.display()))?,
        None => EngineConfig::builtin().context("built-in rules")?,
    };

    if let Some(m) = args.matcher {
        config.matching.kind = m.into();
    }
    if let Some(g) = args.geodesic {
        config.length_method = g.into();
    }

    Ok(config)
}

/// Header for a sheet that does not exist yet: profile columns, then carry-forward ones.
fn default_header(profile: &SynthesisProfile) -> Vec<&str> {
    let mut header: Vec<&str> = Vec::new();
    let names = profile
        .columns
        .iter()
        .map(|c| c.column.as_str())
        .chain(profile.carry_forward.iter().map(String::as_str));

    for name in names {
        if !header.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            header.push(name);
        }
    }

    header
}

fn dump_entities(dir: &Path, source: &Path, batch: &PreparedBatch) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "entities".to_owned());
    let out = dir.join(format!("{stem}.entities.json"));

    let json = serde_json::to_string_pretty(&batch.entities)?;
    fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
    info!("Wrote {} entities to {}", batch.entities.len(), out.display());
    Ok(())
}

fn print_rows(profile: &str, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    println!("# {profile}: {} rows", rows.len());

    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn dry_run(
    engine: &Engine,
    batch: &PreparedBatch,
    target: &Target,
    ctx: &BatchContext,
    options: &RunOptions,
) -> Result<AnomalyReport> {
    let profile = engine.profile(&target.profile)?;

    let (header, schema, template): (Vec<String>, ColumnMap, TemplateRow) = if target.sheet.exists() {
        let mut sheet = CsvSheet::new(&target.sheet);
        let schema = sheet.schema()?;
        let template = sheet.template(&schema)?;
        let header = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&target.sheet)?
            .records()
            .next()
            .transpose()?
            .map(|r| r.iter().map(str::to_owned).collect())
            .unwrap_or_default();
        (header, schema, template)
    } else {
        let header: Vec<String> = default_header(profile).into_iter().map(str::to_owned).collect();
        let schema = ColumnMap::from_headers(&header);
        let template = TemplateRow::empty(schema.width());
        (header, schema, template)
    };

    let outcome = engine.synthesize(batch, &target.profile, &schema, &template, ctx, options)?;
    let rows: Vec<Vec<String>> = outcome.records.iter().map(|r| r.to_strings()).collect();
    print_rows(&target.profile, &header, &rows)?;

    if !outcome.report.is_empty() {
        warn!("{}: {}", target.profile, outcome.report);
    }
    Ok(outcome.report)
}

/// Process one input against every target. Returns the anomalies seen in it.
fn process_file(path: &Path, engine: &Engine, args: &Args, ctx: &BatchContext) -> Result<AnomalyReport> {
    info!("Processing {}", path.display());

    let text = kmz::read_kml(path)?;
    let root = kml::parse_kml(&text).with_context(|| format!("decoding {}", path.display()))?;
    let batch = engine
        .prepare(&root)
        .with_context(|| format!("{} has no usable placemarks", path.display()))?;

    info!("{}: {} entities", path.display(), batch.entities.len());
    if !batch.report.is_empty() {
        warn!("{}: {}", path.display(), batch.report);
    }

    if let Some(dir) = &args.dump_entities {
        dump_entities(dir, path, &batch)?;
    }

    let ctx = ctx.clone().with("archive", kmz::archive_name(path));
    let options = RunOptions {
        parallel: args.parallel,
        cancel: None,
    };

    let mut report = batch.report.clone();
    for target in &args.targets {
        if args.dry_run {
            report.merge(&dry_run(engine, &batch, target, &ctx, &options)?);
            continue;
        }

        let profile = engine.profile(&target.profile)?;
        ensure_sheet(&target.sheet, &default_header(profile))
            .with_context(|| format!("creating {}", target.sheet.display()))?;

        let mut sheet = CsvSheet::new(&target.sheet);
        let outcome = engine
            .run(&batch, &target.profile, &mut sheet, &ctx, &options)
            .with_context(|| format!("appending to {}", sheet.path().display()))?;

        info!(
            "{}: appended {} {} rows to {}",
            path.display(),
            outcome.records.len(),
            target.profile,
            sheet.path().display()
        );
        if !outcome.report.is_empty() {
            warn!("{}: {}: {}", path.display(), target.profile, outcome.report);
        }

        // The batch part of the outcome report is already counted.
        report.add(
            AnomalyKind::UnresolvedAnchor,
            outcome.report.count(AnomalyKind::UnresolvedAnchor),
        );
    }

    Ok(report)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if args.print_rules {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let engine = Engine::new(config).context("compiling rules")?;
    for target in &args.targets {
        engine.profile(&target.profile)?;
    }

    let input = args.input.as_deref().context("--input is required")?;
    anyhow::ensure!(
        !args.targets.is_empty() || args.dump_entities.is_some(),
        "nothing to do: pass --target PROFILE=SHEET.csv or --dump-entities DIR (profiles: {})",
        engine.config().profile_names().collect::<Vec<_>>().join(", ")
    );

    let inputs = kmz::discover_inputs(input)?;
    info!("Processing {} input files...", inputs.len());

    let ctx = BatchContext::today()
        .with("district", args.district.as_str())
        .with("subdistrict", args.subdistrict.as_str())
        .with("vendor", args.vendor.as_str());

    let mut failed = 0usize;
    let mut report = AnomalyReport::new();
    for path in &inputs {
        match process_file(path, &engine, &args, &ctx) {
            Ok(file_report) => report.merge(&file_report),
            Err(err) => {
                failed += 1;
                warn!("Error processing {}: {:#}", path.display(), err);
            }
        }
    }

    if failed > 0 && failed == inputs.len() {
        anyhow::bail!("all {failed} input files failed");
    }

    info!("Done: {} files, {} failed", inputs.len(), failed);
    if !report.is_empty() {
        warn!("Anomalies: {report}");
    }
    Ok(())
}
