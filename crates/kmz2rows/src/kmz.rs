//! Input discovery and archive reading.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use walkdir::WalkDir;

fn is_input(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    ext == "kmz" || ext == "kml"
}

/// `.kmz`/`.kml` files under `input` (or `input` itself), sorted by path.
pub fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    anyhow::ensure!(input.is_dir(), "input {} does not exist", input.display());

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_input(path))
        .collect();

    files.sort();
    Ok(files)
}

/// The KML text of a `.kml` file, or of the first `.kml` entry of a `.kmz` archive.
pub fn read_kml(path: &Path) -> Result<String> {
    let is_kmz = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("kmz"));

    if !is_kmz {
        return fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).with_context(|| format!("{} is not a zip archive", path.display()))?;

    let kml_name = archive
        .file_names()
        .find(|n| n.to_ascii_lowercase().ends_with(".kml"))
        .context("No .kml file found in archive")?
        .to_owned();

    debug!("Found KML in {}: {}", path.display(), kml_name);
    let mut entry = archive.by_name(&kml_name)?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .with_context(|| format!("reading {kml_name} from {}", path.display()))?;

    Ok(text)
}

/// Archive name as written to sheets: the file name without directories.
pub fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
