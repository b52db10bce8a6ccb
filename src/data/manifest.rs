//! CSV manifests of CT / segmentation slice stacks.
//!
//! Format:
//! - UTF-8, comma-separated, one sample per row: `ct,seg`
//! - Optional header row whose cells are `ct` and `seg` (any case)
//! - Double-quoted fields with embedded commas are handled
//! - Relative paths resolve against the manifest's directory
//!
//! Each path names a directory of PNG slices sorted by file name. CT slices
//! are grey levels normalized to [0, 1]; segmentation slices store the class
//! index of every pixel.

use std::path::{Path, PathBuf};

use image::GenericImageView;
use log::debug;

use crate::data::dataset::VolumeDataset;
use crate::error::{Error, Result};
use crate::volume::{LabelVolume, Sample, Volume, VolumeShape};

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub ct: PathBuf,
    pub seg: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ManifestDataset {
    entries: Vec<ManifestEntry>,
    num_classes: usize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl ManifestDataset {
    /// Reads the manifest at `path`. Labels are checked against `num_classes`
    /// when samples are loaded.
    pub fn open(path: &Path, num_classes: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let entries = parse_manifest(&text, base)?;
        debug!("manifest {:?}: {} samples", path, entries.len());
        Ok(ManifestDataset { entries, num_classes })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

impl VolumeDataset for ManifestDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let entry = self.entries.get(index).ok_or_else(|| {
            Error::Dataset(format!("index {index} out of range for {} samples", self.entries.len()))
        })?;
        let volume = load_ct_stack(&entry.ct)?;
        let label = load_label_stack(&entry.seg)?;
        label.check_classes(self.num_classes)?;
        Sample::new(volume, label)
    }
}

/// Parses manifest text; relative paths are joined onto `base`.
pub fn parse_manifest(text: &str, base: &Path) -> Result<Vec<ManifestEntry>> {
    let mut lines = text.lines().peekable();

    if let Some(first) = lines.peek() {
        if is_header(first) {
            lines.next();
        }
    }

    let mut entries = Vec::new();
    for (row_idx, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cells = parse_csv_row(line);
        if cells.len() != 2 {
            return Err(Error::Dataset(format!(
                "manifest row {}: expected 2 columns (ct, seg), got {}",
                row_idx + 1,
                cells.len()
            )));
        }
        entries.push(ManifestEntry {
            ct: base.join(cells[0].trim()),
            seg: base.join(cells[1].trim()),
        });
    }
    Ok(entries)
}

/// Loads a CT slice stack as a volume with intensities in [0, 1].
pub fn load_ct_stack(dir: &Path) -> Result<Volume> {
    let (shape, slices) = read_slices(dir)?;
    let mut data = Vec::with_capacity(shape.voxels());
    for img in slices {
        data.extend(img.to_luma16().pixels().map(|p| p.0[0] as f64 / u16::MAX as f64));
    }
    Volume::new(shape, data)
}

/// Loads a segmentation slice stack; each pixel value is a class index.
pub fn load_label_stack(dir: &Path) -> Result<LabelVolume> {
    let (shape, slices) = read_slices(dir)?;
    let mut labels = Vec::with_capacity(shape.voxels());
    for img in slices {
        labels.extend(img.to_luma8().pixels().map(|p| p.0[0]));
    }
    LabelVolume::new(shape, labels)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_slices(dir: &Path) -> Result<(VolumeShape, Vec<image::DynamicImage>)> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(Error::Dataset(format!("{:?} contains no PNG slices", dir)));
    }

    let mut slices = Vec::with_capacity(paths.len());
    let mut dims: Option<(u32, u32)> = None;
    for path in &paths {
        let img = image::open(path)?;
        match dims {
            None => dims = Some(img.dimensions()),
            Some(d) if d != img.dimensions() => {
                return Err(Error::Shape(format!(
                    "slice {:?} is {:?}, earlier slices are {:?}",
                    path, img.dimensions(), d
                )));
            }
            Some(_) => {}
        }
        slices.push(img);
    }
    let (width, height) = dims.unwrap_or((0, 0));
    Ok((VolumeShape::new(slices.len(), height as usize, width as usize), slices))
}

/// Returns `true` if the row is the `ct,seg` header.
fn is_header(line: &str) -> bool {
    let cells = parse_csv_row(line);
    cells.len() == 2
        && cells[0].trim().eq_ignore_ascii_case("ct")
        && cells[1].trim().eq_ignore_ascii_case("seg")
}

/// Parses a single CSV row, handling double-quoted fields.
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                // Escaped quote inside quoted field.
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}
