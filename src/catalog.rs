use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Local};

use crate::error::LapseResult;

/// Identifier of a still within its group, assigned in insertion order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct StillId(pub u64);

/// Where a still's pixels come from.
///
/// The pipeline only requires that the source decodes to pixels of known
/// width and height; the encoded format is opaque here.
#[derive(Clone, Debug)]
pub enum StillSource {
    /// Encoded image file on disk (PNG, JPEG, ...).
    Path(PathBuf),
    /// Encoded image bytes already in memory.
    Encoded(Arc<[u8]>),
    /// Pre-decoded RGBA8 pixels, row-major, tight stride.
    Raw {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// `width * height * 4` bytes of straight-alpha RGBA8.
        rgba: Arc<[u8]>,
    },
}

/// One captured still image: identity, capture instant, pixel source.
///
/// Immutable once created; exports borrow stills read-only.
#[derive(Clone, Debug)]
pub struct StillImage {
    /// Identity within the owning group.
    pub id: StillId,
    /// Capture instant, used for ordering and the burned-in timestamp.
    pub timestamp: DateTime<Local>,
    /// Pixel source.
    pub source: StillSource,
}

/// An ordered set of stills sharing a caller-defined group key.
///
/// The group itself guarantees no timestamp order; [`FrameGroup::sorted`]
/// re-sorts (stably) before an export consumes it.
#[derive(Clone, Debug)]
pub struct FrameGroup {
    key: String,
    stills: Vec<StillImage>,
}

/// One manifest line: an image path plus its capture instant (RFC 3339).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ManifestEntry {
    /// Path of the encoded image file.
    pub path: PathBuf,
    /// Capture instant.
    pub timestamp: DateTime<Local>,
}

impl FrameGroup {
    /// Create an empty group with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stills: Vec::new(),
        }
    }

    /// Group key (e.g. a calendar day or a source directory name).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stills in insertion order.
    pub fn stills(&self) -> &[StillImage] {
        &self.stills
    }

    /// Number of stills in the group.
    pub fn len(&self) -> usize {
        self.stills.len()
    }

    /// Return `true` when the group holds no stills.
    pub fn is_empty(&self) -> bool {
        self.stills.is_empty()
    }

    /// Append a still, assigning the next id in insertion order.
    pub fn push(&mut self, timestamp: DateTime<Local>, source: StillSource) -> StillId {
        let id = StillId(self.stills.len() as u64);
        self.stills.push(StillImage {
            id,
            timestamp,
            source,
        });
        id
    }

    /// Stills in ascending timestamp order.
    ///
    /// The sort is stable: stills sharing a timestamp keep their insertion
    /// order.
    pub fn sorted(&self) -> Vec<&StillImage> {
        let mut out: Vec<&StillImage> = self.stills.iter().collect();
        out.sort_by_key(|s| s.timestamp);
        out
    }

    /// Build a group from the image files directly inside `dir`.
    ///
    /// Files are matched by extension, timestamped from their modification
    /// time, and inserted in file-name order so ids are deterministic. The
    /// group key is the directory name.
    pub fn from_dir(dir: impl AsRef<Path>) -> LapseResult<Self> {
        let dir = dir.as_ref();
        let key = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let mut paths: Vec<PathBuf> = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory '{}'", dir.display()))?;
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read entry in '{}'", dir.display()))?;
            let path = entry.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut group = Self::new(key);
        for path in paths {
            let meta = std::fs::metadata(&path)
                .with_context(|| format!("failed to stat '{}'", path.display()))?;
            let modified = meta
                .modified()
                .with_context(|| format!("no modification time for '{}'", path.display()))?;
            group.push(DateTime::<Local>::from(modified), StillSource::Path(path));
        }
        Ok(group)
    }

    /// Build a group from a JSON manifest: an array of [`ManifestEntry`].
    ///
    /// Manifests carry explicit capture instants, for catalogs where file
    /// modification times are not trustworthy. The group key is the manifest
    /// file stem.
    pub fn from_manifest(path: impl AsRef<Path>) -> LapseResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest '{}'", path.display()))?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse manifest '{}'", path.display()))?;

        let key = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut group = Self::new(key);
        for entry in entries {
            group.push(entry.timestamp, StillSource::Path(entry.path));
        }
        Ok(group)
    }

    /// Partition into per-calendar-day groups keyed `YYYY-MM-DD`.
    ///
    /// Insertion order is preserved within each day; days come out in
    /// ascending key order.
    pub fn split_by_day(&self) -> Vec<FrameGroup> {
        let mut days: BTreeMap<String, FrameGroup> = BTreeMap::new();
        for still in &self.stills {
            let day = still.timestamp.format("%Y-%m-%d").to_string();
            days.entry(day.clone())
                .or_insert_with(|| FrameGroup::new(day))
                .push(still.timestamp, still.source.clone());
        }
        days.into_values().collect()
    }
}

fn has_image_extension(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    matches!(
        ext.to_string_lossy().to_ascii_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff" | "webp"
    )
}
