use crate::midi_importer::{MidiScan, read_midi, scan_to_multitrack};
use crate::model::config::ConvertConfig;
use crate::model::instrumentation::Instrumentation;
use crate::splitter::{LastBarMode, split};
use crate::suitability::MidiInfo;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use ndarray::{Array3, ArrayView3};
use ndarray_npy::write_npy;
use rand::Rng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const TRAIN_DIR: &str = "train";
pub const TEST_DIR: &str = "test";
pub const MIXED_DIR: &str = "JCP_mixed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Test,
}

impl Partition {
    pub fn dir_name(self) -> &'static str {
        match self {
            Partition::Train => TRAIN_DIR,
            Partition::Test => TEST_DIR,
        }
    }
}

/// Per-root outcome of a preprocessing run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub inputs: usize,
    pub converted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub segments_train: usize,
    pub segments_test: usize,
    /// Training segments copied into `JCP_mixed`; `None` when the copy was skipped or failed.
    pub mixed: Option<usize>,
}

/// Every `.mid`/`.midi` file below `root`, in a stable order.
pub fn midi_paths<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root.as_ref())
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
        })
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths
}

/// MIDI file → binarized (time, 128, tracks) roll with one track per bucket.
pub fn convert_to_matrix(
    scan: &MidiScan,
    name: &str,
    cfg: &ConvertConfig,
    instrumentation: &Instrumentation,
) -> Array3<f32> {
    let multitrack = scan_to_multitrack(scan, cfg.beat_resolution, name.to_string());
    let mut merged = multitrack.merge(instrumentation);
    merged.binarize();
    merged.stacked_pianoroll()
}

/// Route one segment to train or test with a single draw and write it as `.npy`.
pub fn save_segment<R: Rng>(
    segment: ArrayView3<f32>,
    base: &Path,
    name: &str,
    test_ratio: f64,
    rng: &mut R,
) -> Result<Partition> {
    let partition = if rng.gen_range(0.0..1.0) < test_ratio {
        Partition::Test
    } else {
        Partition::Train
    };

    let save_path = base.join(partition.dir_name()).join(name);
    write_npy(&save_path, &segment)
        .with_context(|| format!("Failed to write {}", save_path.display()))?;
    Ok(partition)
}

#[allow(clippy::too_many_arguments)]
fn process_file<R: Rng>(
    scan: &MidiScan,
    name: &str,
    root: &Path,
    cfg: &ConvertConfig,
    mode: LastBarMode,
    instrumentation: &Instrumentation,
    rng: &mut R,
    report: &mut Report,
) -> Result<usize> {
    let pianoroll = convert_to_matrix(scan, name, cfg, instrumentation);
    let segments = split(&pianoroll, mode, cfg)?;

    for (i, segment) in segments.outer_iter().enumerate() {
        let file_name = format!("{}_{}.npy", name, i);
        match save_segment(segment, root, &file_name, cfg.test_ratio, rng)? {
            Partition::Train => report.segments_train += 1,
            Partition::Test => report.segments_test += 1,
        }
    }
    Ok(segments.len_of(ndarray::Axis(0)))
}

/// Convert every suitable MIDI file under `root` into segment tensors in `root/train` and
/// `root/test`. A file that fails is logged and skipped; the run carries on.
pub fn preprocess<P: AsRef<Path>, R: Rng>(
    root: P,
    cfg: &ConvertConfig,
    mode: LastBarMode,
    instrumentation: &Instrumentation,
    rng: &mut R,
) -> Result<Report> {
    let root = root.as_ref();
    info!("Genre: {}", root.display());

    for partition in [Partition::Test, Partition::Train] {
        let dir = root.join(partition.dir_name());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let paths = midi_paths(root);
    info!("Input: {} MIDI files", paths.len());

    let mut report = Report {
        inputs: paths.len(),
        ..Default::default()
    };

    for path in paths.iter() {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let scan = match read_midi(path) {
            Ok(scan) => scan,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };

        let midi_info = MidiInfo::from_scan(&scan);
        if !midi_info.is_suitable() {
            debug!("Skipping {}: {}", name, midi_info.to_json());
            report.rejected += 1;
            continue;
        }

        match process_file(
            &scan,
            &name,
            root,
            cfg,
            mode,
            instrumentation,
            rng,
            &mut report,
        ) {
            Ok(count) => {
                report.converted += 1;
                info!(
                    "#{:3}: Processing {} into {} matrices",
                    report.converted, name, count
                );
            }
            Err(e) => {
                warn!("{}: {:#}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "{} MIDI files are converted from {} inputs ({} rejected, {} failed)",
        report.converted, report.inputs, report.rejected, report.failed
    );
    Ok(report)
}

/// Copy every training segment of `root` into the shared `JCP_mixed` directory next to it.
pub fn make_mixed<P: AsRef<Path>>(root: P) -> Result<usize> {
    let root = root.as_ref();
    let mixed = root.join("..").join(MIXED_DIR);
    fs::create_dir_all(&mixed)
        .with_context(|| format!("Failed to create {}", mixed.display()))?;

    let train = root.join(TRAIN_DIR);
    let mut copied = 0;
    for entry in fs::read_dir(&train)
        .with_context(|| format!("Failed to list {}", train.display()))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("npy") {
            continue;
        }
        if let Some(file_name) = path.file_name() {
            fs::copy(&path, mixed.join(file_name))
                .with_context(|| format!("Failed to copy {}", path.display()))?;
            copied += 1;
        }
    }

    debug!("Copied {} segment(s) into {}", copied, mixed.display());
    Ok(copied)
}

/// Preprocess one root and, when `mixed` is set, copy its training segments into the shared
/// set. A failed copy is logged and left out of the report; only preprocessing errors bubble up.
pub fn convert_root<P: AsRef<Path>, R: Rng>(
    root: P,
    cfg: &ConvertConfig,
    mode: LastBarMode,
    instrumentation: &Instrumentation,
    rng: &mut R,
    mixed: bool,
) -> Result<Report> {
    let root = root.as_ref();
    let mut report = preprocess(root, cfg, mode, instrumentation, rng)?;

    if mixed {
        match make_mixed(root) {
            Ok(copied) => report.mixed = Some(copied),
            Err(e) => warn!("Mixed set not updated for {}: {:#}", root.display(), e),
        }
    }
    Ok(report)
}
