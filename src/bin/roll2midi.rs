//! Rebuild a MIDI file from a piano-roll tensor written by `midiroll`.
//!
//! Usage: roll2midi <input.npy> <output.mid> [--programs 0,24,32,48] [--tempo 80]

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use midiroll::{ConvertConfig, RollArgs, save_midis};
use ndarray::{Array3, Array4, Axis};
use ndarray_npy::read_npy;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = RollArgs::parse();

    // a whole batch, or a single saved segment
    let segments: Array4<f32> = match read_npy::<_, Array4<f32>>(&args.input) {
        Ok(batch) => batch,
        Err(e) => {
            debug!("Not a segment batch ({}), trying a single segment", e);
            let segment: Array3<f32> = read_npy(&args.input)
                .with_context(|| format!("Failed to read {}", args.input.display()))?;
            segment.insert_axis(Axis(0))
        }
    };

    info!(
        "Loaded {} with shape {:?}",
        args.input.display(),
        segments.shape()
    );

    let cfg = ConvertConfig {
        beat_resolution: args.beat_resolution,
        ..Default::default()
    };
    save_midis(&segments, &args.output, &args.programs, args.tempo, &cfg)
}
