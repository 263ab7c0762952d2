use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_TEST_RATIO: f64 = 0.1;

/// Number of MIDI pitches.
pub const PITCHES: usize = 128;

#[derive(Parser, Debug)]
#[command(
    name = "midiroll",
    about = "Convert directories of MIDI files into segmented piano-roll training tensors!"
)]
pub struct Args {
    /// One or more root directories, each scanned recursively for MIDI files.
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,

    /// Seed for the train/test draw. Omit to seed from system entropy.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Probability of a segment being routed to the test partition.
    #[arg(short, long, default_value_t = DEFAULT_TEST_RATIO)]
    pub test_ratio: f64,

    /// How to handle an incomplete trailing segment: fill|remove.
    #[arg(short, long, default_value = "remove")]
    pub last_bar_mode: String,

    /// JSON file describing the track buckets (defaults to Piano/Guitar/Bass/Strings).
    #[arg(short, long)]
    pub instrumentation: Option<PathBuf>,

    /// Skip populating the sibling `JCP_mixed` directory.
    #[arg(long, default_value_t = false)]
    pub no_mixed: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "roll2midi",
    about = "Reconstruct a MIDI file from a saved piano-roll segment tensor!"
)]
pub struct RollArgs {
    /// Path to a `.npy` tensor shaped (segments, time, 84, tracks) or (time, 84, tracks).
    pub input: PathBuf,

    /// Destination MIDI file.
    pub output: PathBuf,

    /// Comma-separated General MIDI program per track.
    #[arg(short, long, value_delimiter = ',', default_values_t = [0u8, 24, 32, 48])]
    pub programs: Vec<u8>,

    /// Tempo in BPM.
    #[arg(short, long, default_value_t = 80.0)]
    pub tempo: f64,

    /// Time steps per quarter note in the input tensor.
    #[arg(short, long, default_value_t = 4)]
    pub beat_resolution: u32,
}

/// Fixed quantities shared by the forward and inverse pipelines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertConfig {
    /// Time steps per quarter note (4 = sixteenth-note grid).
    pub beat_resolution: u32,
    /// Quarter notes per bar.
    pub base_note: u32,
    /// Bars per segment.
    pub bars: u32,
    /// First kept pitch (inclusive).
    pub pitch_beg: usize,
    /// Last kept pitch (exclusive).
    pub pitch_end: usize,
    pub test_ratio: f64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            beat_resolution: 4,
            base_note: 4,
            bars: 4,
            pitch_beg: 24,
            pitch_end: 108,
            test_ratio: DEFAULT_TEST_RATIO,
        }
    }
}

impl ConvertConfig {
    pub fn segment_len(&self) -> usize {
        (self.beat_resolution * self.base_note * self.bars) as usize
    }

    pub fn pitches(&self) -> usize {
        self.pitch_end - self.pitch_beg
    }
}
