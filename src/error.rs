use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConvertError {
    #[error(
        "piano_rolls, program_nums and is_drum have different sizes: {rolls} vs {programs} vs {drums}"
    )]
    ShapeMismatch {
        rolls: usize,
        programs: usize,
        drums: usize,
    },

    #[error("Time axis of length {len} cannot be split into segments of {segment_len}")]
    IndivisibleTimeAxis { len: usize, segment_len: usize },

    #[error("Expected {expected} pitches but found {found}")]
    PitchWidth { expected: usize, found: usize },

    #[error("Invalid instrumentation: {0}")]
    Instrumentation(String),
}
