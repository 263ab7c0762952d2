use serde::{Deserialize, Serialize};

/// A single reconstructed note, timed in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
    pub velocity: u8,
}

impl Note {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Instrument {
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
    pub notes: Vec<Note>,
}

impl Instrument {
    pub fn new(program: u8, is_drum: bool, name: impl Into<String>) -> Self {
        Self {
            program,
            is_drum,
            name: name.into(),
            notes: Vec::new(),
        }
    }
}
