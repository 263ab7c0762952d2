use crate::midi_importer::{MidiScan, read_midi};
use anyhow::Result;
use log::debug;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

pub const REQUIRED_TIME_SIGNATURE: &str = "4/4";

/// Summary of a MIDI file's meter and tempo layout.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MidiInfo {
    /// Seconds until the first beat. Taken from the earliest time signature event,
    /// or estimated from the first note onset when the file has none.
    pub first_beat_time: f64,
    pub num_time_signature_change: usize,
    /// Set only when exactly one time signature event exists.
    pub time_signature: Option<String>,
    /// Set only when the whole file plays at one tempo.
    pub tempo: Option<f64>,
    /// Distinct note velocities across every instrument.
    pub velocities: usize,
}

impl MidiInfo {
    pub fn from_scan(scan: &MidiScan) -> Self {
        let first_beat_time = match scan.time_signatures.first() {
            Some(ts) => scan.tempo_map.seconds_at(ts.tick),
            None => estimate_beat_start(scan),
        };

        let time_signature = match scan.time_signatures.as_slice() {
            [ts] => Some(format!("{}/{}", ts.numerator, ts.denominator)),
            _ => None,
        };

        let tempo = if scan.tempo_map.len() == 1 {
            Some(scan.tempo_map.bpm_at(0))
        } else {
            None
        };

        let velocities = scan
            .notes()
            .map(|n| n.velocity)
            .collect::<HashSet<_>>()
            .len();

        Self {
            first_beat_time,
            num_time_signature_change: scan.time_signatures.len(),
            time_signature,
            tempo,
            velocities,
        }
    }

    /// One-line JSON dump for the debug log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Single 4/4 meter starting on the very first tick: no pickup bar, no meter changes.
    pub fn is_suitable(&self) -> bool {
        if self.first_beat_time > 0.0 {
            debug!("Rejected: pickup of {:.3}s", self.first_beat_time);
            false
        } else if self.num_time_signature_change > 1 {
            debug!(
                "Rejected: {} time signature changes",
                self.num_time_signature_change
            );
            false
        } else if self.time_signature.as_deref() != Some(REQUIRED_TIME_SIGNATURE) {
            debug!("Rejected: time signature {:?}", self.time_signature);
            false
        } else {
            true
        }
    }
}

fn estimate_beat_start(scan: &MidiScan) -> f64 {
    scan.notes()
        .map(|n| n.start_tick)
        .min()
        .map(|tick| scan.tempo_map.seconds_at(tick))
        .unwrap_or(0.0)
}

pub fn midi_info<P: AsRef<Path>>(path: P) -> Result<MidiInfo> {
    let scan = read_midi(path)?;
    Ok(MidiInfo::from_scan(&scan))
}

/// Whether a MIDI file may enter the training corpus. Unreadable files are simply not suitable.
pub fn is_suitable<P: AsRef<Path>>(path: P) -> bool {
    match midi_info(path.as_ref()) {
        Ok(info) => {
            debug!("{}: {}", path.as_ref().display(), info.to_json());
            info.is_suitable()
        }
        Err(e) => {
            debug!("{}: {}", path.as_ref().display(), e);
            false
        }
    }
}
