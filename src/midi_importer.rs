use crate::model::config::PITCHES;
use crate::model::pianoroll::{Multitrack, Track};
use anyhow::{Result, anyhow};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_MPQN: u32 = 500_000;
pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
pub const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteInterval {
    pub pitch: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

/// Notes sharing a source track, channel and program.
#[derive(Debug, Clone)]
pub struct SourceInstrument {
    pub track: usize,
    pub channel: u8,
    pub program: u8,
    pub name: Option<String>,
    pub notes: Vec<NoteInterval>,
}

impl SourceInstrument {
    pub fn is_drum(&self) -> bool {
        self.channel == DRUM_CHANNEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub tick: u64,
    pub numerator: u8,
    pub denominator: u32,
}

#[derive(Debug, Clone)]
struct TempoSegment {
    pub mpqn: u32,
    pub start_tick: u64,
    pub secs_at_start: f64,
}

/// Piecewise-constant tempo over ticks.
#[derive(Debug, Clone)]
pub struct TempoMap {
    ticks_per_quarter: u64,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Build from raw (tick, microseconds-per-quarter) tempo events in any order.
    ///
    /// The map always starts at 120 BPM on tick 0. A tempo event on tick 0 replaces that
    /// default; later events only open a new segment when the tempo actually changes.
    pub fn new(ticks_per_quarter: u64, mut events: Vec<(u64, u32)>) -> Self {
        events.sort_by_key(|(tick, _)| *tick);

        let mut changes: Vec<(u64, u32)> = vec![(0, DEFAULT_MPQN)];
        for (tick, mpqn) in events {
            if tick == 0 {
                changes = vec![(0, mpqn)];
            } else if changes.last().map(|(_, last)| *last) != Some(mpqn) {
                changes.push((tick, mpqn));
            }
        }

        let mut segments: Vec<TempoSegment> = Vec::with_capacity(changes.len());
        let mut secs_accum = 0.0;
        let mut last_tick = 0u64;
        let mut last_mpqn = DEFAULT_MPQN;
        for (tick, mpqn) in changes {
            secs_accum += Self::span_secs(tick - last_tick, last_mpqn, ticks_per_quarter);
            segments.push(TempoSegment {
                mpqn,
                start_tick: tick,
                secs_at_start: secs_accum,
            });
            last_tick = tick;
            last_mpqn = mpqn;
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    fn span_secs(ticks: u64, mpqn: u32, ticks_per_quarter: u64) -> f64 {
        ticks as f64 * mpqn as f64 / ticks_per_quarter as f64 / 1_000_000.0
    }

    fn segment_at(&self, tick: u64) -> &TempoSegment {
        self.segments
            .iter()
            .rfind(|seg| seg.start_tick <= tick)
            .unwrap_or(&self.segments[0])
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        let segment = self.segment_at(tick);
        segment.secs_at_start
            + Self::span_secs(
                tick - segment.start_tick,
                segment.mpqn,
                self.ticks_per_quarter,
            )
    }

    pub fn bpm_at(&self, tick: u64) -> f64 {
        MICROSECONDS_PER_MINUTE / self.segment_at(tick).mpqn as f64
    }

    /// Number of constant-tempo segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Everything the converters need from a parsed Standard MIDI File.
#[derive(Debug, Clone)]
pub struct MidiScan {
    pub ticks_per_quarter: u64,
    pub tempo_map: TempoMap,
    pub time_signatures: Vec<TimeSignature>,
    pub instruments: Vec<SourceInstrument>,
}

impl MidiScan {
    pub fn notes(&self) -> impl Iterator<Item = &NoteInterval> {
        self.instruments.iter().flat_map(|i| i.notes.iter())
    }

    /// Quantize a tick onto a grid of `beat_resolution` steps per quarter note.
    pub fn tick_to_step(&self, tick: u64, beat_resolution: u32) -> usize {
        (tick as f64 * beat_resolution as f64 / self.ticks_per_quarter as f64).round() as usize
    }

    fn step_to_tick(&self, step: usize, beat_resolution: u32) -> u64 {
        step as u64 * self.ticks_per_quarter / beat_resolution.max(1) as u64
    }
}

pub fn read_midi<P: AsRef<Path>>(path: P) -> Result<MidiScan> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;
    scan_midi(&bytes)
}

pub fn scan_midi(bytes: &[u8]) -> Result<MidiScan> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };
    if ticks_per_quarter == 0 {
        return Err(anyhow!("MIDI header declares zero ticks per quarter note..!"));
    }

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let mut tempo_events: Vec<(u64, u32)> = Vec::new();
    let mut time_signatures: Vec<TimeSignature> = Vec::new();
    let mut instruments: Vec<SourceInstrument> = Vec::new();
    let mut last_tick: u64 = 0;

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        let mut track_name: Option<String> = None;
        let mut programs = [0u8; 16];
        let mut lookup: HashMap<(u8, u8), usize> = HashMap::new();
        let mut open_notes: HashMap<(u8, u8), Vec<OpenNote>> = HashMap::new();

        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(micro) => {
                        tempo_events.push((abs_tick, micro.as_int()));
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick,
                            micro.as_int(),
                            track_idx
                        );
                    }
                    MetaMessage::TimeSignature(numerator, denom_pow, _, _) => {
                        time_signatures.push(TimeSignature {
                            tick: abs_tick,
                            numerator: *numerator,
                            denominator: 1u32.checked_shl(*denom_pow as u32).unwrap_or(0),
                        });
                    }
                    MetaMessage::TrackName(bytes) => {
                        if track_name.is_none() {
                            let name = String::from_utf8_lossy(bytes)
                                .trim_end_matches('\0')
                                .trim()
                                .to_string();
                            if !name.is_empty() {
                                debug!("Track name: {}", name);
                                track_name = Some(name);
                            }
                        }
                    }
                    _ => {}
                },
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();

                    match message {
                        MidiMessage::ProgramChange { program } => {
                            programs[ch as usize] = program.as_int();
                        }
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let program = programs[ch as usize];
                            let instrument = *lookup.entry((ch, program)).or_insert_with(|| {
                                instruments.push(SourceInstrument {
                                    track: track_idx,
                                    channel: ch,
                                    program,
                                    name: None,
                                    notes: Vec::new(),
                                });
                                instruments.len() - 1
                            });

                            open_notes
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push(OpenNote {
                                    start_tick: abs_tick,
                                    velocity: vel.as_int(),
                                    instrument,
                                });
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            close_note(
                                &mut open_notes,
                                &mut instruments,
                                ch,
                                key.as_int(),
                                abs_tick,
                            );
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        last_tick = last_tick.max(abs_tick);

        for (&(ch, key), stack) in open_notes.iter() {
            for open in stack {
                let end_tick = if abs_tick > open.start_tick {
                    abs_tick
                } else {
                    open.start_tick + ticks_per_quarter
                };

                warn!(
                    "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                    key, ch, open.start_tick, end_tick
                );

                instruments[open.instrument].notes.push(NoteInterval {
                    pitch: key,
                    start_tick: open.start_tick,
                    end_tick,
                    velocity: open.velocity,
                });
            }
        }

        if let Some(name) = track_name {
            for instrument in instruments.iter_mut().filter(|i| i.track == track_idx) {
                instrument.name = Some(name.clone());
            }
        }
    }

    time_signatures.sort_by_key(|ts| ts.tick);
    debug!(
        "Scanned {} instrument(s), {} time signature(s), last tick {}",
        instruments.len(),
        time_signatures.len(),
        last_tick
    );

    Ok(MidiScan {
        ticks_per_quarter,
        tempo_map: TempoMap::new(ticks_per_quarter, tempo_events),
        time_signatures,
        instruments,
    })
}

struct OpenNote {
    start_tick: u64,
    velocity: u8,
    instrument: usize,
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<OpenNote>>,
    instruments: &mut [SourceInstrument],
    ch: u8,
    pitch: u8,
    abs_tick: u64,
) {
    match open_notes.get_mut(&(ch, pitch)).and_then(|stack| stack.pop()) {
        Some(open) => {
            instruments[open.instrument].notes.push(NoteInterval {
                pitch,
                start_tick: open.start_tick,
                end_tick: abs_tick,
                velocity: open.velocity,
            });
        }
        None => {
            debug!(
                "Orphaned NoteOff for {} ch{} at tick {}..!",
                pitch, ch, abs_tick
            );
        }
    }
}

/// Parse a MIDI file into one velocity piano-roll per source instrument, quantized to
/// `beat_resolution` steps per quarter note.
pub fn import_multitrack<P: AsRef<Path>>(path: P, beat_resolution: u32) -> Result<Multitrack> {
    let scan = read_midi(path.as_ref())?;
    let name = path
        .as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_default();

    Ok(scan_to_multitrack(&scan, beat_resolution, name))
}

pub fn scan_to_multitrack(scan: &MidiScan, beat_resolution: u32, name: String) -> Multitrack {
    let span = |note: &NoteInterval| {
        let start = scan.tick_to_step(note.start_tick, beat_resolution);
        let end = scan
            .tick_to_step(note.end_tick, beat_resolution)
            .max(start + 1);
        (start, end)
    };

    let time_steps = scan.notes().map(|n| span(n).1).max().unwrap_or(0);

    let tracks = scan
        .instruments
        .iter()
        .map(|instrument| {
            let mut roll = Array2::<f32>::zeros((time_steps, PITCHES));
            for note in instrument.notes.iter() {
                let (start, end) = span(note);
                for step in start..end {
                    let cell = &mut roll[[step, note.pitch as usize]];
                    *cell = cell.max(note.velocity as f32);
                }
            }

            Track {
                pianoroll: roll,
                program: instrument.program,
                is_drum: instrument.is_drum(),
                name: instrument.name.clone().unwrap_or_default(),
            }
        })
        .collect();

    let tempo = (0..time_steps)
        .map(|step| scan.tempo_map.bpm_at(scan.step_to_tick(step, beat_resolution)))
        .collect();

    let (numerator, denominator) = scan
        .time_signatures
        .first()
        .map(|ts| (ts.numerator as u32, ts.denominator))
        .unwrap_or((4, 4));
    let bar_steps = if denominator == 0 {
        beat_resolution as usize * 4
    } else {
        ((beat_resolution * numerator * 4) / denominator).max(1) as usize
    };
    let downbeat = (0..time_steps).map(|step| step % bar_steps == 0).collect();

    Multitrack {
        name,
        beat_resolution,
        tracks,
        tempo,
        downbeat,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::{FixtureTrack, scratch_dir, smf_bytes, suitable_song, write_fixture};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9
    }

    #[test]
    fn tempo_map_rules() {
        env_logger::try_init().unwrap_or(());

        let map = TempoMap::new(480, vec![]);
        assert_eq!(map.len(), 1);
        assert!(approx_eq(map.bpm_at(10_000), 120.0));
        assert!(approx_eq(map.seconds_at(480), 0.5));

        // tick 0 replaces the default, a repeated tempo is not a change
        let map = TempoMap::new(480, vec![(960, 1_000_000), (0, 1_000_000)]);
        assert_eq!(map.len(), 1);
        assert!(approx_eq(map.bpm_at(0), 60.0));

        let map = TempoMap::new(480, vec![(960, 1_000_000)]);
        assert_eq!(map.len(), 2);
        assert!(approx_eq(map.seconds_at(960), 1.0));
        assert!(approx_eq(map.seconds_at(1440), 2.0));
        assert!(approx_eq(map.bpm_at(1440), 60.0));
    }

    #[test]
    fn scan_collects_instruments() {
        env_logger::try_init().unwrap_or(());

        let bytes = smf_bytes(
            480,
            &[(0, 500_000)],
            &[(0, 4, 4)],
            &[
                FixtureTrack::new(0, 0, &[(60, 0, 480, 100), (64, 480, 960, 90)]),
                FixtureTrack::new(33, 1, &[(40, 0, 1920, 80)]),
                FixtureTrack::new(0, DRUM_CHANNEL, &[(36, 0, 120, 127)]),
            ],
        );
        let scan = scan_midi(&bytes).unwrap();

        assert_eq!(scan.ticks_per_quarter, 480);
        assert_eq!(scan.time_signatures.len(), 1);
        assert_eq!(scan.time_signatures[0].denominator, 4);
        assert_eq!(scan.instruments.len(), 3);
        assert_eq!(scan.instruments[0].notes.len(), 2);
        assert_eq!(scan.instruments[1].program, 33);
        assert!(scan.instruments[2].is_drum());
    }

    #[test]
    fn multitrack_quantizes_to_sixteenths() {
        env_logger::try_init().unwrap_or(());

        let bytes = smf_bytes(
            480,
            &[(0, 500_000)],
            &[(0, 4, 4)],
            &[FixtureTrack::new(
                0,
                0,
                &[(60, 0, 480, 100), (62, 480, 500, 70), (64, 1800, 1920, 90)],
            )],
        );
        let scan = scan_midi(&bytes).unwrap();
        let multitrack = scan_to_multitrack(&scan, 4, "fixture.mid".into());

        assert_eq!(multitrack.time_steps(), 16);
        assert_eq!(multitrack.tempo.len(), 16);
        assert!(multitrack.downbeat[0]);
        assert!(!multitrack.downbeat[4]);

        let roll = &multitrack.tracks[0].pianoroll;
        assert!((0..4).all(|t| roll[[t, 60]] == 100.0));
        assert_eq!(roll[[4, 60]], 0.0);
        // a note shorter than one step still occupies one step
        assert_eq!(roll[[4, 62]], 70.0);
        assert_eq!(roll[[5, 62]], 0.0);
        assert_eq!(roll[[15, 64]], 90.0);
    }

    #[test]
    fn unclosed_notes_are_auto_closed() {
        env_logger::try_init().unwrap_or(());

        let mut track = FixtureTrack::new(0, 0, &[(60, 0, 960, 100)]);
        track.dangling.push((67, 480, 100));
        let scan = scan_midi(&smf_bytes(480, &[], &[], &[track])).unwrap();

        let notes: Vec<_> = scan.notes().collect();
        assert_eq!(notes.len(), 2);
        let dangling = notes.iter().find(|n| n.pitch == 67).unwrap();
        assert_eq!(dangling.end_tick, 960);
    }

    #[test]
    fn import_from_disk() {
        env_logger::try_init().unwrap_or(());

        let path = scratch_dir("importer").join("song.mid");
        write_fixture(&path, &suitable_song());

        let multitrack = import_multitrack(&path, 4).unwrap();
        assert_eq!(multitrack.name, "song.mid");
        assert_eq!(multitrack.beat_resolution, 4);
        assert_eq!(multitrack.tracks.len(), 2);
        assert_eq!(multitrack.time_steps(), 128);
        assert_eq!(multitrack.tracks[1].program, 33);
        assert_eq!(multitrack.downbeat.iter().filter(|d| **d).count(), 8);
        assert!(multitrack.tempo.iter().all(|bpm| approx_eq(*bpm, 120.0)));

        assert!(import_multitrack(path.with_file_name("missing.mid"), 4).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        env_logger::try_init().unwrap_or(());
        assert!(scan_midi(b"definitely not a midi file").is_err());
    }
}
