use crate::error::ConvertError;
use crate::midi_importer::{DRUM_CHANNEL, MICROSECONDS_PER_MINUTE};
use crate::model::config::{ConvertConfig, PITCHES};
use crate::model::note::{Instrument, Note};
use crate::util::family_name;
use anyhow::{Result, anyhow};
use log::{debug, info};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use ndarray::{Array2, Array3, Array4, ArrayView2, Axis, s};
use std::fs;
use std::path::Path;

pub const TICKS_PER_QUARTER: u16 = 480;
/// Largest microseconds-per-quarter a Set Tempo event can hold (24 bits).
pub const MAX_MPQN: u32 = 0x00FF_FFFF;

/// Re-embed a clamped (segments, time, pitches, tracks) batch into the full 128-pitch range,
/// with `pitch_beg` silent pitches below and whatever remains above.
pub fn restore_pitch_range(
    segments: &Array4<f32>,
    pitch_beg: usize,
) -> Result<Array4<f32>, ConvertError> {
    let (n, len, pitches, tracks) = segments.dim();
    if pitch_beg + pitches > PITCHES {
        return Err(ConvertError::PitchWidth {
            expected: PITCHES - pitch_beg,
            found: pitches,
        });
    }

    let mut full = Array4::zeros((n, len, PITCHES, tracks));
    full.slice_mut(s![.., .., pitch_beg..pitch_beg + pitches, ..])
        .assign(segments);
    Ok(full)
}

/// Join segments end to end into one (time, pitches, tracks) roll.
pub fn flatten_segments(segments: Array4<f32>) -> Array3<f32> {
    let (n, len, pitches, tracks) = segments.dim();
    segments
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n * len, pitches, tracks))
        .unwrap_or_else(|_| Array3::zeros((n * len, pitches, tracks)))
}

/// Map a [0, 1] intensity onto a MIDI velocity.
pub fn scale_velocity(intensity: f32) -> u8 {
    ((intensity * 128.0) as i32).clamp(0, 127) as u8
}

/// Drop notes that are quantization artifacts of an earlier note.
///
/// `spans` are the (start, end) times of one pitch's notes, sorted by start. Walking forward
/// from each surviving note, every later note that starts before `start + threshold` and ends
/// at or before `start + threshold` is suppressed. Returns the indices of the survivors.
pub fn suppress_quantization_artifacts(spans: &[(f64, f64)], threshold: f64) -> Vec<usize> {
    let mut kept = vec![true; spans.len()];

    for i in 0..spans.len().saturating_sub(1) {
        if !kept[i] {
            continue;
        }

        let window_end = spans[i].0 + threshold;
        for j in (i + 1)..spans.len() {
            if kept[j] && spans[j].0 < window_end && spans[j].1 <= window_end {
                debug!(
                    "Suppressing artifact note {:.4}..{:.4} behind note at {:.4}",
                    spans[j].0, spans[j].1, spans[i].0
                );
                kept[j] = false;
            }
        }
    }

    kept.iter()
        .enumerate()
        .filter_map(|(idx, keep)| keep.then_some(idx))
        .collect()
}

/// Pixel indices where each pitch turns on and off.
fn onsets_and_offsets(velocities: &Array2<u8>, pitch: usize) -> (Vec<usize>, Vec<usize>) {
    let mut onsets = Vec::new();
    let mut offsets = Vec::new();
    let mut previous = 0u8;

    let column = velocities.column(pitch);
    for (px, &v) in column.iter().chain(std::iter::once(&0u8)).enumerate() {
        if previous == 0 && v > 0 {
            onsets.push(px);
        } else if previous > 0 && v == 0 {
            offsets.push(px);
        }
        previous = v;
    }

    (onsets, offsets)
}

/// Reconstruct the notes of one (time, 128) intensity roll.
pub fn piano_roll_to_notes(roll: ArrayView2<f32>, tempo: f64, beat_resolution: u32) -> Vec<Note> {
    let tpp = 60.0 / tempo / beat_resolution as f64;
    let threshold = 60.0 / tempo / 4.0;
    let phrase_end_time = roll.nrows() as f64 * tpp;

    let velocities = roll.mapv(scale_velocity);
    let mut notes: Vec<Note> = Vec::new();

    for pitch in 0..roll.ncols().min(PITCHES) {
        let (mut onsets, offsets) = onsets_and_offsets(&velocities, pitch);
        if onsets.is_empty() {
            continue;
        }
        if offsets.len() < onsets.len() {
            onsets.truncate(offsets.len());
        }

        let spans: Vec<(f64, f64)> = onsets
            .iter()
            .zip(offsets.iter())
            .map(|(&on, &off)| (on as f64 * tpp, off as f64 * tpp))
            .collect();

        let survivors = suppress_quantization_artifacts(&spans, threshold);
        for (k, &idx) in survivors.iter().enumerate() {
            let (start, mut end) = spans[idx];
            if end - start < threshold {
                // never stretch into the next note on this pitch
                let limit = survivors
                    .get(k + 1)
                    .map_or(phrase_end_time, |&next| spans[next].0.min(phrase_end_time));
                end = (start + threshold).min(limit).max(end);
            }

            notes.push(Note {
                pitch: pitch as u8,
                start,
                end,
                velocity: velocities[[onsets[idx], pitch]],
            });
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start));
    notes
}

/// Build one instrument per roll. The three lists must line up track for track.
pub fn piano_rolls_to_instruments(
    piano_rolls: &[Array2<f32>],
    program_nums: &[u8],
    is_drum: &[bool],
    tempo: f64,
    beat_resolution: u32,
) -> Result<Vec<Instrument>, ConvertError> {
    if piano_rolls.len() != program_nums.len() || piano_rolls.len() != is_drum.len() {
        return Err(ConvertError::ShapeMismatch {
            rolls: piano_rolls.len(),
            programs: program_nums.len(),
            drums: is_drum.len(),
        });
    }

    Ok(piano_rolls
        .iter()
        .zip(program_nums.iter().zip(is_drum.iter()))
        .map(|(roll, (&program, &drum))| {
            let mut instrument = Instrument::new(program, drum, family_name(program));
            instrument.notes = piano_roll_to_notes(roll.view(), tempo, beat_resolution);
            debug!(
                "Reconstructed {} note(s) for program {}",
                instrument.notes.len(),
                program
            );
            instrument
        })
        .collect())
}

fn tempo_to_mpqn(tempo: f64) -> u32 {
    (MICROSECONDS_PER_MINUTE / tempo).round() as u32
}

fn seconds_to_tick(seconds: f64, tempo: f64) -> u32 {
    (seconds * tempo / 60.0 * TICKS_PER_QUARTER as f64).round().max(0.0) as u32
}

/// Lay the instruments out as a format-1 file at a single tempo.
pub fn instruments_to_smf(instruments: &[Instrument], tempo: f64) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let mpqn = tempo_to_mpqn(tempo).min(MAX_MPQN);
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(mpqn))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let mut melodic_channels = (0u8..16).filter(|c| *c != DRUM_CHANNEL).cycle();

    for instrument in instruments {
        let channel = if instrument.is_drum {
            u4::new(DRUM_CHANNEL)
        } else {
            u4::new(melodic_channels.next().unwrap_or(0))
        };

        // (tick, note-offs before note-ons, event)
        let mut events: Vec<(u32, u8, TrackEventKind<'static>)> = vec![
            (
                0,
                0,
                TrackEventKind::Meta(MetaMessage::TrackName(
                    family_name(instrument.program).as_bytes(),
                )),
            ),
            (
                0,
                0,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(instrument.program.min(127)),
                    },
                },
            ),
        ];

        for note in instrument.notes.iter() {
            let key = u7::new(note.pitch.min(127));
            events.push((
                seconds_to_tick(note.start, tempo),
                2,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key,
                        vel: u7::new(note.velocity.min(127)),
                    },
                },
            ));
            events.push((
                seconds_to_tick(note.end, tempo),
                1,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key,
                        vel: u7::new(0),
                    },
                },
            ));
        }

        events.sort_by_key(|(tick, order, _)| (*tick, *order));

        let mut last_tick = 0u32;
        let mut track: Vec<TrackEvent<'static>> = Vec::with_capacity(events.len() + 1);
        for (tick, _, kind) in events {
            track.push(TrackEvent {
                delta: u28::new(tick - last_tick),
                kind,
            });
            last_tick = tick;
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        smf.tracks.push(track);
    }

    smf
}

/// Reconstruct a multi-instrument MIDI file from per-track (time, 128) intensity rolls.
///
/// Nothing is written when the three lists disagree in length.
pub fn write_piano_rolls_to_midi<P: AsRef<Path>>(
    piano_rolls: &[Array2<f32>],
    program_nums: &[u8],
    is_drum: &[bool],
    path: P,
    tempo: f64,
    beat_resolution: u32,
) -> Result<()> {
    if !(tempo.is_finite() && tempo > 0.0) {
        return Err(anyhow!("Tempo must be a positive number of BPM, got {}", tempo));
    }
    if tempo_to_mpqn(tempo) > MAX_MPQN {
        return Err(anyhow!(
            "Tempo {} BPM is too slow for a MIDI Set Tempo event",
            tempo
        ));
    }

    let instruments =
        piano_rolls_to_instruments(piano_rolls, program_nums, is_drum, tempo, beat_resolution)?;
    let smf = instruments_to_smf(&instruments, tempo);

    if let Some(parent) = path.as_ref().parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    smf.save(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    info!(
        "Wrote {} with {} instrument(s), {} note(s)",
        path.as_ref().display(),
        instruments.len(),
        instruments.iter().map(|i| i.notes.len()).sum::<usize>()
    );
    Ok(())
}

/// Turn a batch of clamped segments (segments, time, pitches, tracks) back into one
/// MIDI file with one melodic instrument per track.
pub fn save_midis<P: AsRef<Path>>(
    segments: &Array4<f32>,
    path: P,
    programs: &[u8],
    tempo: f64,
    cfg: &ConvertConfig,
) -> Result<()> {
    let tracks = segments.len_of(Axis(3));
    if programs.len() != tracks {
        return Err(ConvertError::ShapeMismatch {
            rolls: tracks,
            programs: programs.len(),
            drums: tracks,
        }
        .into());
    }

    let full = restore_pitch_range(segments, cfg.pitch_beg)?;
    let flat = flatten_segments(full);
    let piano_rolls: Vec<Array2<f32>> = flat
        .axis_iter(Axis(2))
        .map(|roll| roll.to_owned())
        .collect();

    write_piano_rolls_to_midi(
        &piano_rolls,
        programs,
        &vec![false; programs.len()],
        path,
        tempo,
        cfg.beat_resolution,
    )
}
