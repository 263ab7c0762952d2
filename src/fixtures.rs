//! In-memory MIDI fixtures for the unit tests.

use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs;
use std::path::{Path, PathBuf};

pub struct FixtureTrack {
    pub program: u8,
    pub channel: u8,
    /// (pitch, start_tick, end_tick, velocity)
    pub notes: Vec<(u8, u32, u32, u8)>,
    /// (pitch, start_tick, velocity), never released
    pub dangling: Vec<(u8, u32, u8)>,
}

impl FixtureTrack {
    pub fn new(program: u8, channel: u8, notes: &[(u8, u32, u32, u8)]) -> Self {
        Self {
            program,
            channel,
            notes: notes.to_vec(),
            dangling: Vec::new(),
        }
    }
}

fn to_delta(mut events: Vec<(u32, u8, TrackEventKind<'static>)>) -> Vec<TrackEvent<'static>> {
    // the middle key orders simultaneous events: meta, program, note-off, note-on
    events.sort_by_key(|(tick, order, _)| (*tick, *order));

    let mut last = 0u32;
    let mut track: Vec<TrackEvent<'static>> = events
        .into_iter()
        .map(|(tick, _, kind)| {
            let delta = tick - last;
            last = tick;
            TrackEvent {
                delta: u28::new(delta),
                kind,
            }
        })
        .collect();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

/// Encode a format-1 file: a conductor track followed by one track per fixture.
pub fn smf_bytes(
    ticks_per_quarter: u16,
    tempos: &[(u32, u32)],
    time_signatures: &[(u32, u8, u8)],
    tracks: &[FixtureTrack],
) -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));

    let mut conductor = Vec::new();
    for &(tick, mpqn) in tempos {
        conductor.push((
            tick,
            0,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(mpqn))),
        ));
    }
    for &(tick, numerator, denominator) in time_signatures {
        conductor.push((
            tick,
            0,
            TrackEventKind::Meta(MetaMessage::TimeSignature(
                numerator,
                denominator.trailing_zeros() as u8,
                24,
                8,
            )),
        ));
    }
    smf.tracks.push(to_delta(conductor));

    for fixture in tracks {
        let channel = u4::new(fixture.channel);
        let mut events = vec![(
            0,
            1,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(fixture.program),
                },
            },
        )];

        for &(pitch, start, end, velocity) in fixture.notes.iter() {
            events.push((
                start,
                3,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key: u7::new(pitch),
                        vel: u7::new(velocity),
                    },
                },
            ));
            events.push((
                end,
                2,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key: u7::new(pitch),
                        vel: u7::new(0),
                    },
                },
            ));
        }
        for &(pitch, start, velocity) in fixture.dangling.iter() {
            events.push((
                start,
                3,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key: u7::new(pitch),
                        vel: u7::new(velocity),
                    },
                },
            ));
        }

        smf.tracks.push(to_delta(events));
    }

    let mut buf = Vec::new();
    smf.write(&mut buf)
        .expect("writing a fixture into memory cannot fail");
    buf
}

/// A clean scratch directory unique to this test process.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("midiroll-tests")
        .join(format!("{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

pub fn write_fixture(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create fixture dir");
    }
    fs::write(path, bytes).expect("failed to write fixture");
}

/// Eight bars of 4/4 at 120 BPM with a piano line and a bass line.
pub fn suitable_song() -> Vec<u8> {
    let piano: Vec<_> = (0..32u32)
        .map(|beat| (60 + (beat % 12) as u8, beat * 480, beat * 480 + 240, 100))
        .collect();
    let bass: Vec<_> = (0..8u32)
        .map(|bar| (36 + bar as u8, bar * 1920, bar * 1920 + 1920, 90))
        .collect();

    smf_bytes(
        480,
        &[(0, 500_000)],
        &[(0, 4, 4)],
        &[
            FixtureTrack::new(0, 0, &piano),
            FixtureTrack::new(33, 1, &bass),
        ],
    )
}
