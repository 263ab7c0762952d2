use crate::model::config::PITCHES;
use crate::model::instrumentation::Instrumentation;
use log::debug;
use ndarray::{Array2, Array3, Axis, Zip, stack};

/// One instrument's piano-roll, shaped (time, 128).
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub pianoroll: Array2<f32>,
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
}

impl Track {
    pub fn empty(time_steps: usize, program: u8, name: impl Into<String>) -> Self {
        Self {
            pianoroll: Array2::zeros((time_steps, PITCHES)),
            program,
            is_drum: false,
            name: name.into(),
        }
    }

    pub fn time_steps(&self) -> usize {
        self.pianoroll.nrows()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Multitrack {
    pub name: String,
    pub beat_resolution: u32,
    pub tracks: Vec<Track>,
    /// Tempo in BPM at every time step.
    pub tempo: Vec<f64>,
    /// True at every time step that starts a bar.
    pub downbeat: Vec<bool>,
}

impl Multitrack {
    pub fn time_steps(&self) -> usize {
        self.tracks
            .iter()
            .map(Track::time_steps)
            .max()
            .unwrap_or(self.tempo.len())
    }

    /// Element-wise maximum over the selected tracks.
    pub fn merged_pianoroll(&self, indices: &[usize]) -> Array2<f32> {
        let mut merged = Array2::<f32>::zeros((self.time_steps(), PITCHES));
        for &idx in indices {
            let roll = &self.tracks[idx].pianoroll;
            let rows = roll.nrows();
            Zip::from(merged.slice_mut(ndarray::s![..rows, ..]))
                .and(roll)
                .for_each(|m, &v| *m = m.max(v));
        }
        merged
    }

    /// Collapse the source tracks into one track per bucket, in bucket order.
    /// Drum tracks are dropped; buckets with no sources become silent tracks.
    pub fn merge(&self, instrumentation: &Instrumentation) -> Multitrack {
        let mut categories: Vec<Vec<usize>> = vec![Vec::new(); instrumentation.len()];

        for (idx, track) in self.tracks.iter().enumerate() {
            if track.is_drum {
                debug!("Dropping drum track '{}'", track.name);
                continue;
            }
            categories[instrumentation.bucket_for(track.program)].push(idx);
        }

        let time_steps = self.time_steps();
        let tracks = instrumentation
            .buckets
            .iter()
            .zip(categories.iter())
            .map(|(bucket, indices)| {
                if indices.is_empty() {
                    Track::empty(time_steps, bucket.program, bucket.name.clone())
                } else {
                    debug!(
                        "Merging {} source track(s) into '{}'",
                        indices.len(),
                        bucket.name
                    );
                    Track {
                        pianoroll: self.merged_pianoroll(indices),
                        program: bucket.program,
                        is_drum: false,
                        name: bucket.name.clone(),
                    }
                }
            })
            .collect();

        Multitrack {
            name: self.name.clone(),
            beat_resolution: self.beat_resolution,
            tracks,
            tempo: self.tempo.clone(),
            downbeat: self.downbeat.clone(),
        }
    }

    /// Any positive intensity becomes 1.
    pub fn binarize(&mut self) {
        for track in self.tracks.iter_mut() {
            track.pianoroll.mapv_inplace(|v| if v > 0.0 { 1.0 } else { 0.0 });
        }
    }

    /// Stack every track into a (time, 128, tracks) tensor.
    pub fn stacked_pianoroll(&self) -> Array3<f32> {
        let time_steps = self.time_steps();
        if self.tracks.is_empty() {
            return Array3::zeros((time_steps, PITCHES, 0));
        }

        let padded: Vec<Array2<f32>> = self
            .tracks
            .iter()
            .map(|t| {
                let mut roll = Array2::zeros((time_steps, PITCHES));
                roll.slice_mut(ndarray::s![..t.time_steps(), ..])
                    .assign(&t.pianoroll);
                roll
            })
            .collect();
        let views: Vec<_> = padded.iter().map(|r| r.view()).collect();

        // Every view has the same shape, so stacking cannot fail.
        stack(Axis(2), &views).unwrap_or_else(|_| Array3::zeros((time_steps, PITCHES, 0)))
    }
}
