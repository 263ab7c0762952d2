use crate::error::ConvertError;
use crate::model::config::ConvertConfig;
use log::debug;
use ndarray::{Array3, Array4, Axis, concatenate, s};

/// What to do with a trailing partial segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LastBarMode {
    /// Zero-pad up to the next full segment.
    Fill,

    /// Drop the incomplete tail.
    #[default]
    Remove,

    /// Leave the time axis untouched. Segmenting then fails unless it already divides evenly.
    Keep,
}

/// Slice the pitch axis of a (time, 128, tracks) roll down to `[pitch_beg, pitch_end)`.
pub fn clamp_pitch(pianoroll: &Array3<f32>, cfg: &ConvertConfig) -> Array3<f32> {
    pianoroll
        .slice(s![.., cfg.pitch_beg..cfg.pitch_end, ..])
        .to_owned()
}

pub fn pad(pianoroll: Array3<f32>, mode: LastBarMode, segment_len: usize) -> Array3<f32> {
    let len = pianoroll.len_of(Axis(0));
    let remainder = len % segment_len;
    if remainder == 0 {
        return pianoroll;
    }

    match mode {
        LastBarMode::Fill => {
            let (_, pitches, tracks) = pianoroll.dim();
            let bubble = Array3::zeros((segment_len - remainder, pitches, tracks));
            debug!("Padding {} time steps", segment_len - remainder);
            // shapes agree on every axis but time
            let padded = concatenate(Axis(0), &[pianoroll.view(), bubble.view()]);
            padded.unwrap_or(pianoroll)
        }
        LastBarMode::Remove => {
            debug!("Trimming {} time steps", remainder);
            pianoroll.slice(s![..len - remainder, .., ..]).to_owned()
        }
        LastBarMode::Keep => pianoroll,
    }
}

/// Cut the time axis into consecutive (segment_len, pitches, tracks) blocks.
pub fn reshape_to_segments(
    pianoroll: Array3<f32>,
    segment_len: usize,
) -> Result<Array4<f32>, ConvertError> {
    let (len, pitches, tracks) = pianoroll.dim();
    if segment_len == 0 || len % segment_len != 0 {
        return Err(ConvertError::IndivisibleTimeAxis { len, segment_len });
    }

    let standard = pianoroll.as_standard_layout().into_owned();
    standard
        .into_shape_with_order((len / segment_len, segment_len, pitches, tracks))
        .map_err(|_| ConvertError::IndivisibleTimeAxis { len, segment_len })
}

/// Clamp, pad/trim and segment a (time, 128, tracks) roll.
pub fn split(
    pianoroll: &Array3<f32>,
    mode: LastBarMode,
    cfg: &ConvertConfig,
) -> Result<Array4<f32>, ConvertError> {
    let clamped = clamp_pitch(pianoroll, cfg);
    let padded = pad(clamped, mode, cfg.segment_len());
    reshape_to_segments(padded, cfg.segment_len())
}

#[cfg(test)]
mod test {
    use super::*;

    fn roll(len: usize) -> Array3<f32> {
        Array3::from_shape_fn((len, 128, 4), |(t, p, k)| ((t * 7 + p * 3 + k) % 5) as f32)
    }

    #[test]
    fn clamps_to_84_pitches() {
        let cfg = ConvertConfig::default();
        let mut full = Array3::zeros((4, 128, 4));
        full[[0, 23, 0]] = 1.0;
        full[[1, 24, 1]] = 1.0;
        full[[2, 107, 2]] = 1.0;
        full[[3, 108, 3]] = 1.0;

        let clamped = clamp_pitch(&full, &cfg);
        assert_eq!(clamped.shape(), &[4, 84, 4]);
        assert_eq!(clamped[[1, 0, 1]], 1.0);
        assert_eq!(clamped[[2, 83, 2]], 1.0);
        assert_eq!(clamped.sum(), 2.0);
    }

    #[test]
    fn fill_pads_to_next_multiple_with_zeros() {
        for len in [1, 63, 65, 100, 127] {
            let input = Array3::from_elem((len, 84, 4), 1.0f32);
            let padded = pad(input, LastBarMode::Fill, 64);

            let expected = len.div_ceil(64) * 64;
            assert_eq!(padded.len_of(Axis(0)), expected);
            assert_eq!(padded.slice(s![..len, .., ..]).sum(), (len * 84 * 4) as f32);
            assert_eq!(padded.slice(s![len.., .., ..]).sum(), 0.0);
        }
    }

    #[test]
    fn remove_trims_tail() {
        for len in [1, 63, 65, 100, 129] {
            let input = Array3::from_shape_fn((len, 84, 4), |(t, _, _)| t as f32);
            let trimmed = pad(input.clone(), LastBarMode::Remove, 64);

            let expected = (len / 64) * 64;
            assert_eq!(trimmed.len_of(Axis(0)), expected);
            assert_eq!(trimmed, input.slice(s![..expected, .., ..]));
        }
    }

    #[test]
    fn keep_passes_through_then_segmenting_fails() {
        let input = Array3::<f32>::zeros((70, 84, 4));
        let kept = pad(input.clone(), LastBarMode::Keep, 64);
        assert_eq!(kept, input);

        assert_eq!(
            reshape_to_segments(kept, 64),
            Err(ConvertError::IndivisibleTimeAxis {
                len: 70,
                segment_len: 64
            })
        );
    }

    #[test]
    fn segments_concatenate_back_to_original() {
        let cfg = ConvertConfig::default();
        let original = clamp_pitch(&roll(192), &cfg);

        let segments = split(&roll(192), LastBarMode::Keep, &cfg).unwrap();
        assert_eq!(segments.shape(), &[3, 64, 84, 4]);

        let views: Vec<_> = segments.outer_iter().collect();
        let rejoined = concatenate(Axis(0), &views).unwrap();
        assert_eq!(rejoined, original);
        assert_eq!(segments.slice(s![1, 0, .., ..]), original.slice(s![64, .., ..]));
    }

    #[test]
    fn empty_roll_has_no_segments() {
        let cfg = ConvertConfig::default();
        let segments = split(&Array3::zeros((0, 128, 4)), LastBarMode::Fill, &cfg).unwrap();
        assert_eq!(segments.shape(), &[0, 64, 84, 4]);
    }
}
