//! Decoded audio and beat grids handed to the players
//!
//! Both are immutable once built. The engine shares them through
//! `basedrop::Shared` so the last release never happens on the render thread.

use crate::types::{Sample, StereoSample};

/// Decoded stereo audio at a fixed sample rate
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<StereoSample>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<StereoSample>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Build from interleaved [L, R, L, R, ...] data; a trailing odd sample is dropped
    pub fn from_interleaved(interleaved: &[Sample], sample_rate: u32) -> Self {
        let samples = interleaved
            .chunks_exact(2)
            .map(|chunk| StereoSample::new(chunk[0], chunk[1]))
            .collect();
        Self { samples, sample_rate }
    }

    /// Length in frames
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Frame at `frame`, or silence outside the buffer
    #[inline]
    pub fn sample(&self, frame: i64) -> StereoSample {
        if frame < 0 {
            return StereoSample::silence();
        }
        self.samples
            .get(frame as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Single channel value (0 = left, anything else = right)
    #[inline]
    pub fn channel(&self, frame: i64, channel: usize) -> Sample {
        let sample = self.sample(frame);
        if channel == 0 {
            sample.left
        } else {
            sample.right
        }
    }

    pub fn samples(&self) -> &[StereoSample] {
        &self.samples
    }
}

/// Sorted beat onsets of a track, in frames
#[derive(Debug, Clone, Default)]
pub struct BeatBuffer {
    beats: Vec<f64>,
    median: Option<f64>,
}

impl BeatBuffer {
    /// Build from onset frames; non-finite values are dropped and the rest sorted
    pub fn new(mut beats: Vec<f64>) -> Self {
        beats.retain(|b| b.is_finite());
        beats.sort_by(f64::total_cmp);
        let median = median_of_distances(&beats);
        Self { beats, median }
    }

    /// A constant-tempo grid starting at `first_frame` and covering `len_frames`
    pub fn constant(bpm: f64, sample_rate: u32, first_frame: f64, len_frames: usize) -> Self {
        if bpm <= 0.0 || sample_rate == 0 {
            return Self::default();
        }
        let spacing = 60.0 * sample_rate as f64 / bpm;
        let mut beats = Vec::new();
        let mut frame = first_frame;
        while frame < len_frames as f64 {
            beats.push(frame);
            frame += spacing;
        }
        Self::new(beats)
    }

    /// Parse a comma-separated list of onset frames
    pub fn from_csv(csv: &str) -> Self {
        Self::new(
            csv.split(',')
                .filter_map(|s| s.trim().parse::<f64>().ok())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn beats(&self) -> &[f64] {
        &self.beats
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.beats.get(index).copied()
    }

    /// Median distance between consecutive onsets, in frames
    ///
    /// `None` with fewer than two beats.
    pub fn median_distance(&self) -> Option<f64> {
        self.median
    }

    /// Index of the last beat at or before `frame`
    pub fn beat_index_at(&self, frame: f64) -> Option<usize> {
        let after = self.beats.partition_point(|&b| b <= frame);
        after.checked_sub(1)
    }

    /// Onset closest to `frame`
    pub fn nearest_beat(&self, frame: f64) -> Option<f64> {
        let after = self.beats.partition_point(|&b| b <= frame);
        let before = after.checked_sub(1).map(|i| self.beats[i]);
        let next = self.beats.get(after).copied();
        match (before, next) {
            (Some(b), Some(n)) => Some(if frame - b <= n - frame { b } else { n }),
            (Some(b), None) => Some(b),
            (None, n) => n,
        }
    }

    /// Length of the beat containing `frame`
    ///
    /// Outside the grid the median distance is used.
    pub fn beat_length_at(&self, frame: f64) -> Option<f64> {
        let median = self.median?;
        match self.beat_index_at(frame) {
            Some(i) if i + 1 < self.beats.len() => Some(self.beats[i + 1] - self.beats[i]),
            _ => Some(median),
        }
    }

    /// Fractional beat index of `frame`, extrapolated past either end
    pub fn beats_at_frame(&self, frame: f64) -> Option<f64> {
        let median = self.median?;
        let first = self.beats[0];
        let last = self.beats[self.beats.len() - 1];
        if frame < first {
            return Some((frame - first) / median);
        }
        if frame >= last {
            return Some((self.beats.len() - 1) as f64 + (frame - last) / median);
        }
        let i = self.beat_index_at(frame)?;
        let span = self.beats[i + 1] - self.beats[i];
        Some(i as f64 + (frame - self.beats[i]) / span)
    }

    /// Frame of a fractional beat index, extrapolated past either end
    pub fn frame_at_beats(&self, beats: f64) -> Option<f64> {
        let median = self.median?;
        let last_index = (self.beats.len() - 1) as f64;
        if beats < 0.0 {
            return Some(self.beats[0] + beats * median);
        }
        if beats >= last_index {
            return Some(self.beats[self.beats.len() - 1] + (beats - last_index) * median);
        }
        let i = beats.floor() as usize;
        let frac = beats - i as f64;
        Some(self.beats[i] + frac * (self.beats[i + 1] - self.beats[i]))
    }
}

fn median_of_distances(beats: &[f64]) -> Option<f64> {
    if beats.len() < 2 {
        return None;
    }
    let mut distances: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
    distances.sort_by(f64::total_cmp);
    let mid = distances.len() / 2;
    let median = if distances.len() % 2 == 0 {
        (distances[mid - 1] + distances[mid]) / 2.0
    } else {
        distances[mid]
    };
    (median > 0.0).then_some(median)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_sample_out_of_range_is_silent() {
        let audio = AudioBuffer::from_interleaved(&[0.5, -0.5, 1.0, -1.0], 44100);
        assert_eq!(audio.len(), 2);
        assert_eq!(audio.sample(1), StereoSample::new(1.0, -1.0));
        assert_eq!(audio.channel(0, 1), -0.5);
        assert_eq!(audio.sample(2), StereoSample::silence());
        assert_eq!(audio.sample(-1), StereoSample::silence());
    }

    #[test]
    fn test_median_distance() {
        let grid = BeatBuffer::from_csv("0, 22050, 44100, 70000, 88200");
        // distances 22050, 22050, 25900, 18200 -> median of middle two
        assert_eq!(grid.median_distance(), Some(22050.0));
        assert!(BeatBuffer::from_csv("100").median_distance().is_none());
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let grid = BeatBuffer::new(vec![44100.0, 0.0, f64::NAN, 22050.0]);
        assert_eq!(grid.beats(), &[0.0, 22050.0, 44100.0]);
    }

    #[test]
    fn test_beat_lookup() {
        let grid = BeatBuffer::constant(120.0, 44100, 1000.0, 100_000);
        assert_eq!(grid.beat_index_at(500.0), None);
        assert_eq!(grid.beat_index_at(1000.0), Some(0));
        assert_eq!(grid.beat_index_at(23049.0), Some(0));
        assert_eq!(grid.beat_index_at(23050.0), Some(1));
        assert_eq!(grid.nearest_beat(12000.0), Some(1000.0));
        assert_eq!(grid.nearest_beat(13000.0), Some(23050.0));
    }

    #[test]
    fn test_beats_frames_inverse() {
        let grid = BeatBuffer::constant(120.0, 44100, 0.0, 44100 * 4);
        assert_eq!(grid.beats_at_frame(33075.0), Some(1.5));
        assert_eq!(grid.frame_at_beats(1.5), Some(33075.0));
        // Past the end extrapolates with the median
        let last = grid.len() as f64 - 1.0;
        let frame = grid.frame_at_beats(last + 2.0).unwrap();
        assert_eq!(grid.beats_at_frame(frame), Some(last + 2.0));
        assert_eq!(grid.frame_at_beats(-1.0), Some(-22050.0));
    }
}
