//! Synthetic beat-gridded tracks
//!
//! Stand-ins for decoded files: a decaying kick on every beat over a
//! sustained tone, with a beat grid that matches exactly.

use std::f32::consts::TAU;

use jockey_core::buffers::{AudioBuffer, BeatBuffer};
use jockey_core::error::LoadResult;
use jockey_core::loader::{BufferSource, DecodedTrack};
use jockey_core::StereoSample;

/// Frames generated between progress reports
const CHUNK_FRAMES: usize = 16 * 1024;

pub struct SyntheticTrack {
    name: String,
    bpm: f64,
    bars: u32,
    tone_hz: f32,
    sample_rate: u32,
}

impl SyntheticTrack {
    pub fn new(name: &str, bpm: f64, bars: u32, tone_hz: f32, sample_rate: u32) -> Self {
        Self {
            name: name.to_string(),
            bpm,
            bars,
            tone_hz,
            sample_rate,
        }
    }

    fn beat_frames(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.bpm
    }

    fn len_frames(&self) -> usize {
        (self.beat_frames() * 4.0 * self.bars as f64).round() as usize
    }

    fn frame(&self, frame: usize) -> StereoSample {
        let sr = self.sample_rate as f32;
        let beat = self.beat_frames();
        let since_beat = (frame as f64 % beat) as f32 / sr;

        // Kick: pitch-swept sine with a fast decay
        let kick = (TAU * (50.0 + 100.0 * (-since_beat * 30.0).exp()) * since_beat).sin()
            * (-since_beat * 12.0).exp();
        let tone = (TAU * self.tone_hz * frame as f32 / sr).sin() * 0.15;

        // Tone leans slightly right so the channels differ
        StereoSample::new(kick * 0.6 + tone * 0.8, kick * 0.6 + tone)
    }
}

impl BufferSource for SyntheticTrack {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&mut self, progress: &mut dyn FnMut(u8)) -> LoadResult<DecodedTrack> {
        let len = self.len_frames();
        let mut samples = Vec::with_capacity(len);
        progress(0);
        while samples.len() < len {
            let start = samples.len();
            let end = (start + CHUNK_FRAMES).min(len);
            samples.extend((start..end).map(|frame| self.frame(frame)));
            progress((end * 100 / len) as u8);
        }

        log::debug!("Generated '{}': {} frames at {:.1} BPM", self.name, len, self.bpm);

        Ok(DecodedTrack {
            audio: AudioBuffer::new(samples, self.sample_rate),
            beats: Some(BeatBuffer::constant(self.bpm, self.sample_rate, 0.0, len)),
        })
    }
}
