//! Read heads for deck playback
//!
//! A [`Stretcher`] owns a deck's playhead and produces one output frame per
//! call. [`RateStretcher`] steps through the audio by `speed` frames per output
//! frame (pitch follows speed). [`TimeStretcher`] runs the audio through
//! signalsmith-stretch so tempo changes leave the pitch alone.
//!
//! Both heads wrap at an active loop region themselves, so a loop pass is one
//! continuous stream; [`Stretcher::seek`] is reserved for real jumps.

use signalsmith_stretch::Stretch;

use crate::buffers::AudioBuffer;
use crate::types::{StereoBuffer, StereoSample, DEFAULT_SAMPLE_RATE};

/// Slowest playback speed a read head accepts
pub const MIN_SPEED: f64 = 0.25;
/// Fastest playback speed a read head accepts
pub const MAX_SPEED: f64 = 4.0;

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Output frames produced per signalsmith call
const CHUNK_FRAMES: usize = 256;

/// Largest source/engine sample rate ratio the heads size their buffers for
pub const MAX_RATE_RATIO: f64 = 4.0;

/// A playhead over an [`AudioBuffer`]
pub trait Stretcher: Send {
    /// Move the head to `frame` plus a fractional `subsample` in [0, 1)
    fn seek(&mut self, frame: i64, subsample: f64);

    /// Whole frame under the head
    fn frame(&self) -> i64;

    /// Fractional part of the head position
    fn frame_subsample(&self) -> f64;

    fn set_speed(&mut self, speed: f64);

    fn speed(&self) -> f64;

    /// Source frames per output frame at speed 1 (source rate / engine rate)
    fn set_rate_ratio(&mut self, ratio: f64);

    /// Region `[start, end)` the head wraps in, or `None` to play straight on
    fn set_loop(&mut self, region: Option<(i64, i64)>);

    /// Produce the frame at the head, then advance the head by `speed`
    ///
    /// Positions outside the audio read as silence.
    fn next_frame(&mut self, audio: &AudioBuffer) -> StereoSample;

    /// Drop any internal history (called on discontinuities)
    fn reset(&mut self) {}

    /// Whether pitch is independent of speed
    fn pitch_independent(&self) -> bool;
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}

/// Fold a position that ran past the end of `region` back into it
fn wrap_into(position: f64, region: Option<(i64, i64)>) -> f64 {
    match region {
        Some((start, end)) if end > start && position >= end as f64 => {
            start as f64 + (position - end as f64) % (end - start) as f64
        }
        _ => position,
    }
}

/// Rate-only playback with linear interpolation between frames
#[derive(Debug, Clone)]
pub struct RateStretcher {
    frame: i64,
    subsample: f64,
    speed: f64,
    ratio: f64,
    region: Option<(i64, i64)>,
}

impl RateStretcher {
    pub fn new() -> Self {
        Self {
            frame: 0,
            subsample: 0.0,
            speed: 1.0,
            ratio: 1.0,
            region: None,
        }
    }
}

impl Default for RateStretcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Stretcher for RateStretcher {
    fn seek(&mut self, frame: i64, subsample: f64) {
        self.frame = frame;
        self.subsample = subsample.clamp(0.0, 1.0 - f64::EPSILON);
    }

    fn frame(&self) -> i64 {
        self.frame
    }

    fn frame_subsample(&self) -> f64 {
        self.subsample
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_rate_ratio(&mut self, ratio: f64) {
        self.ratio = clamp_ratio(ratio);
    }

    fn set_loop(&mut self, region: Option<(i64, i64)>) {
        self.region = region;
    }

    #[inline]
    fn next_frame(&mut self, audio: &AudioBuffer) -> StereoSample {
        let current = audio.sample(self.frame);
        let out = if self.subsample > 0.0 {
            current.lerp(&audio.sample(self.frame + 1), self.subsample as f32)
        } else {
            current
        };

        self.subsample += self.speed * self.ratio;
        let whole = self.subsample.floor();
        self.frame += whole as i64;
        self.subsample -= whole;
        if let Some((start, end)) = self.region {
            if end > start && self.frame >= end {
                self.frame = start + (self.frame - end) % (end - start);
            }
        }
        out
    }

    fn pitch_independent(&self) -> bool {
        false
    }
}

/// Pitch-preserving playback via signalsmith-stretch
///
/// Audio is stretched in chunks of [`CHUNK_FRAMES`] output frames. The input
/// fed to the stretcher is one continuous stream: it follows the loop region
/// instead of jumping, and only [`Stretcher::seek`] starts a new stream. A
/// new stream is primed through signalsmith's pre-roll so the first output
/// frame is the seek target rather than start-up transient.
///
/// The head advances by each chunk's actual input/output ratio, which keeps
/// it a fixed latency behind the input feed whatever the per-frame speed
/// requests do in between refills.
///
/// Input, output and pre-roll buffers are allocated up front for the fastest
/// speed, so `next_frame` never allocates.
pub struct TimeStretcher {
    stretch: Stretch,
    input: StereoBuffer,
    output: StereoBuffer,
    preroll: StereoBuffer,
    out_pos: usize,
    /// Source position of the next frame fed to the stretcher
    read_pos: f64,
    /// Source position of the frame being heard
    head: f64,
    /// Source frames per output frame of the chunk being played
    step: f64,
    speed: f64,
    ratio: f64,
    region: Option<(i64, i64)>,
    /// Start a new stream at `head` before the next read
    needs_prime: bool,
}

impl TimeStretcher {
    pub fn new(sample_rate: u32) -> Self {
        let stretch = Stretch::preset_default(CHANNELS, sample_rate);
        let max_step = MAX_SPEED * MAX_RATE_RATIO;
        let max_input = (CHUNK_FRAMES as f64 * max_step).ceil() as usize + 2;
        let max_preroll = stretch.input_latency()
            + (stretch.output_latency() as f64 * max_step).ceil() as usize
            + 2;
        let mut output = StereoBuffer::with_capacity(CHUNK_FRAMES);
        output.set_len_from_capacity(CHUNK_FRAMES);
        Self {
            stretch,
            input: StereoBuffer::with_capacity(max_input),
            output,
            preroll: StereoBuffer::with_capacity(max_preroll),
            out_pos: CHUNK_FRAMES,
            read_pos: 0.0,
            head: 0.0,
            step: 1.0,
            speed: 1.0,
            ratio: 1.0,
            region: None,
            needs_prime: true,
        }
    }

    /// Input plus output latency of the stretcher, in frames
    pub fn latency(&self) -> usize {
        self.stretch.input_latency() + self.stretch.output_latency()
    }

    /// Source frames the input feed runs ahead of the head
    pub fn lead(&self) -> f64 {
        let lead = self.read_pos - self.head;
        match self.region {
            // The feed has already wrapped while the head has not
            Some((start, end)) if lead < 0.0 && end > start => lead + (end - start) as f64,
            _ => lead,
        }
    }

    /// Copy source frames starting at `from` into `buffer`, following the loop
    fn gather(buffer: &mut StereoBuffer, audio: &AudioBuffer, from: i64, region: Option<(i64, i64)>) {
        let mut position = from;
        for sample in buffer.iter_mut() {
            *sample = audio.sample(position);
            position += 1;
            if let Some((start, end)) = region {
                if end > start && position >= end {
                    position = start;
                }
            }
        }
    }

    /// Start a new stream so the first output frame is the source at `head`
    fn prime(&mut self, audio: &AudioBuffer) {
        self.stretch.reset();
        self.step = self.speed * self.ratio;

        // After a reset the processing time sits one input latency before the
        // first frame given; output lags it by the output latency
        let lead = self.stretch.input_latency() as f64
            + self.stretch.output_latency() as f64 * self.step;
        let count = (lead.round() as usize).min(self.preroll.capacity());
        self.preroll.set_len_from_capacity(count);
        let start = self.head.floor() as i64;
        Self::gather(&mut self.preroll, audio, start, self.region);
        let len = self.preroll.len();
        self.stretch
            .seek(&self.preroll.as_interleaved()[..len * 2], self.step);

        self.read_pos = wrap_into(start as f64 + len as f64, self.region);
        self.out_pos = CHUNK_FRAMES;
        self.needs_prime = false;
    }

    fn refill(&mut self, audio: &AudioBuffer) {
        let start = self.read_pos.floor() as i64;
        let mut target = self.read_pos + CHUNK_FRAMES as f64 * self.speed * self.ratio;
        let count = (target.floor() as i64 - start).clamp(1, self.input.capacity() as i64);
        if count != target.floor() as i64 - start {
            target = (start + count) as f64;
        }

        self.input.set_len_from_capacity(count as usize);
        Self::gather(&mut self.input, audio, start, self.region);
        let input_len = self.input.len();

        self.output.set_len_from_capacity(CHUNK_FRAMES);
        self.output.fill_silence();
        self.stretch.process(
            &self.input.as_interleaved()[..input_len * 2],
            &mut self.output.as_interleaved_mut()[..CHUNK_FRAMES * 2],
        );

        self.step = (target - self.read_pos) / CHUNK_FRAMES as f64;
        self.read_pos = wrap_into(target, self.region);
        self.out_pos = 0;
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl Stretcher for TimeStretcher {
    fn seek(&mut self, frame: i64, subsample: f64) {
        self.head = frame as f64 + subsample.clamp(0.0, 1.0 - f64::EPSILON);
        self.needs_prime = true;
    }

    fn frame(&self) -> i64 {
        self.head.floor() as i64
    }

    fn frame_subsample(&self) -> f64 {
        self.head - self.head.floor()
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_rate_ratio(&mut self, ratio: f64) {
        let ratio = clamp_ratio(ratio);
        if ratio != self.ratio {
            self.ratio = ratio;
            // Source pitch is kept relative to its own rate
            self.stretch.set_transpose_factor(ratio as f32, None);
        }
    }

    fn set_loop(&mut self, region: Option<(i64, i64)>) {
        if region == self.region {
            return;
        }
        // A feed that already wrapped can only be undone by a new stream
        if region.is_none() && self.read_pos < self.head {
            self.needs_prime = true;
        }
        self.region = region;
    }

    fn next_frame(&mut self, audio: &AudioBuffer) -> StereoSample {
        if self.needs_prime {
            self.prime(audio);
        }
        if self.out_pos >= CHUNK_FRAMES {
            self.refill(audio);
        }
        let out = self.output[self.out_pos];
        self.out_pos += 1;
        self.head = wrap_into(self.head + self.step, self.region);
        out
    }

    fn reset(&mut self) {
        self.needs_prime = true;
    }

    fn pitch_independent(&self) -> bool {
        true
    }
}
