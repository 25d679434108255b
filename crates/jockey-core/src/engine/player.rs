//! Player - one deck's playback state machine and per-frame renderer
//!
//! The master drives a player in four steps per block:
//! [`Player::pre_compute`], then [`Player::compute_frame`] once per frame
//! (interleaved with command execution), [`Player::post_compute`] for EQ and
//! gain, and finally [`Player::fill_output_buffers`] for routing.

use basedrop::Shared;
use serde::{Deserialize, Serialize};

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::config::PlayerDefaults;
use crate::music::{Position, TimePoint};
use crate::timestretch::{RateStretcher, Stretcher, TimeStretcher, MAX_SPEED, MIN_SPEED};
use crate::types::{Sample, StereoBuffer, StereoSample};

use super::eq::{EqBand, ThreeBandEq};
use super::transport::Transport;

/// Loudest volume a player accepts (linear gain)
pub const MAX_VOLUME: f64 = 1.5;

/// Fraction of a beat's phase error corrected per beat while syncing
const SYNC_PHASE_GAIN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    Play,
    Pause,
}

/// Where a deck's output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutState {
    MainMix,
    Cue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StretchMethod {
    /// Speed changes pitch
    PlayRate,
    /// Pitch is kept independent of speed
    TimeStretch,
}

/// Which position a position command sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionTarget {
    /// Seek the playhead
    Play,
    /// Seek the playhead by an offset from where it is
    PlayRelative,
    Start,
    End,
    LoopStart,
    LoopEnd,
}

/// A position as set, and the frame it resolved to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mark {
    pub time: TimePoint,
    pub frame: i64,
}

impl Mark {
    fn at_frame(frame: i64) -> Self {
        Self {
            time: TimePoint::from_frames(frame),
            frame,
        }
    }
}

/// A single deck
pub struct Player {
    play_state: PlayState,
    out_state: OutState,
    stretch_method: StretchMethod,
    mute: bool,
    sync: bool,
    looping: bool,
    volume: f64,
    /// Speed requested by the user; the synced speed overrides it while syncing
    play_speed: f64,
    phase_correction: f64,

    start: Mark,
    end: Mark,
    loop_start: Mark,
    loop_end: Mark,

    audio: Option<Shared<AudioBuffer>>,
    beats: Option<Shared<BeatBuffer>>,

    /// Engine output rate; audio at another rate is read proportionally faster or slower
    sample_rate: u32,
    rate: RateStretcher,
    stretch: TimeStretcher,
    eq: ThreeBandEq,

    /// Raw frames of the current block (pre-allocated to the max block size)
    block: StereoBuffer,
    /// Per-frame gain of the current block: volume, mute, pause and crossfade
    gains: Vec<Sample>,
    max_sample: Sample,
}

impl Player {
    pub fn new(sample_rate: u32, max_block_size: usize, defaults: &PlayerDefaults) -> Self {
        let mut player = Self {
            play_state: defaults.play_state,
            out_state: defaults.out_state,
            stretch_method: defaults.stretch_method,
            mute: false,
            sync: defaults.sync,
            looping: false,
            volume: defaults.volume.clamp(0.0, MAX_VOLUME),
            play_speed: 1.0,
            phase_correction: 1.0,
            start: Mark::at_frame(0),
            end: Mark::at_frame(0),
            loop_start: Mark::at_frame(0),
            loop_end: Mark::at_frame(0),
            audio: None,
            beats: None,
            sample_rate,
            rate: RateStretcher::new(),
            stretch: TimeStretcher::new(sample_rate),
            eq: ThreeBandEq::new(sample_rate),
            block: StereoBuffer::with_capacity(max_block_size),
            gains: Vec::with_capacity(max_block_size),
            max_sample: 0.0,
        };
        player.block.set_len_from_capacity(max_block_size);
        player
    }

    // --- State ---

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn set_play_state(&mut self, state: PlayState) {
        self.play_state = state;
    }

    pub fn out_state(&self) -> OutState {
        self.out_state
    }

    pub fn set_out_state(&mut self, state: OutState) {
        self.out_state = state;
    }

    pub fn stretch_method(&self) -> StretchMethod {
        self.stretch_method
    }

    /// Switch read heads, carrying the position and speed over
    pub fn set_stretch_method(&mut self, method: StretchMethod) {
        if method == self.stretch_method {
            return;
        }
        let (frame, subsample, speed) = {
            let head = self.head();
            (head.frame(), head.frame_subsample(), head.speed())
        };
        self.stretch_method = method;
        let head = self.head_mut();
        head.seek(frame, subsample);
        head.set_speed(speed);
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn is_syncing(&self) -> bool {
        self.sync
    }

    /// Enable or disable beat sync
    ///
    /// Going free keeps the speed the deck was synced at.
    pub fn set_sync(&mut self, sync: bool) {
        if self.sync && !sync {
            self.play_speed = self.head().speed();
        }
        self.sync = sync;
        self.phase_correction = 1.0;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        self.update_loop_region();
    }

    /// Hand the active loop to both read heads so they wrap on their own
    fn update_loop_region(&mut self) {
        let region = (self.looping && self.loop_end.frame > self.loop_start.frame)
            .then_some((self.loop_start.frame, self.loop_end.frame));
        self.rate.set_loop(region);
        self.stretch.set_loop(region);
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Linear volume, clamped to [0, MAX_VOLUME]
    pub fn set_volume(&mut self, volume: f64) {
        if volume.is_finite() {
            self.volume = volume.clamp(0.0, MAX_VOLUME);
        }
    }

    /// Speed the user asked for
    pub fn play_speed(&self) -> f64 {
        self.play_speed
    }

    pub fn set_play_speed(&mut self, speed: f64) {
        if !speed.is_finite() {
            return;
        }
        self.play_speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        if !self.sync {
            let speed = self.play_speed;
            self.head_mut().set_speed(speed);
        }
    }

    /// Speed the read head is currently running at
    pub fn speed(&self) -> f64 {
        self.head().speed()
    }

    pub fn set_eq(&mut self, band: EqBand, db: f64) {
        self.eq.set_gain_db(band, db);
    }

    pub fn eq_db(&self, band: EqBand) -> f64 {
        self.eq.gain_db(band)
    }

    // --- Positions ---

    /// Whole frame under the playhead
    pub fn frame(&self) -> i64 {
        self.head().frame()
    }

    pub fn start(&self) -> &Mark {
        &self.start
    }

    pub fn end(&self) -> &Mark {
        &self.end
    }

    pub fn loop_start(&self) -> &Mark {
        &self.loop_start
    }

    pub fn loop_end(&self) -> &Mark {
        &self.loop_end
    }

    /// Set a position; returns the frame it resolved to
    ///
    /// Musical times map through the beat grid when one is loaded and through
    /// the transport tempo otherwise. Results are clamped into the audio.
    pub fn set_position(&mut self, target: PositionTarget, time: &TimePoint, transport: &Transport) -> i64 {
        match target {
            PositionTarget::Play => {
                let frame = self.clamp_play_frame(self.frame_for(time, transport));
                self.seek(frame);
                frame
            }
            PositionTarget::PlayRelative => {
                let head = self.head();
                let current = head.frame() as f64 + head.frame_subsample();
                let frame = self.clamp_play_frame(self.offset_frame(current, time, transport));
                self.seek(frame);
                frame
            }
            PositionTarget::Start => {
                self.start = self.mark_for(time, transport);
                self.start.frame
            }
            PositionTarget::End => {
                self.end = self.mark_for(time, transport);
                self.end.frame
            }
            PositionTarget::LoopStart => {
                self.loop_start = self.mark_for(time, transport);
                self.update_loop_region();
                self.loop_start.frame
            }
            PositionTarget::LoopEnd => {
                self.loop_end = self.mark_for(time, transport);
                self.update_loop_region();
                self.loop_end.frame
            }
        }
    }

    fn seek(&mut self, frame: i64) {
        let head = self.head_mut();
        head.seek(frame, 0.0);
        head.reset();
    }

    fn frame_for(&self, time: &TimePoint, transport: &Transport) -> f64 {
        match time.position() {
            Position::Frames(frames) => frames as f64,
            Position::Beats { .. } => {
                let beats = time.to_beats(transport.bpm(), transport.sample_rate());
                self.beats
                    .as_deref()
                    .and_then(|grid| grid.frame_at_beats(beats))
                    .unwrap_or(beats * transport.frames_per_beat() * self.rate_ratio())
            }
        }
    }

    fn offset_frame(&self, current: f64, offset: &TimePoint, transport: &Transport) -> f64 {
        match offset.position() {
            Position::Frames(frames) => current + frames as f64,
            Position::Beats { .. } => {
                let beats = offset.to_beats(transport.bpm(), transport.sample_rate());
                self.beats
                    .as_deref()
                    .and_then(|grid| {
                        let now = grid.beats_at_frame(current)?;
                        grid.frame_at_beats(now + beats)
                    })
                    .unwrap_or(current + beats * transport.frames_per_beat() * self.rate_ratio())
            }
        }
    }

    fn mark_for(&self, time: &TimePoint, transport: &Transport) -> Mark {
        let len = self.audio_len() as i64;
        let frame = self.frame_for(time, transport).round() as i64;
        Mark {
            time: *time,
            frame: frame.clamp(0, len),
        }
    }

    /// Playable frames are [start, len - 1]
    fn clamp_play_frame(&self, frame: f64) -> i64 {
        let last = (self.audio_len() as i64 - 1).max(0);
        let first = self.start.frame.min(last);
        if frame.is_finite() {
            (frame.round() as i64).clamp(first, last)
        } else {
            first
        }
    }

    // --- Buffers ---

    /// Install new audio and beat grid, returning the previous pair
    ///
    /// `None` audio clears the deck. The returned buffers must be dropped off
    /// the render thread.
    pub fn set_buffers(
        &mut self,
        audio: Option<Shared<AudioBuffer>>,
        beats: Option<Shared<BeatBuffer>>,
    ) -> (Option<Shared<AudioBuffer>>, Option<Shared<BeatBuffer>>) {
        let old_audio = std::mem::replace(&mut self.audio, audio);
        let old_beats = std::mem::replace(&mut self.beats, beats);

        let len = self.audio_len() as i64;
        self.start = Mark::at_frame(0);
        self.end = Mark::at_frame(len);
        self.loop_start = Mark::at_frame(0);
        self.loop_end = Mark::at_frame(0);
        self.phase_correction = 1.0;
        let ratio = self.rate_ratio();
        self.rate.set_rate_ratio(ratio);
        self.stretch.set_rate_ratio(ratio);
        self.update_loop_region();
        self.seek(0);
        self.eq.reset();

        (old_audio, old_beats)
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn audio_len(&self) -> usize {
        self.audio.as_deref().map_or(0, AudioBuffer::len)
    }

    pub fn beat_buffer(&self) -> Option<&BeatBuffer> {
        self.beats.as_deref()
    }

    /// Sample rate of the loaded audio
    pub fn source_sample_rate(&self) -> Option<u32> {
        self.audio.as_deref().map(AudioBuffer::sample_rate)
    }

    /// Source frames per output frame at speed 1
    pub fn rate_ratio(&self) -> f64 {
        match self.source_sample_rate() {
            Some(rate) if rate > 0 && self.sample_rate > 0 => rate as f64 / self.sample_rate as f64,
            _ => 1.0,
        }
    }

    /// Whether the head has reached the end mark
    pub fn past_end(&self) -> bool {
        self.has_audio() && self.frame() >= self.end.frame
    }

    // --- Metering ---

    pub fn max_sample(&self) -> Sample {
        self.max_sample
    }

    /// Read and reset the peak meter
    pub fn take_max_sample(&mut self) -> Sample {
        std::mem::take(&mut self.max_sample)
    }

    // --- Rendering ---

    /// Prepare for a block of `frames` frames
    pub fn pre_compute(&mut self, frames: usize) {
        self.block.set_len_from_capacity(frames);
        let frames = self.block.len();
        // Within capacity, so no allocation
        self.gains.clear();
        self.gains.resize(frames, 0.0);
    }

    /// Render frame `index` of the current block
    ///
    /// Order: sync speed, loop wrap, end check, read. The heads wrap at the
    /// loop end themselves while reading; a head that is already past
    /// `loop_end` when the loop engages is folded back in before reading.
    pub fn compute_frame(&mut self, index: usize, transport: &Transport, in_beat: bool) {
        if index >= self.block.len() {
            return;
        }
        self.block[index] = StereoSample::silence();
        self.gains[index] = 0.0;

        if self.audio.is_none() || self.play_state == PlayState::Pause {
            return;
        }

        if self.sync {
            let speed = self.synced_speed(transport, in_beat);
            self.head_mut().set_speed(speed);
        }

        if self.looping && self.loop_end.frame > self.loop_start.frame {
            let head = self.frame();
            if head >= self.loop_end.frame {
                let length = self.loop_end.frame - self.loop_start.frame;
                let overshoot = (head - self.loop_end.frame) % length;
                let subsample = self.head().frame_subsample();
                let target = self.loop_start.frame + overshoot;
                self.head_mut().seek(target, subsample);
            }
        }

        if self.frame() >= self.end.frame {
            self.play_state = PlayState::Pause;
            return;
        }

        let sample = match (&self.audio, self.stretch_method) {
            (Some(audio), StretchMethod::PlayRate) => self.rate.next_frame(audio),
            (Some(audio), StretchMethod::TimeStretch) => self.stretch.next_frame(audio),
            (None, _) => StereoSample::silence(),
        };
        self.block[index] = sample;
        if !self.mute {
            self.gains[index] = self.volume as Sample;
        }
    }

    /// Multiply the gain of frame `index` (crossfade)
    #[inline]
    pub fn scale_frame_gain(&mut self, index: usize, gain: Sample) {
        if let Some(g) = self.gains.get_mut(index) {
            *g *= gain;
        }
    }

    /// Apply EQ and the per-frame gains, and update the peak meter
    pub fn post_compute(&mut self) {
        self.eq.process(self.block.as_mut_slice());
        for (sample, gain) in self.block.iter_mut().zip(self.gains.iter()) {
            *sample *= *gain;
        }
        self.max_sample = self.max_sample.max(self.block.peak());
    }

    /// Add this block into the main or cue output according to routing
    pub fn fill_output_buffers(&self, main: &mut [StereoSample], cue: &mut [StereoSample]) {
        let out = match self.out_state {
            OutState::MainMix => main,
            OutState::Cue => cue,
        };
        for (dst, src) in out.iter_mut().zip(self.block.iter()) {
            *dst += *src;
        }
    }

    fn synced_speed(&mut self, transport: &Transport, in_beat: bool) -> f64 {
        let head = self.head();
        let position = head.frame() as f64 + head.frame_subsample();
        let Some(grid) = self.beats.as_deref() else {
            return self.play_speed;
        };
        let Some(local_beat) = grid.beat_length_at(position) else {
            return self.play_speed;
        };

        if in_beat {
            // The transport sits exactly on a beat: correct toward the nearest deck beat
            if let Some(deck_beats) = grid.beats_at_frame(position) {
                let phase = deck_beats - deck_beats.floor();
                let error = if phase > 0.5 { 1.0 - phase } else { -phase };
                self.phase_correction = 1.0 + SYNC_PHASE_GAIN * error;
            }
        }

        local_beat / (transport.frames_per_beat() * self.rate_ratio()) * self.phase_correction
    }

    fn head(&self) -> &dyn Stretcher {
        match self.stretch_method {
            StretchMethod::PlayRate => &self.rate,
            StretchMethod::TimeStretch => &self.stretch,
        }
    }

    fn head_mut(&mut self) -> &mut dyn Stretcher {
        match self.stretch_method {
            StretchMethod::PlayRate => &mut self.rate,
            StretchMethod::TimeStretch => &mut self.stretch,
        }
    }
}
