//! Transport - the tempo clock every deck and command is timed against

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::music::{TimePoint, DEFAULT_BEATS_PER_BAR};
use crate::types::DEFAULT_SAMPLE_RATE;

/// Minimum transport tempo
pub const MIN_BPM: f64 = 10.0;
/// Maximum transport tempo
pub const MAX_BPM: f64 = 300.0;
/// Tempo used until something sets one
pub const DEFAULT_BPM: f64 = 120.0;

/// Tolerance for beat crossings so accumulated float error never delays one
const BEAT_EPSILON: f64 = 1e-9;

/// The master tempo clock
///
/// Advanced once per rendered frame by the master. `tick` reports whether a
/// beat boundary was crossed on that frame.
#[derive(Debug, Clone)]
pub struct Transport {
    position: TimePoint,
    bpm: f64,
    sample_rate: u32,
    increment: f64,
    seconds_till_next_beat: f64,
    frame: u64,
    is_setup: bool,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            position: TimePoint::default(),
            bpm: DEFAULT_BPM,
            sample_rate: DEFAULT_SAMPLE_RATE,
            increment: 0.0,
            seconds_till_next_beat: 60.0 / DEFAULT_BPM,
            frame: 0,
            is_setup: false,
        }
    }

    /// Bind the sample rate; must happen once before ticking
    pub fn setup(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.is_setup = true;
        self.update_increment();
        self.seconds_till_next_beat = (1.0 - self.position.pos_in_beat()) * 60.0 / self.bpm;
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Advance one frame; returns true when a beat boundary was crossed
    #[inline]
    pub fn tick(&mut self) -> bool {
        if !self.is_setup {
            return false;
        }
        self.frame += 1;

        let mut index = self.position.pos_in_beat() + self.increment;
        let mut in_beat = false;
        while index >= 1.0 - BEAT_EPSILON {
            index -= 1.0;
            self.position.advance_beat();
            in_beat = true;
        }
        if index.abs() < BEAT_EPSILON {
            index = 0.0;
        }
        self.position.set_pos_in_beat(index);

        self.seconds_till_next_beat = if in_beat {
            0.0
        } else {
            (1.0 - index) * 60.0 / self.bpm
        };
        in_beat
    }

    /// Set the tempo, clamped to [MIN_BPM, MAX_BPM]
    ///
    /// The per-frame increment is recomputed immediately once set up.
    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() {
            return;
        }
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if self.is_setup {
            self.update_increment();
        }
    }

    /// Jump to a position; frame values are converted with the current tempo
    pub fn set_position(&mut self, position: TimePoint) {
        let beats = position.to_beats(self.bpm, self.sample_rate).max(0.0);
        self.position = TimePoint::from_beats(beats, self.position.beats_per_bar());
        self.seconds_till_next_beat = (1.0 - self.position.pos_in_beat()) * 60.0 / self.bpm;
    }

    pub fn position(&self) -> &TimePoint {
        &self.position
    }

    /// Total beats since zero as a float
    #[inline]
    pub fn position_beats(&self) -> f64 {
        self.position.whole_beats() as f64 + self.position.pos_in_beat()
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Beats advanced per rendered frame
    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Frames in one beat at the current tempo
    #[inline]
    pub fn frames_per_beat(&self) -> f64 {
        60.0 * self.sample_rate as f64 / self.bpm
    }

    pub fn seconds_till_next_beat(&self) -> f64 {
        self.seconds_till_next_beat
    }

    /// Frames ticked since setup
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Resolve a (possibly relative or frame-domain) time to an absolute
    /// musical position against the current transport state
    pub fn resolve(&self, time: &TimePoint) -> TimePoint {
        resolve_against(time, self.position_beats(), self.bpm, self.sample_rate)
    }

    /// Copy the observable state into the shared atomics
    pub fn publish(&self, atomics: &TransportAtomics) {
        atomics
            .position_beats
            .store(self.position_beats().to_bits(), Ordering::Relaxed);
        atomics.bpm.store(self.bpm.to_bits(), Ordering::Relaxed);
        atomics.sample_rate.store(self.sample_rate, Ordering::Relaxed);
        atomics
            .beats_per_bar
            .store(self.position.beats_per_bar(), Ordering::Relaxed);
        atomics.frame.store(self.frame, Ordering::Relaxed);
    }

    fn update_increment(&mut self) {
        self.increment = self.bpm / (60.0 * self.sample_rate as f64);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn `time` into an absolute musical value given the current beat position
pub(crate) fn resolve_against(time: &TimePoint, now_beats: f64, bpm: f64, sample_rate: u32) -> TimePoint {
    let mut beats = time.to_beats(bpm, sample_rate);
    if time.is_relative() {
        beats += now_beats;
    }
    TimePoint::from_beats(beats, time.beats_per_bar())
}

/// Lock-free transport state for non-realtime readers
///
/// Written by the render thread once per block. Floats are stored as their
/// bit patterns; all accesses are `Relaxed` since only visibility matters.
pub struct TransportAtomics {
    position_beats: AtomicU64,
    bpm: AtomicU64,
    sample_rate: AtomicU32,
    beats_per_bar: AtomicU32,
    frame: AtomicU64,
}

/// A consistent-enough copy of [`TransportAtomics`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub position_beats: f64,
    pub bpm: f64,
    pub sample_rate: u32,
    pub beats_per_bar: u32,
    pub frame: u64,
}

impl TransportAtomics {
    pub fn new() -> Self {
        Self {
            position_beats: AtomicU64::new(0.0f64.to_bits()),
            bpm: AtomicU64::new(DEFAULT_BPM.to_bits()),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            beats_per_bar: AtomicU32::new(DEFAULT_BEATS_PER_BAR),
            frame: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn position_beats(&self) -> f64 {
        f64::from_bits(self.position_beats.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            position_beats: self.position_beats(),
            bpm: self.bpm(),
            sample_rate: self.sample_rate(),
            beats_per_bar: self.beats_per_bar.load(Ordering::Relaxed),
            frame: self.frame(),
        }
    }

    /// Absolute musical position as last published
    pub fn now(&self) -> TimePoint {
        let snapshot = self.snapshot();
        TimePoint::from_beats(snapshot.position_beats, snapshot.beats_per_bar)
    }
}

impl Default for TransportAtomics {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSnapshot {
    /// Resolve a relative or frame-domain time against this snapshot
    pub fn resolve(&self, time: &TimePoint) -> TimePoint {
        resolve_against(time, self.position_beats, self.bpm, self.sample_rate)
    }
}
