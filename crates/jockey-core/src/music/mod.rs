//! Musical time
//!
//! [`TimePoint`] is the single time value used by the transport, the
//! scheduler and every position-carrying command. A value is either musical
//! (whole beats plus a position inside the beat) or an absolute sample-frame
//! count, and may be flagged *relative* so it is added to "now" when it is
//! scheduled.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default number of beats in a bar (4/4)
pub const DEFAULT_BEATS_PER_BAR: u32 = 4;

/// The two domains a [`TimePoint`] can be expressed in
///
/// Serialized untagged: a `{beat, pos_in_beat}` map or a bare frame count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    /// Whole beats since zero plus the position inside the current beat.
    /// `pos_in_beat` is always in [0, 1).
    Beats { beat: i64, pos_in_beat: f64 },
    /// Absolute sample frames
    Frames(i64),
}

/// A musical or sample-frame position
///
/// Musical values are normalised to (whole beats, fraction) so negation and
/// addition keep the fraction in [0, 1); bar and beat-in-bar are derived from
/// `beats_per_bar`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    position: Position,
    #[serde(default = "default_beats_per_bar")]
    beats_per_bar: u32,
    #[serde(default)]
    relative: bool,
}

fn default_beats_per_bar() -> u32 {
    DEFAULT_BEATS_PER_BAR
}

impl TimePoint {
    /// Absolute musical position at the start of `bar`
    pub fn at_bar(bar: u32) -> Self {
        Self::at_bar_beat(bar, 0)
    }

    /// Absolute musical position at `beat` inside `bar`
    pub fn at_bar_beat(bar: u32, beat: u32) -> Self {
        Self::at_bar_beat_pos(bar, beat, 0.0)
    }

    /// Absolute musical position with a fractional beat
    ///
    /// `pos_in_beat` outside [0, 1) carries into the beat count.
    pub fn at_bar_beat_pos(bar: u32, beat: u32, pos_in_beat: f64) -> Self {
        let whole = bar as i64 * DEFAULT_BEATS_PER_BAR as i64 + beat as i64;
        Self::from_beats(whole as f64 + pos_in_beat, DEFAULT_BEATS_PER_BAR)
    }

    /// Musical position from a total beat count
    pub fn from_beats(total_beats: f64, beats_per_bar: u32) -> Self {
        let (beat, pos_in_beat) = split_beats(total_beats);
        Self {
            position: Position::Beats { beat, pos_in_beat },
            beats_per_bar: beats_per_bar.max(1),
            relative: false,
        }
    }

    /// Absolute sample-frame position
    pub fn from_frames(frames: i64) -> Self {
        Self {
            position: Position::Frames(frames),
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            relative: false,
        }
    }

    /// The zero offset relative to "now"
    pub fn now() -> Self {
        Self::from_beats(0.0, DEFAULT_BEATS_PER_BAR).into_relative()
    }

    /// Relative musical offset of `beats` (may be negative)
    pub fn beats_from_now(beats: f64) -> Self {
        Self::from_beats(beats, DEFAULT_BEATS_PER_BAR).into_relative()
    }

    /// Relative frame offset (may be negative)
    pub fn frames_from_now(frames: i64) -> Self {
        Self::from_frames(frames).into_relative()
    }

    /// Flag this value as relative to the time it is scheduled at
    pub fn into_relative(mut self) -> Self {
        self.relative = true;
        self
    }

    /// Drop the relative flag
    pub fn into_absolute(mut self) -> Self {
        self.relative = false;
        self
    }

    /// Change the bar length used to derive bar/beat (the beat count is kept)
    pub fn with_beats_per_bar(mut self, beats_per_bar: u32) -> Self {
        self.beats_per_bar = beats_per_bar.max(1);
        self
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn is_musical(&self) -> bool {
        matches!(self.position, Position::Beats { .. })
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    /// Bar index (musical values only; frame values report 0)
    pub fn bar(&self) -> i64 {
        match self.position {
            Position::Beats { beat, .. } => beat.div_euclid(self.beats_per_bar as i64),
            Position::Frames(_) => 0,
        }
    }

    /// Beat inside the bar (musical values only; frame values report 0)
    pub fn beat(&self) -> i64 {
        match self.position {
            Position::Beats { beat, .. } => beat.rem_euclid(self.beats_per_bar as i64),
            Position::Frames(_) => 0,
        }
    }

    /// Position inside the current beat, always in [0, 1)
    pub fn pos_in_beat(&self) -> f64 {
        match self.position {
            Position::Beats { pos_in_beat, .. } => pos_in_beat,
            Position::Frames(_) => 0.0,
        }
    }

    /// Whole beats since zero (musical values only)
    pub fn whole_beats(&self) -> i64 {
        match self.position {
            Position::Beats { beat, .. } => beat,
            Position::Frames(_) => 0,
        }
    }

    /// Total beats as a float, converting frame values with the given tempo
    pub fn to_beats(&self, bpm: f64, sample_rate: u32) -> f64 {
        match self.position {
            Position::Beats { beat, pos_in_beat } => beat as f64 + pos_in_beat,
            Position::Frames(frames) => {
                if sample_rate == 0 {
                    return 0.0;
                }
                frames as f64 * bpm / (60.0 * sample_rate as f64)
            }
        }
    }

    /// Absolute frames, converting musical values with the given tempo
    pub fn to_frames(&self, bpm: f64, sample_rate: u32) -> i64 {
        match self.position {
            Position::Frames(frames) => frames,
            Position::Beats { beat, pos_in_beat } => {
                if bpm <= 0.0 {
                    return 0;
                }
                let beats = beat as f64 + pos_in_beat;
                (beats * 60.0 * sample_rate as f64 / bpm).round() as i64
            }
        }
    }

    /// Convert to the musical domain with the given tempo
    pub fn to_musical(&self, bpm: f64, sample_rate: u32) -> Self {
        match self.position {
            Position::Beats { .. } => *self,
            Position::Frames(_) => Self {
                relative: self.relative,
                ..Self::from_beats(self.to_beats(bpm, sample_rate), self.beats_per_bar)
            },
        }
    }

    /// Add two values of the same domain
    ///
    /// Musical and frame values cannot be combined without a tempo, so mixing
    /// domains yields `None`. The result keeps `self`'s relative flag.
    pub fn checked_add(&self, other: &TimePoint) -> Option<TimePoint> {
        let position = match (self.position, other.position) {
            (
                Position::Beats { beat: a, pos_in_beat: fa },
                Position::Beats { beat: b, pos_in_beat: fb },
            ) => {
                let mut beat = a + b;
                let mut pos_in_beat = fa + fb;
                if pos_in_beat >= 1.0 {
                    pos_in_beat -= 1.0;
                    beat += 1;
                }
                Position::Beats { beat, pos_in_beat }
            }
            (Position::Frames(a), Position::Frames(b)) => Position::Frames(a + b),
            _ => return None,
        };
        Some(TimePoint {
            position,
            beats_per_bar: self.beats_per_bar,
            relative: self.relative,
        })
    }

    /// Advance by one whole beat (musical values only)
    pub fn advance_beat(&mut self) {
        if let Position::Beats { beat, .. } = &mut self.position {
            *beat += 1;
        }
    }

    /// Overwrite the fractional part; values outside [0, 1) are clamped
    pub fn set_pos_in_beat(&mut self, value: f64) {
        if let Position::Beats { pos_in_beat, .. } = &mut self.position {
            *pos_in_beat = clamp_fraction(value);
        }
    }

    fn rank(&self) -> u8 {
        match self.position {
            Position::Beats { .. } => 0,
            Position::Frames(_) => 1,
        }
    }
}

impl Default for TimePoint {
    fn default() -> Self {
        Self::from_beats(0.0, DEFAULT_BEATS_PER_BAR)
    }
}

impl std::ops::Neg for TimePoint {
    type Output = TimePoint;

    fn neg(self) -> TimePoint {
        let position = match self.position {
            Position::Beats { beat, pos_in_beat } => {
                if pos_in_beat > 0.0 {
                    Position::Beats {
                        beat: -beat - 1,
                        pos_in_beat: clamp_fraction(1.0 - pos_in_beat),
                    }
                } else {
                    Position::Beats { beat: -beat, pos_in_beat: 0.0 }
                }
            }
            Position::Frames(frames) => Position::Frames(-frames),
        };
        TimePoint { position, ..self }
    }
}

impl Eq for TimePoint {}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: musical values by (beat, fraction), frame values by frame.
///
/// Musical and frame values are unrelated without a tempo; musical values
/// sort first so the order stays total. The scheduler only ever compares
/// musical values.
impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_value = match (self.position, other.position) {
            (
                Position::Beats { beat: a, pos_in_beat: fa },
                Position::Beats { beat: b, pos_in_beat: fb },
            ) => a.cmp(&b).then(fa.total_cmp(&fb)),
            (Position::Frames(a), Position::Frames(b)) => a.cmp(&b),
            _ => self.rank().cmp(&other.rank()),
        };
        by_value
            .then(self.relative.cmp(&other.relative))
            .then(self.beats_per_bar.cmp(&other.beats_per_bar))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.relative { "+" } else { "" };
        match self.position {
            Position::Beats { pos_in_beat, .. } => write!(
                f,
                "{}{}.{}.{:03}",
                prefix,
                self.bar(),
                self.beat(),
                (pos_in_beat * 1000.0) as u32
            ),
            Position::Frames(frames) => write!(f, "{}{}f", prefix, frames),
        }
    }
}

fn split_beats(total: f64) -> (i64, f64) {
    if !total.is_finite() {
        return (0, 0.0);
    }
    let whole = total.floor();
    (whole as i64, clamp_fraction(total - whole))
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else if value >= 1.0 {
        // Largest f64 below 1.0 keeps the [0, 1) invariant
        1.0 - f64::EPSILON / 2.0
    } else {
        value
    }
}
