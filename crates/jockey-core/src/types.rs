//! Shared constants and the stereo frame types the render path works in

use std::ops::{Index, IndexMut};

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of decks
pub const DEFAULT_NUM_PLAYERS: usize = 2;

/// Integer scale used by controller-facing values (1000 = 100%)
pub const ONE_SCALE: i32 = 1000;

pub type Sample = f32;

/// One stereo frame
///
/// `#[repr(C)]` with `Pod` so frame slices cast to interleaved `f32` slices
/// for the time stretcher and for interleaved host buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Same value on both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Point `t` of the way from `self` to `other`
    #[inline]
    pub fn lerp(&self, other: &Self, t: Sample) -> Self {
        Self {
            left: self.left + (other.left - self.left) * t,
            right: self.right + (other.right - self.right) * t,
        }
    }

    /// Larger absolute channel value
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// Block-sized scratch audio
///
/// Allocated once at the largest block size. The render path resizes it
/// within that capacity with [`StereoBuffer::set_len_from_capacity`], so
/// it never reallocates after construction.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    frames: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Empty buffer able to hold `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// Resize within capacity; frames exposed by growing are silent
    #[inline]
    pub fn set_len_from_capacity(&mut self, len: usize) {
        let len = len.min(self.frames.capacity());
        if len > self.frames.len() {
            self.frames.resize(len, StereoSample::silence());
        } else {
            self.frames.truncate(len);
        }
    }

    pub fn fill_silence(&mut self) {
        self.frames.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.frames
    }

    /// The same memory as `[L, R, L, R, ...]`
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.frames)
    }

    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.frames)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StereoSample> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, StereoSample> {
        self.frames.iter_mut()
    }

    /// Largest absolute value in either channel
    pub fn peak(&self) -> Sample {
        self.frames.iter().map(StereoSample::peak).fold(0.0, Sample::max)
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &StereoSample {
        &self.frames[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut StereoSample {
        &mut self.frames[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_arithmetic() {
        let a = StereoSample::new(1.0, 2.0);
        let b = StereoSample::new(0.5, 0.5);

        assert_eq!(a + b, StereoSample::new(1.5, 2.5));
        assert_eq!(a * 0.5, StereoSample::new(0.5, 1.0));
        assert_eq!(a.lerp(&b, 0.5), StereoSample::new(0.75, 1.25));
        assert_eq!(StereoSample::new(0.2, -0.9).peak(), 0.9);
    }

    #[test]
    fn test_interleaved_view_shares_memory() {
        let mut buffer = StereoBuffer::with_capacity(4);
        buffer.set_len_from_capacity(2);
        buffer.as_interleaved_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        assert_eq!(buffer[1], StereoSample::new(3.0, 4.0));
        assert_eq!(buffer.peak(), 4.0);
    }

    #[test]
    fn test_set_len_never_exceeds_capacity() {
        let mut buffer = StereoBuffer::with_capacity(16);
        buffer.set_len_from_capacity(8);
        assert_eq!(buffer.len(), 8);

        buffer.set_len_from_capacity(64);
        assert_eq!(buffer.len(), buffer.capacity());

        buffer.set_len_from_capacity(4);
        assert_eq!(buffer.len(), 4);
    }
}
