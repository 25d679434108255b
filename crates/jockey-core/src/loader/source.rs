//! Buffer sources: where a deck's decoded audio comes from

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::error::{LoadError, LoadResult};

/// A decoded track ready to be installed on a deck
pub struct DecodedTrack {
    pub audio: AudioBuffer,
    /// Beat onsets in frames; `None` when the track has no annotation
    pub beats: Option<BeatBuffer>,
}

/// Produces decoded audio for a loader thread
///
/// Implementations do their blocking work (file reads, decoding, analysis)
/// inside [`BufferSource::load`], which only ever runs on a deck's loader
/// thread. Progress is reported in percent.
pub trait BufferSource: Send + 'static {
    /// Human-readable name for logs and errors
    fn name(&self) -> String;

    fn load(&mut self, progress: &mut dyn FnMut(u8)) -> LoadResult<DecodedTrack>;
}

/// A source over audio that is already decoded
pub struct MemorySource {
    name: String,
    track: Option<DecodedTrack>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, audio: AudioBuffer, beats: Option<BeatBuffer>) -> Self {
        Self {
            name: name.into(),
            track: Some(DecodedTrack { audio, beats }),
        }
    }
}

impl BufferSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&mut self, progress: &mut dyn FnMut(u8)) -> LoadResult<DecodedTrack> {
        let track = self.track.take().ok_or_else(|| LoadError::Source {
            name: self.name.clone(),
            reason: "already consumed".to_string(),
        })?;
        progress(100);
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_memory_source_loads_once() {
        let audio = AudioBuffer::new(vec![StereoSample::silence(); 16], 44100);
        let mut source = MemorySource::new("sine", audio, None);
        let mut reported = Vec::new();

        let track = source.load(&mut |percent| reported.push(percent)).unwrap();
        assert_eq!(track.audio.len(), 16);
        assert!(track.beats.is_none());
        assert_eq!(reported, vec![100]);

        assert!(matches!(
            source.load(&mut |_| {}),
            Err(LoadError::Source { .. })
        ));
    }
}
