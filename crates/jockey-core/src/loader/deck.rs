//! One loader thread per deck

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use basedrop::{Handle, Shared};

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::error::{LoadError, LoadResult, ModelError};

use super::source::BufferSource;

/// Receives the outcome of loads
///
/// Called on the loader thread. `loaded` gets buffers already wrapped for
/// deferred release.
pub trait LoadSink: Send + Sync + 'static {
    fn progress(&self, player: usize, percent: u8);

    fn loaded(&self, player: usize, audio: Shared<AudioBuffer>, beats: Option<Shared<BeatBuffer>>);

    fn failed(&self, player: usize, error: &LoadError);
}

/// Background loader for a single deck
///
/// Requests are handled in order, except that a request still waiting when
/// a newer one arrives is skipped: only the most recent track matters.
pub struct DeckLoader {
    player: usize,
    request_tx: Option<Sender<Box<dyn BufferSource>>>,
    handle: Option<JoinHandle<()>>,
}

impl DeckLoader {
    pub fn spawn(player: usize, release: Handle, sink: Arc<dyn LoadSink>) -> Result<Self, ModelError> {
        let (request_tx, request_rx) = mpsc::channel::<Box<dyn BufferSource>>();
        let name = format!("deck-loader-{}", player);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || loader_thread(player, request_rx, release, sink))
            .map_err(|source| ModelError::Spawn { name, source })?;

        Ok(Self {
            player,
            request_tx: Some(request_tx),
            handle: Some(handle),
        })
    }

    /// Queue a load (non-blocking)
    pub fn load(&self, source: Box<dyn BufferSource>) -> LoadResult<()> {
        self.request_tx
            .as_ref()
            .ok_or(LoadError::LoaderStopped(self.player))?
            .send(source)
            .map_err(|_| LoadError::LoaderStopped(self.player))
    }

    /// Stop accepting requests and wait for the thread to finish
    pub fn shutdown(&mut self) {
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Loader thread for player {} panicked", self.player);
            }
        }
    }
}

impl Drop for DeckLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn loader_thread(
    player: usize,
    rx: Receiver<Box<dyn BufferSource>>,
    release: Handle,
    sink: Arc<dyn LoadSink>,
) {
    log::debug!("Loader thread for player {} started", player);

    while let Ok(mut source) = rx.recv() {
        while let Ok(newer) = rx.try_recv() {
            log::debug!("Player {}: skipping '{}' for a newer request", player, source.name());
            source = newer;
        }
        load_one(player, source.as_mut(), &release, sink.as_ref());
    }

    log::debug!("Loader thread for player {} exiting", player);
}

fn load_one(player: usize, source: &mut dyn BufferSource, release: &Handle, sink: &dyn LoadSink) {
    let name = source.name();
    let started = Instant::now();
    log::info!("Player {}: loading '{}'", player, name);

    let mut last_percent = None;
    let result = source.load(&mut |percent| {
        let percent = percent.min(100);
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            sink.progress(player, percent);
        }
    });

    let track = match result {
        Ok(track) if track.audio.is_empty() => Err(LoadError::EmptyAudio(name.clone())),
        other => other,
    };

    match track {
        Ok(track) => {
            log::info!(
                "Player {}: loaded '{}' ({} frames, {} beats) in {:?}",
                player,
                name,
                track.audio.len(),
                track.beats.as_ref().map_or(0, BeatBuffer::len),
                started.elapsed()
            );
            let audio = Shared::new(release, track.audio);
            let beats = track.beats.map(|beats| Shared::new(release, beats));
            sink.loaded(player, audio, beats);
        }
        Err(e) => {
            log::error!("Player {}: {}", player, e);
            sink.failed(player, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReleasePool;
    use crate::loader::{DecodedTrack, MemorySource};
    use crate::types::StereoSample;
    use parking_lot::Mutex;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Loaded(usize),
        Failed(String),
    }

    struct ChannelSink {
        progress: Mutex<Vec<u8>>,
        tx: Mutex<Sender<Outcome>>,
    }

    impl LoadSink for ChannelSink {
        fn progress(&self, _player: usize, percent: u8) {
            self.progress.lock().push(percent);
        }

        fn loaded(&self, _player: usize, audio: Shared<AudioBuffer>, _beats: Option<Shared<BeatBuffer>>) {
            let _ = self.tx.lock().send(Outcome::Loaded(audio.len()));
        }

        fn failed(&self, _player: usize, error: &LoadError) {
            let _ = self.tx.lock().send(Outcome::Failed(error.to_string()));
        }
    }

    struct SteppedSource;

    impl BufferSource for SteppedSource {
        fn name(&self) -> String {
            "stepped".to_string()
        }

        fn load(&mut self, progress: &mut dyn FnMut(u8)) -> LoadResult<DecodedTrack> {
            for percent in [0, 50, 50, 100] {
                progress(percent);
            }
            Ok(DecodedTrack {
                audio: AudioBuffer::new(Vec::new(), 44100),
                beats: None,
            })
        }
    }

    fn setup() -> (ReleasePool, Arc<ChannelSink>, Receiver<Outcome>) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink {
            progress: Mutex::new(Vec::new()),
            tx: Mutex::new(tx),
        });
        (ReleasePool::new(), sink, rx)
    }

    fn recv(rx: &Receiver<Outcome>) -> Outcome {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => panic!("loader did not report"),
            Err(RecvTimeoutError::Disconnected) => panic!("loader sink dropped"),
        }
    }

    #[test]
    fn test_load_reports_buffers() {
        let (pool, sink, rx) = setup();
        let loader = DeckLoader::spawn(0, pool.handle(), sink.clone()).unwrap();

        let audio = AudioBuffer::new(vec![StereoSample::silence(); 64], 44100);
        loader.load(Box::new(MemorySource::new("pad", audio, None))).unwrap();

        assert_eq!(recv(&rx), Outcome::Loaded(64));
        assert_eq!(*sink.progress.lock(), vec![100]);
    }

    #[test]
    fn test_empty_audio_fails() {
        let (pool, sink, rx) = setup();
        let loader = DeckLoader::spawn(1, pool.handle(), sink.clone()).unwrap();
        loader.load(Box::new(SteppedSource)).unwrap();

        assert_eq!(recv(&rx), Outcome::Failed("'stepped' contains no audio".to_string()));
        // Repeated percentages are reported once
        assert_eq!(*sink.progress.lock(), vec![0, 50, 100]);
    }

    #[test]
    fn test_stopped_loader_rejects_requests() {
        let (pool, sink, _rx) = setup();
        let mut loader = DeckLoader::spawn(0, pool.handle(), sink).unwrap();
        loader.shutdown();
        assert!(matches!(
            loader.load(Box::new(SteppedSource)),
            Err(LoadError::LoaderStopped(0))
        ));
    }
}
