//! Shared harness: an engine context rendered block by block on the test thread

#![allow(dead_code)]

use std::sync::Arc;

use basedrop::Shared;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use jockey_core::buffers::{AudioBuffer, BeatBuffer};
use jockey_core::config::EngineConfig;
use jockey_core::engine::{
    Command, DoneActions, DoneContext, EngineContext, EngineState, Master, PlayerLoadCommand,
    Scheduler,
};
use jockey_core::events::{EngineEvent, EventSender};
use jockey_core::StereoSample;

pub const SAMPLE_RATE: u32 = 44100;
/// Frames per beat at 120 BPM
pub const BEAT: usize = 22050;
pub const BLOCK: usize = 512;

pub struct Rig {
    pub config: EngineConfig,
    pub master: Master,
    pub scheduler: Scheduler,
    pub done_actions: Option<DoneActions>,
    pub events: EventSender,
    pub rx: Receiver<EngineEvent>,
    pub main: Vec<StereoSample>,
    pub cue: Vec<StereoSample>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let EngineContext {
            config,
            master,
            scheduler,
            done_actions,
            events,
            ..
        } = EngineContext::new(&config);
        Self {
            config,
            master,
            scheduler,
            done_actions: Some(done_actions),
            events: events.sender(),
            rx: events.subscribe(),
            main: Vec::new(),
            cue: Vec::new(),
        }
    }

    /// Render `frames` frames in blocks, keeping the output of the whole run
    pub fn render(&mut self, frames: usize) {
        self.main.clear();
        self.cue.clear();
        let mut main = vec![StereoSample::silence(); BLOCK];
        let mut cue = vec![StereoSample::silence(); BLOCK];
        let mut left = frames;
        while left > 0 {
            let len = left.min(BLOCK);
            self.master.compute(&mut main[..len], &mut cue[..len]);
            self.main.extend_from_slice(&main[..len]);
            self.cue.extend_from_slice(&cue[..len]);
            left -= len;
        }
    }

    pub fn done(&mut self) -> &mut DoneActions {
        self.done_actions
            .as_mut()
            .expect("done actions were handed to a model")
    }

    pub fn state(&self) -> &EngineState {
        self.master.state()
    }

    pub fn shared_audio(&mut self, audio: AudioBuffer) -> Shared<AudioBuffer> {
        Shared::new(&self.done().handle(), audio)
    }

    /// Install audio (and optionally a grid) on a deck through the scheduler
    pub fn load(&mut self, player: usize, audio: AudioBuffer, beats: Option<BeatBuffer>) {
        let handle = self.done().handle();
        let audio = Shared::new(&handle, audio);
        let beats = beats.map(|beats| Shared::new(&handle, beats));
        self.scheduler
            .execute(PlayerLoadCommand::new(player, Some(audio), beats));
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        sample_rate: SAMPLE_RATE,
        initial_bpm: 120.0,
        ..EngineConfig::default()
    }
}

/// Audio whose left channel is the frame index
pub fn ramp(frames: usize) -> AudioBuffer {
    AudioBuffer::new(
        (0..frames)
            .map(|i| StereoSample::new(i as f32, -(i as f32)))
            .collect(),
        SAMPLE_RATE,
    )
}

/// Constant audio
pub fn dc(value: f32, frames: usize) -> AudioBuffer {
    AudioBuffer::new(vec![StereoSample::mono(value); frames], SAMPLE_RATE)
}

/// What a [`Tracer`] saw when it ran
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracedRun {
    pub id: usize,
    pub beats: f64,
    pub frame: u64,
}

pub type TraceLog = Arc<Mutex<Vec<TracedRun>>>;

/// Command that records when it ran, and counts its done-hooks
pub struct Tracer {
    pub id: usize,
    pub log: TraceLog,
    pub done: Arc<Mutex<Vec<usize>>>,
}

impl Tracer {
    pub fn new(id: usize, log: &TraceLog, done: &Arc<Mutex<Vec<usize>>>) -> Self {
        Self {
            id,
            log: Arc::clone(log),
            done: Arc::clone(done),
        }
    }
}

impl Command for Tracer {
    fn execute(&mut self, engine: &mut EngineState) {
        // Test-only: a real command must not lock or allocate here
        self.log.lock().push(TracedRun {
            id: self.id,
            beats: engine.transport.position_beats(),
            frame: engine.transport.frame(),
        });
    }

    fn execute_done(&mut self, _ctx: &mut DoneContext<'_>) {
        self.done.lock().push(self.id);
    }
}
