//! Master - owns the render-thread state and drives the per-block loop

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::types::{Sample, StereoBuffer, StereoSample};

use super::player::{Player, MAX_VOLUME};
use super::scheduler::Dispatcher;
use super::transport::{Transport, TransportAtomics};

/// Maximum block size to pre-allocate for real-time safety
///
/// Hosts may ask for any block size; larger requests are rendered in
/// chunks of at most this many frames.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Crossfader state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    pub enabled: bool,
    /// 0.0 = left side only, 1.0 = right side only
    pub position: f64,
    pub left: usize,
    pub right: usize,
}

impl Crossfade {
    /// Gain applied to `player` by the crossfader
    ///
    /// Players on neither side, and every player while the crossfader is
    /// disabled, get unity.
    #[inline]
    pub fn gain_for(&self, player: usize) -> f64 {
        if !self.enabled || self.left == self.right {
            return 1.0;
        }
        let (left, right) = crossfade_gains(self.position);
        if player == self.left {
            left
        } else if player == self.right {
            right
        } else {
            1.0
        }
    }
}

/// (left, right) gains for a crossfade position
///
/// Both sides are at unity in the middle; each side falls linearly to 0 over
/// the opposite half.
pub fn crossfade_gains(position: f64) -> (f64, f64) {
    let p = if position.is_nan() { 0.5 } else { position.clamp(0.0, 1.0) };
    if p > 0.5 {
        (2.0 * (1.0 - p), 1.0)
    } else {
        (1.0, 2.0 * p)
    }
}

/// Everything commands act on; touched only by the render thread
pub struct EngineState {
    pub transport: Transport,
    pub players: Vec<Player>,
    pub crossfade: Crossfade,
    pub master_volume: f64,
    pub cue_volume: f64,
    /// Peak of the main output since the last query
    pub max_sample: Sample,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        let mut transport = Transport::new();
        transport.setup(config.sample_rate);
        transport.set_bpm(config.initial_bpm);

        let players = (0..config.num_players.max(1))
            .map(|_| Player::new(config.sample_rate, config.max_block_size, &config.player))
            .collect();

        Self {
            transport,
            players,
            crossfade: Crossfade {
                enabled: config.crossfade_enabled,
                position: 0.5,
                left: config.crossfade_left,
                right: config.crossfade_right,
            },
            master_volume: 1.0,
            cue_volume: 1.0,
            max_sample: 0.0,
        }
    }

    pub fn player(&self, index: usize) -> Option<&Player> {
        self.players.get(index)
    }

    /// Read and reset the master peak meter
    pub fn take_max_sample(&mut self) -> Sample {
        std::mem::take(&mut self.max_sample)
    }
}

/// The render-thread engine
///
/// Created by [`EngineContext`](super::EngineContext) and handed to the audio
/// callback (or an offline renderer). Non-realtime code never touches it;
/// it talks to the engine through the scheduler.
pub struct Master {
    state: EngineState,
    dispatcher: Dispatcher,
    atomics: Arc<TransportAtomics>,
    max_block_size: usize,
    /// Scratch for interleaved hosts
    main_scratch: StereoBuffer,
    cue_scratch: StereoBuffer,
}

impl Master {
    pub(crate) fn new(config: &EngineConfig, dispatcher: Dispatcher, atomics: Arc<TransportAtomics>) -> Self {
        let state = EngineState::new(config);
        state.transport.publish(&atomics);
        let max_block_size = config.max_block_size.clamp(1, MAX_BLOCK_SIZE);
        Self {
            state,
            dispatcher,
            atomics,
            max_block_size,
            main_scratch: StereoBuffer::with_capacity(max_block_size),
            cue_scratch: StereoBuffer::with_capacity(max_block_size),
        }
    }

    /// Read-only view of the engine state (for hosts and tests on the render thread)
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.transport.sample_rate()
    }

    /// Render one block into `main` and `cue`
    ///
    /// The block length is the shorter of the two slices. Both are
    /// overwritten. Real-time safe.
    pub fn compute(&mut self, main: &mut [StereoSample], cue: &mut [StereoSample]) {
        let frames = main.len().min(cue.len());
        let mut offset = 0;
        while offset < frames {
            let len = (frames - offset).min(self.max_block_size);
            self.compute_chunk(
                &mut main[offset..offset + len],
                &mut cue[offset..offset + len],
            );
            offset += len;
        }
        self.state.transport.publish(&self.atomics);
    }

    /// Render into interleaved stereo `[L, R, L, R, ...]` buffers
    pub fn compute_interleaved(&mut self, main: &mut [Sample], cue: &mut [Sample]) {
        let frames = (main.len() / 2).min(cue.len() / 2);
        let mut offset = 0;
        while offset < frames {
            let len = (frames - offset).min(self.max_block_size);
            let mut main_block = std::mem::take(&mut self.main_scratch);
            let mut cue_block = std::mem::take(&mut self.cue_scratch);
            main_block.set_len_from_capacity(len);
            cue_block.set_len_from_capacity(len);

            self.compute_chunk(main_block.as_mut_slice(), cue_block.as_mut_slice());

            main[offset * 2..(offset + len) * 2].copy_from_slice(main_block.as_interleaved());
            cue[offset * 2..(offset + len) * 2].copy_from_slice(cue_block.as_interleaved());
            self.main_scratch = main_block;
            self.cue_scratch = cue_block;
            offset += len;
        }
        self.state.transport.publish(&self.atomics);
    }

    fn compute_chunk(&mut self, main: &mut [StereoSample], cue: &mut [StereoSample]) {
        let frames = main.len();
        for player in self.state.players.iter_mut() {
            player.pre_compute(frames);
        }

        for index in 0..frames {
            let in_beat = self.state.transport.tick();
            self.dispatcher.run_due(&mut self.state);

            let EngineState {
                transport,
                players,
                crossfade,
                ..
            } = &mut self.state;
            for (number, player) in players.iter_mut().enumerate() {
                player.compute_frame(index, transport, in_beat);
                let gain = crossfade.gain_for(number);
                if gain != 1.0 {
                    player.scale_frame_gain(index, gain as Sample);
                }
            }
        }

        main.fill(StereoSample::silence());
        cue.fill(StereoSample::silence());
        for player in self.state.players.iter_mut() {
            player.post_compute();
            player.fill_output_buffers(main, cue);
        }

        let master_volume = self.state.master_volume.clamp(0.0, MAX_VOLUME) as Sample;
        let cue_volume = self.state.cue_volume.clamp(0.0, MAX_VOLUME) as Sample;
        let mut peak: Sample = 0.0;
        for sample in main.iter_mut() {
            *sample *= master_volume;
            peak = peak.max(sample.peak());
        }
        for sample in cue.iter_mut() {
            *sample *= cue_volume;
        }
        self.state.max_sample = self.state.max_sample.max(peak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_endpoints() {
        assert_eq!(crossfade_gains(0.0), (1.0, 0.0));
        assert_eq!(crossfade_gains(1.0), (0.0, 1.0));
        assert_eq!(crossfade_gains(0.5), (1.0, 1.0));
        assert_eq!(crossfade_gains(-3.0), (1.0, 0.0));
    }

    #[test]
    fn test_crossfade_is_monotonic() {
        let mut last = crossfade_gains(0.0);
        for step in 1..=100 {
            let gains = crossfade_gains(step as f64 / 100.0);
            assert!(gains.0 <= last.0);
            assert!(gains.1 >= last.1);
            last = gains;
        }
    }

    #[test]
    fn test_unassigned_players_unaffected() {
        let crossfade = Crossfade {
            enabled: true,
            position: 0.0,
            left: 0,
            right: 1,
        };
        assert_eq!(crossfade.gain_for(0), 1.0);
        assert_eq!(crossfade.gain_for(1), 0.0);
        assert_eq!(crossfade.gain_for(2), 1.0);

        let disabled = Crossfade {
            enabled: false,
            ..crossfade
        };
        assert_eq!(disabled.gain_for(1), 1.0);
    }
}
