//! The controller-facing model driving a full engine context

mod common;

use std::time::{Duration, Instant};

use common::*;
use jockey_core::buffers::BeatBuffer;
use jockey_core::engine::{EqBand, PlayState};
use jockey_core::events::EngineEvent;
use jockey_core::loader::MemorySource;
use jockey_core::model::{AudioModel, Consumer, PlayerFlag, PlayerParam, PlayerTrigger};

struct Session {
    rig: Rig,
    model: AudioModel,
    consumer: Consumer,
}

impl Session {
    fn new() -> Self {
        let mut rig = Rig::new();
        let done_actions = rig.done_actions.take().unwrap();
        let model = AudioModel::new(
            &rig.config,
            rig.scheduler.clone(),
            done_actions.handle(),
            rig.events.clone(),
        )
        .unwrap();
        let consumer = model.consumer(done_actions);
        Self { rig, model, consumer }
    }

    /// Render a block, then poll: the query answered in this block is folded in
    fn step(&mut self) {
        self.rig.render(BLOCK);
        self.consumer.poll();
    }

    fn load(&mut self, player: usize, frames: usize, beats: Option<BeatBuffer>) {
        self.model
            .player_load(player, Box::new(MemorySource::new("test", dc(0.5, frames), beats)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.model.player_frames(player) != frames {
            assert!(Instant::now() < deadline, "load did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }
        self.step();
    }
}

#[test]
fn load_installs_buffers_and_rewinds() {
    let mut session = Session::new();
    session.load(0, 4 * BEAT, None);

    let player = &session.rig.state().players[0];
    assert_eq!(player.audio_len(), 4 * BEAT);
    assert_eq!(player.frame(), 0);

    let events = session.rig.drain_events();
    assert!(events.contains(&EngineEvent::LoadProgress { player: 0, percent: 100 }));
    assert!(events.contains(&EngineEvent::PlayerBuffers { player: 0, frames: 4 * BEAT }));
}

#[test]
fn reloading_frees_the_previous_track_in_the_done_pass() {
    let mut session = Session::new();
    session.load(0, BEAT, None);
    session.load(0, 2 * BEAT, None);
    session.rig.render(BLOCK);

    assert_eq!(session.rig.state().players[0].audio_len(), 2 * BEAT);
    // Everything from the first track is released by now
    assert_eq!(session.consumer.drain().released, 0);
}

#[test]
fn commands_only_sent_on_change() {
    let session = Session::new();
    session.model.player_set_param(0, PlayerParam::Volume, 800);
    session.model.player_set_param(0, PlayerParam::Volume, 800);
    session.model.player_set(0, PlayerFlag::Mute, false);
    assert_eq!(session.rig.scheduler.len(), 1);

    session.model.master_set_crossfade_position(500);
    assert_eq!(session.rig.scheduler.len(), 1);
}

#[test]
fn eq_dials_remap_to_decibels() {
    let mut session = Session::new();
    session.model.player_set_param(0, PlayerParam::Eq(EqBand::Low), 1000);
    session.model.player_set_param(0, PlayerParam::Eq(EqBand::Mid), -1000);
    session.model.player_set_param(0, PlayerParam::Eq(EqBand::High), 5000);
    session.step();

    let player = &session.rig.state().players[0];
    assert_eq!(player.eq_db(EqBand::Low), 6.0);
    assert_eq!(player.eq_db(EqBand::Mid), -70.0);
    assert_eq!(player.eq_db(EqBand::High), 6.0);
    assert_eq!(session.model.player_param(0, PlayerParam::Eq(EqBand::High)), 1000);

    session.model.player_set_param(0, PlayerParam::Eq(EqBand::Low), 0);
    session.step();
    assert_eq!(session.rig.state().players[0].eq_db(EqBand::Low), 0.0);
}

#[test]
fn speed_is_engine_owned_while_syncing() {
    let mut session = Session::new();
    assert!(session.model.player_flag(0, PlayerFlag::Sync));

    session.model.player_set_param(0, PlayerParam::Speed, 100);
    assert!(session.rig.scheduler.is_empty());

    session.model.player_set(0, PlayerFlag::Sync, false);
    session.step();
    // Two speed reports after going free are still the engine's
    session.model.player_set_param(0, PlayerParam::Speed, 100);
    assert_eq!(session.rig.scheduler.len(), 1, "only the state query is queued");
    session.step();
    session.step();

    session.model.player_set_param(0, PlayerParam::Speed, 100);
    session.step();
    let player = &session.rig.state().players[0];
    assert!(!player.is_syncing());
    assert!((player.play_speed() - 1.1).abs() < 1e-9);
    assert!((player.speed() - 1.1).abs() < 1e-9);
}

#[test]
fn master_values_are_clamped() {
    let mut session = Session::new();
    session.model.master_set_crossfade_position(5000);
    session.model.master_set_volume(9000);
    session.model.master_set_cue_volume(-4);
    session.step();

    let state = session.rig.state();
    assert_eq!(state.crossfade.position, 1.0);
    assert_eq!(state.master_volume, 1.5);
    assert_eq!(state.cue_volume, 0.0);
}

#[test]
fn invalid_players_are_ignored() {
    let session = Session::new();
    session.model.player_set(5, PlayerFlag::Pause, false);
    session.model.player_set_param(5, PlayerParam::Volume, 10);
    session.model.player_trigger(5, PlayerTrigger::Reset);
    session.model.master_set_crossfade_players(0, 5);
    session.model.master_sync_to_player(5);
    assert!(session.rig.scheduler.is_empty());
    assert!(session.model.player_load(5, Box::new(MemorySource::new("x", dc(0.0, 1), None))).is_err());
}

#[test]
fn audible_follows_state() {
    let mut session = Session::new();
    session.load(0, 10 * BEAT, None);
    session.model.player_set(0, PlayerFlag::Pause, false);
    session.step();
    session.step();
    session.rig.drain_events();

    session.consumer.eval_audible();
    assert!(session.model.is_audible(0));
    assert!(!session.model.is_audible(1));

    session.model.player_set(0, PlayerFlag::Mute, true);
    session.consumer.eval_audible();
    assert!(!session.model.is_audible(0));

    let audible: Vec<_> = session
        .rig
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, EngineEvent::PlayerAudible { .. }))
        .collect();
    assert_eq!(
        audible,
        vec![
            EngineEvent::PlayerAudible { player: 0, audible: true },
            EngineEvent::PlayerAudible { player: 0, audible: false },
        ]
    );
}

#[test]
fn crossfader_silences_audibility() {
    let mut session = Session::new();
    session.load(1, 10 * BEAT, None);
    session.model.player_set(1, PlayerFlag::Pause, false);
    session.model.master_set_crossfade(true);
    session.model.master_set_crossfade_position(0);
    session.step();
    session.step();

    session.consumer.eval_audible();
    assert!(!session.model.is_audible(1));

    session.model.master_set_crossfade_position(1000);
    session.consumer.eval_audible();
    assert!(session.model.is_audible(1));
}

#[test]
fn deck_pausing_at_end_updates_the_cache() {
    let mut session = Session::new();
    session.load(0, 100, None);
    session.model.player_set(0, PlayerFlag::Sync, false);
    session.model.player_set(0, PlayerFlag::Pause, false);
    session.step();
    session.step();

    assert_eq!(session.rig.state().players[0].play_state(), PlayState::Pause);
    assert!(session.model.player_flag(0, PlayerFlag::Pause));
}

#[test]
fn jump_slots_snap_to_beats() {
    let mut session = Session::new();
    let len = 8 * BEAT;
    session.load(0, len, Some(BeatBuffer::constant(120.0, SAMPLE_RATE, 0.0, len)));

    session.model.player_seek_frame(0, 30_000);
    session.step();
    session.step();
    assert_eq!(session.model.player_frame(0), 30_000);

    assert_eq!(session.model.player_jump(0, 1), Some(BEAT as i64));
    assert_eq!(session.model.player_jump_frame(0, 1), Some(BEAT as i64));

    session.model.player_seek_frame(0, 100_000);
    session.step();
    assert_eq!(session.rig.state().players[0].frame(), 100_000);

    // A stored slot recalls instead of storing
    assert_eq!(session.model.player_jump(0, 1), Some(BEAT as i64));
    session.step();
    assert_eq!(session.rig.state().players[0].frame(), BEAT as i64);

    assert!(session
        .rig
        .drain_events()
        .contains(&EngineEvent::JumpStored { player: 0, slot: 1, frame: BEAT as i64 }));
}

#[test]
fn relative_beat_seeks_follow_the_grid() {
    let mut session = Session::new();
    let len = 8 * BEAT;
    session.load(0, len, Some(BeatBuffer::constant(120.0, SAMPLE_RATE, 0.0, len)));

    session.model.player_seek_frame(0, BEAT as i64);
    session.model.player_trigger(0, PlayerTrigger::SeekForward);
    session.step();
    assert_eq!(session.rig.state().players[0].frame(), 2 * BEAT as i64);

    session.model.player_seek_beats_relative(0, -2);
    session.step();
    assert_eq!(session.rig.state().players[0].frame(), 0);

    session.model.player_seek_frames_relative(0, 0);
    assert_eq!(session.rig.scheduler.len(), 1, "only the state query is queued");
}

#[test]
fn clear_trigger_unloads() {
    let mut session = Session::new();
    session.load(0, BEAT, None);
    session.model.player_trigger(0, PlayerTrigger::Clear);
    session.step();

    assert!(!session.rig.state().players[0].has_audio());
    assert_eq!(session.model.player_frames(0), 0);
    assert!(session.model.player_beats(0).is_none());
}

#[test]
fn consumer_thread_starts_and_stops() {
    let mut rig = Rig::new();
    let done_actions = rig.done_actions.take().unwrap();
    let mut model = AudioModel::new(
        &rig.config,
        rig.scheduler.clone(),
        done_actions.handle(),
        rig.events.clone(),
    )
    .unwrap();

    model.start(done_actions).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    // The consumer keeps a state query queued
    assert!(!rig.scheduler.is_empty());
    rig.render(BLOCK);

    assert!(model.stop().is_some());
    assert!(model.stop().is_none());
}
