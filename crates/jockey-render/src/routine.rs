//! The scripted mix, as timed commands
//!
//! Deck A plays on the main bus from the start while deck B is previewed on
//! cue and looped. B then moves to main and the crossfader sweeps over to
//! it. A jumps around by beats, and the tempo is pushed up at the end.

use jockey_core::engine::{
    Command, MasterDoubleAction, MasterDoubleCommand, PlayerPositionCommand, PlayerStateAction,
    PlayerStateCommand, PositionTarget, Scheduler, TransportBpmCommand,
};
use jockey_core::music::TimePoint;

pub const DECK_A: usize = 0;
pub const DECK_B: usize = 1;

/// Bars the crossfader takes to travel from A to B
const SWEEP_BARS: u32 = 4;
pub const FINAL_BPM: f64 = 130.0;

/// Queue the routine; returns the number of commands scheduled
pub fn schedule(scheduler: &Scheduler, beats_per_bar: u32) -> usize {
    let bar = |n: u32| TimePoint::from_beats((n * beats_per_bar) as f64, beats_per_bar);
    let mut count = 0;
    let mut at = |time: TimePoint, command: Box<dyn Command>| {
        scheduler.schedule_boxed(time, command);
        count += 1;
    };

    // B loops its third bar while on cue
    at(
        bar(1),
        Box::new(PlayerPositionCommand::new(
            DECK_B,
            PositionTarget::LoopStart,
            bar(2),
        )),
    );
    at(
        bar(1),
        Box::new(PlayerPositionCommand::new(
            DECK_B,
            PositionTarget::LoopEnd,
            bar(3),
        )),
    );
    at(
        bar(2),
        Box::new(PlayerStateCommand::new(DECK_B, PlayerStateAction::Loop)),
    );

    // B to main, then sweep one step per beat
    at(
        bar(4),
        Box::new(PlayerStateCommand::new(DECK_B, PlayerStateAction::OutMain)),
    );
    let steps = SWEEP_BARS * beats_per_bar;
    for step in 1..=steps {
        let time = TimePoint::from_beats((4 * beats_per_bar + step) as f64, beats_per_bar);
        at(
            time,
            Box::new(MasterDoubleCommand::new(
                MasterDoubleAction::XfadePosition,
                step as f64 / steps as f64,
            )),
        );
    }
    at(
        bar(6),
        Box::new(PlayerStateCommand::new(DECK_B, PlayerStateAction::NoLoop)),
    );

    // A, now faded out, jumps back a bar and then forward two
    at(
        bar(8),
        Box::new(PlayerPositionCommand::new(
            DECK_A,
            PositionTarget::PlayRelative,
            TimePoint::from_beats(-(beats_per_bar as f64), beats_per_bar),
        )),
    );
    at(
        bar(9),
        Box::new(PlayerPositionCommand::new(
            DECK_A,
            PositionTarget::PlayRelative,
            TimePoint::from_beats(2.0 * beats_per_bar as f64, beats_per_bar),
        )),
    );

    at(bar(10), Box::new(TransportBpmCommand::new(FINAL_BPM)));
    at(
        bar(12),
        Box::new(PlayerStateCommand::new(DECK_A, PlayerStateAction::Pause)),
    );

    count
}
