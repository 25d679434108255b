//! Jockey Render - headless two-deck mix to WAV
//!
//! Builds an engine context, loads two synthetic tracks through the deck
//! loaders, queues a short scripted routine and renders it offline. The
//! consumer is driven from the render loop so the run is deterministic.
//!
//! ## Command line flags
//!
//! - `--seconds <n>`: length of the render (default 40)
//! - `--out <dir>`: output directory for `jockey_main.wav` / `jockey_cue.wav`
//! - `--config <path>`: engine config YAML (default: user config dir)

mod output;
mod routine;
mod synth;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam::channel::Receiver;

use jockey_core::config::{default_config_path, load_config};
use jockey_core::engine::EngineContext;
use jockey_core::events::EngineEvent;
use jockey_core::model::{AudioModel, PlayerFlag};

use output::BusWriter;
use routine::{DECK_A, DECK_B};
use synth::SyntheticTrack;

const DEFAULT_SECONDS: u32 = 40;
const START_BPM: f64 = 126.0;
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Frames per render call, as a typical audio callback would ask for
const BLOCK_FRAMES: usize = 512;

struct Args {
    seconds: u32,
    out_dir: PathBuf,
    config_path: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        seconds: DEFAULT_SECONDS,
        out_dir: PathBuf::from("."),
        config_path: default_config_path(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("Missing value for {}", arg))
        };
        match arg.as_str() {
            "--seconds" => {
                let raw = value()?;
                args.seconds = raw
                    .parse()
                    .with_context(|| format!("Invalid --seconds value '{}'", raw))?;
            }
            "--out" => args.out_dir = PathBuf::from(value()?),
            "--config" => args.config_path = PathBuf::from(value()?),
            "--help" | "-h" => {
                println!("Usage: jockey-render [--seconds N] [--out DIR] [--config PATH]");
                std::process::exit(0);
            }
            other => bail!("Unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug to see every engine event
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    log::info!("jockey-render starting up");

    let config = load_config(&args.config_path);
    let EngineContext {
        config,
        mut master,
        scheduler,
        done_actions,
        transport,
        events,
    } = EngineContext::new(&config);
    let rx = events.subscribe();
    let sample_rate = config.sample_rate;

    let model = AudioModel::new(&config, scheduler, done_actions.handle(), events.sender())
        .context("Failed to start the audio model")?;

    model.master_set_bpm(START_BPM);
    model
        .player_load(
            DECK_A,
            Box::new(SyntheticTrack::new("deck-a", 124.0, 32, 220.0, sample_rate)),
        )
        .context("Failed to queue deck A")?;
    model
        .player_load(
            DECK_B,
            Box::new(SyntheticTrack::new("deck-b", 128.0, 32, 330.0, sample_rate)),
        )
        .context("Failed to queue deck B")?;
    wait_for_loads(&model, &rx, &[DECK_A, DECK_B])?;

    model.player_set(DECK_B, PlayerFlag::Cue, true);
    model.master_set_crossfade(true);
    model.master_set_crossfade_position(0);
    model.player_set(DECK_A, PlayerFlag::Pause, false);
    model.player_set(DECK_B, PlayerFlag::Pause, false);

    let scheduled = routine::schedule(model.scheduler(), config.beats_per_bar);
    log::info!("Routine queued: {} commands", scheduled);

    let mut consumer = model.consumer(done_actions);
    let mut writer = BusWriter::create(&args.out_dir, "jockey", sample_rate)?;

    let total = args.seconds as usize * sample_rate as usize;
    let block = BLOCK_FRAMES.min(config.max_block_size);
    let poll_frames = frames_for(config.poll_interval_ms, sample_rate);
    let audible_frames = frames_for(config.audible_interval_ms, sample_rate);
    let mut main = vec![0.0f32; block * 2];
    let mut cue = vec![0.0f32; block * 2];

    let started = Instant::now();
    let mut rendered = 0;
    let mut since_poll = 0;
    let mut since_audible = 0;
    let mut event_count = 0usize;
    while rendered < total {
        let len = (total - rendered).min(block);
        master.compute_interleaved(&mut main[..len * 2], &mut cue[..len * 2]);
        writer.write(&main[..len * 2], &cue[..len * 2])?;
        rendered += len;
        since_poll += len;
        since_audible += len;

        if since_poll >= poll_frames {
            since_poll = 0;
            consumer.poll();
        }
        if since_audible >= audible_frames {
            since_audible = 0;
            consumer.eval_audible();
        }
        for event in rx.try_iter() {
            event_count += 1;
            log_event(&event);
        }
    }
    let report = consumer.drain();
    event_count += rx.try_iter().count();

    let elapsed = started.elapsed();
    log::info!(
        "Rendered {:.1} s in {:.2} s ({:.0}x realtime), {} events, {} buffers freed in final pass",
        rendered as f64 / sample_rate as f64,
        elapsed.as_secs_f64(),
        rendered as f64 / sample_rate as f64 / elapsed.as_secs_f64().max(1e-9),
        event_count,
        report.released
    );
    log::info!(
        "Transport ended at beat {:.2}, {:.1} BPM",
        transport.position_beats(),
        transport.bpm()
    );

    let (main_path, cue_path, peak) = writer.finalize()?;
    log::info!("Wrote {:?} (peak {:.3}) and {:?}", main_path, peak, cue_path);
    Ok(())
}

/// Block until every deck in `players` reports a loaded track
fn wait_for_loads(model: &AudioModel, rx: &Receiver<EngineEvent>, players: &[usize]) -> Result<()> {
    let deadline = Instant::now() + LOAD_TIMEOUT;
    while players.iter().any(|&player| model.player_frames(player) == 0) {
        if Instant::now() >= deadline {
            bail!("Timed out waiting for tracks to load");
        }
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(EngineEvent::LoadFailed { player, error }) => {
                bail!("Deck {} failed to load: {}", player, error)
            }
            Ok(EngineEvent::LoadProgress { player, percent }) => {
                log::debug!("Deck {} loading: {}%", player, percent)
            }
            Ok(_) | Err(_) => {}
        }
    }
    for &player in players {
        log::info!("Deck {} loaded: {} frames", player, model.player_frames(player));
    }
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::PlayerAudible { player, audible } => {
            log::info!("Deck {} {}", player, if *audible { "audible" } else { "silent" })
        }
        EngineEvent::PlayerPlayState { player, state } => {
            log::info!("Deck {} is now {:?}", player, state)
        }
        EngineEvent::TransportPosition(_)
        | EngineEvent::PlayerFrame { .. }
        | EngineEvent::PlayerLevel { .. }
        | EngineEvent::MasterLevel(_) => log::trace!("{:?}", event),
        other => log::debug!("{:?}", other),
    }
}

fn frames_for(ms: u64, sample_rate: u32) -> usize {
    ((ms * sample_rate as u64) / 1000).max(1) as usize
}
