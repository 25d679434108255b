//! Jockey Core - realtime multi-deck DJ audio engine
//!
//! The render thread owns the [`engine::Master`] and changes state only by
//! executing timed [`engine::Command`]s from the scheduler. Everything else
//! (controllers, loaders, the consumer that frees buffers and reports state)
//! runs on ordinary threads and goes through [`model::AudioModel`] or the
//! [`engine::Scheduler`] directly.

pub mod buffers;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod loader;
pub mod model;
pub mod music;
pub mod timestretch;
pub mod types;

pub use types::*;
