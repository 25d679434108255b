//! Background loading of deck buffers
//!
//! Every deck gets its own loader thread, so a slow decode on one deck never
//! delays another. The thread pulls a [`BufferSource`], reports progress,
//! wraps the result in `basedrop::Shared` (so whatever it replaces is freed
//! by the done-action pass, not the render thread) and hands it to a
//! [`LoadSink`]. The model's sink installs the buffers through the
//! scheduler.
//!
//! ```ignore
//! let loader = DeckLoader::spawn(0, done_actions.handle(), sink)?;
//! loader.load(Box::new(MemorySource::new("intro", audio, Some(beats))))?;
//! ```

mod deck;
mod source;

pub use deck::{DeckLoader, LoadSink};
pub use source::{BufferSource, DecodedTrack, MemorySource};
