//! Queue-driven music playback for voice channels.
//!
//! Links from a catalog (Spotify) or a media site (YouTube) are expanded
//! into track references at enqueue time, resolved into streams one at a
//! time just before they play, and handed to an audio sink. Each guild gets
//! its own playback session with its own queue.

pub mod config;
pub mod console;
pub mod error;
pub mod expander;
pub mod gateway;
pub mod manager;
pub mod mpd;
pub mod notify;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod session;
pub mod track;

#[cfg(test)]
pub mod testing;

pub use error::{Error, Result};
