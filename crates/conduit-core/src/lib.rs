//! conduit-core — wire format, one-time-auth primitives, and configuration.
//! The relay and the daemon both depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use wire::{ChunkHeader, WireError, HEADER_SIZE, TAG_SIZE};
