//! voxcache-core: Pure types, phrase keys and audio encoding.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod text;
pub mod types;
pub mod wav;
