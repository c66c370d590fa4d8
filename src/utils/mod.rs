//! Utility modules shared across wasmdev.

pub mod exec;
pub mod mime;
pub mod platform;
pub mod plural;
