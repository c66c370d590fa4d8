//! Command-line interface module.

mod args;
pub mod dev;

pub use args::{BuildArgs, Cli, Commands, ExecutorArgs, ServeArgs};
