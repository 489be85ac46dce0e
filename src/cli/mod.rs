//! Command-line surface for the `eventwatch` binary

pub mod args;
pub mod output;
