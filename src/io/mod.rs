//! On-disk formats

pub mod snapshot;
