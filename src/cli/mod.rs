//! Command-line interface for strava-extract.

mod commands;

pub use commands::run;
