//! Application-level glue for the CLI binary.

pub mod progress;
