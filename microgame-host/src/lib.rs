//! Dev runner for the microgame harness
//!
//! This crate wires the catalog, the headless frame loop and the input bot
//! behind the `microgame-dev` binary.

pub mod config;
pub mod headless;
pub mod policy;
pub mod registry_init;

// Re-export main types
pub use config::{Cli, Command, ConfigError};
pub use headless::{play, run_session, HostError, InputRecording, PlayOptions};
pub use policy::{IdlePolicy, InputPolicy, RandomPolicy};
