//! Core traits and types for the microgame harness
//!
//! This crate provides the abstractions shared by the host and every
//! microgame, compiled-in or scripted:
//! - `Microgame`: typed trait for ergonomic microgame development
//! - `ErasedMicrogame`: object-safe interface the host drives
//! - `MicrogameAdapter`: automatic conversion from typed to erased interface
//! - `Catalog`: explicit registry of microgame factories
//! - `Playthrough`: frame driver for one play-through
//! - `Conductor`: beat events derived from an audio clock
//! - `Session`: back-to-back sequencing with lives and rising pace

pub mod adapter;
pub mod conductor;
pub mod context;
pub mod erased;
pub mod registry;
pub mod runner;
pub mod session;
pub mod state_machine;
pub mod typed;

// Re-export main types for convenience
pub use adapter::MicrogameAdapter;
pub use conductor::{AudioClock, BeatSubscription, Conductor, ConductorError, PlaybackClock};
pub use context::{AssetKind, AssetRequest, MicrogameContext, WaitId};
pub use erased::{ErasedMicrogame, MicrogameError};
pub use registry::{Catalog, EntrySource, MicrogameFactory, RegistryError};
pub use runner::{Playthrough, PlaythroughReport, Stage};
pub use session::{Progress, Session, SessionConfig, SessionError};
pub use state_machine::{Difficulty, Modifiers, Phase, UndecidedFinish, WinState};
pub use typed::{
    Color, DescriptorError, InputEvent, InputKind, Microgame, MicrogameDescriptor, MicrogameId,
    Rgb,
};
