//! Erased Microgame interface for runtime polymorphism
//!
//! The host only deals with `Box<dyn ErasedMicrogame>`: compiled-in games get
//! here through the adapter layer, script bundles implement it directly.

use std::task::Poll;

use crate::context::MicrogameContext;
use crate::typed::{Color, InputEvent, MicrogameDescriptor};

/// Runtime error raised by microgame code
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MicrogameError {
    #[error("Load failed: {0}")]
    Load(String),
    #[error("Start failed: {0}")]
    Start(String),
    #[error("Game logic error: {0}")]
    Logic(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("Microgame panicked: {0}")]
    Panicked(String),
}

/// Object-safe microgame interface used by the host
///
/// Every hook receives the play-through's context. Errors returned from any
/// hook are isolated to the current play-through by the runner.
///
/// # Example Usage
///
/// ```rust
/// # use microgame_core::erased::*;
/// fn describe(game: &dyn ErasedMicrogame) -> String {
///     let desc = game.descriptor();
///     format!("{} by {}: {}", desc.name, desc.author, desc.prompt)
/// }
/// ```
pub trait ErasedMicrogame: 'static {
    fn descriptor(&self) -> &MicrogameDescriptor;

    /// Polled once per frame while loading
    fn load(&mut self, ctx: &mut MicrogameContext) -> Poll<Result<(), MicrogameError>>;

    /// Invoked exactly once after `load` is ready
    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError>;

    fn update(&mut self, ctx: &mut MicrogameContext, dt: f32) -> Result<(), MicrogameError>;

    fn input(&mut self, ctx: &mut MicrogameContext, event: &InputEvent)
        -> Result<(), MicrogameError>;

    fn beat(&mut self, ctx: &mut MicrogameContext, beat: i64) -> Result<(), MicrogameError>;

    fn timeout(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError>;

    /// Ambient color for the current frame; must be side-effect free
    fn rgb(&self, ctx: &MicrogameContext) -> Color;
}
