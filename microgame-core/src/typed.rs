//! Typed Microgame trait providing ergonomic interface for microgame authors
//!
//! This trait allows compiled-in microgames to keep their per-play-through
//! state in a strongly-typed value while the host only ever sees the erased
//! interface.

use std::fmt;
use std::str::FromStr;
use std::task::Poll;

use serde::{Deserialize, Serialize};

use crate::context::MicrogameContext;
use crate::erased::MicrogameError;

/// Plain RGB color used for ambient camera/background feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Where a microgame's ambient color comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rgb {
    /// Constant color
    Fixed(Color),
    /// Evaluated on demand through the microgame's `rgb` hook
    Computed,
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::Fixed(Color::BLACK)
    }
}

/// Input modality a microgame declares it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Keys,
    Mouse,
    Click,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::Keys => "keys",
            InputKind::Mouse => "mouse",
            InputKind::Click => "click",
        };
        f.write_str(name)
    }
}

impl FromStr for InputKind {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keys" => Ok(InputKind::Keys),
            "mouse" => Ok(InputKind::Mouse),
            "click" => Ok(InputKind::Click),
            other => Err(DescriptorError::UnknownInput(other.to_string())),
        }
    }
}

/// Abstract input forwarded by the host
///
/// Device handling belongs to the engine; the harness only routes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    MouseMove { x: f32, y: f32 },
    Click { x: f32, y: f32 },
}

impl InputEvent {
    pub fn key_down(key: impl Into<String>) -> Self {
        InputEvent::KeyDown { key: key.into() }
    }

    pub fn key_up(key: impl Into<String>) -> Self {
        InputEvent::KeyUp { key: key.into() }
    }

    /// Modality this event belongs to
    pub fn kind(&self) -> InputKind {
        match self {
            InputEvent::KeyDown { .. } | InputEvent::KeyUp { .. } => InputKind::Keys,
            InputEvent::MouseMove { .. } => InputKind::Mouse,
            InputEvent::Click { .. } => InputKind::Click,
        }
    }
}

/// Catalog key: `author:name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MicrogameId {
    pub author: String,
    pub name: String,
}

impl MicrogameId {
    pub fn new(author: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MicrogameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author, self.name)
    }
}

impl FromStr for MicrogameId {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((author, name))
                if !author.is_empty() && !name.is_empty() && !name.contains(':') =>
            {
                Ok(MicrogameId::new(author, name))
            }
            _ => Err(DescriptorError::InvalidId(s.to_string())),
        }
    }
}

/// Static description of a microgame, immutable once registered
#[derive(Debug, Clone, PartialEq)]
pub struct MicrogameDescriptor {
    /// Player-facing instruction, e.g. "DODGE!"
    pub prompt: String,
    pub name: String,
    pub author: String,
    pub pack: Option<String>,
    pub rgb: Rgb,
    /// Base duration in seconds before speed scaling
    pub duration: f32,
    pub input: InputKind,
    /// Base path the microgame's own assets resolve against
    pub url_prefix: String,
}

impl MicrogameDescriptor {
    pub fn id(&self) -> MicrogameId {
        MicrogameId::new(self.author.clone(), self.name.clone())
    }

    /// Check the invariants every registered descriptor must hold
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.author.is_empty() {
            return Err(DescriptorError::EmptyField("author"));
        }
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyField("name"));
        }
        if self.author.contains(':') || self.name.contains(':') {
            return Err(DescriptorError::InvalidId(self.id().to_string()));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(DescriptorError::InvalidDuration(self.duration));
        }
        Ok(())
    }
}

/// Error type for descriptor validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("Duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f32),
    #[error("Invalid microgame id `{0}`, expected `author:name`")]
    InvalidId(String),
    #[error("Unknown input kind `{0}`, expected keys, mouse or click")]
    UnknownInput(String),
}

/// Main trait for compiled-in microgames
///
/// A microgame builds its state in `start` and receives it back in every
/// later hook. Everything that affects the play-through (asset requests,
/// win/lose/finish, delayed callbacks) goes through the context.
///
/// # Example
///
/// ```rust
/// # use microgame_core::typed::*;
/// # use microgame_core::context::MicrogameContext;
/// # use microgame_core::erased::MicrogameError;
/// struct PressAnything;
///
/// impl Microgame for PressAnything {
///     type State = ();
///
///     fn descriptor(&self) -> MicrogameDescriptor {
///         MicrogameDescriptor {
///             prompt: "PRESS!".to_string(),
///             name: "press".to_string(),
///             author: "docs".to_string(),
///             pack: None,
///             rgb: Rgb::Fixed(Color::WHITE),
///             duration: 4.0,
///             input: InputKind::Keys,
///             url_prefix: String::new(),
///         }
///     }
///
///     fn start(&mut self, _ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
///         Ok(())
///     }
///
///     fn input(&mut self, _state: &mut (), ctx: &mut MicrogameContext, _event: &InputEvent) -> Result<(), MicrogameError> {
///         ctx.win();
///         ctx.wait(0.5, |ctx| {
///             ctx.finish();
///             Ok(())
///         });
///         Ok(())
///     }
/// }
/// ```
pub trait Microgame: 'static {
    /// Per-play-through state created by `start`
    type State: 'static;

    fn descriptor(&self) -> MicrogameDescriptor;

    /// Declare assets. Polled once per frame until it returns `Ready`.
    fn load(&mut self, _ctx: &mut MicrogameContext) -> Poll<Result<(), MicrogameError>> {
        Poll::Ready(Ok(()))
    }

    /// Called exactly once after `load` is ready. Must not block.
    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<Self::State, MicrogameError>;

    /// Per-frame logic; `dt` is unscaled frame time in seconds.
    fn update(
        &mut self,
        _state: &mut Self::State,
        _ctx: &mut MicrogameContext,
        _dt: f32,
    ) -> Result<(), MicrogameError> {
        Ok(())
    }

    fn input(
        &mut self,
        _state: &mut Self::State,
        _ctx: &mut MicrogameContext,
        _event: &InputEvent,
    ) -> Result<(), MicrogameError> {
        Ok(())
    }

    fn beat(
        &mut self,
        _state: &mut Self::State,
        _ctx: &mut MicrogameContext,
        _beat: i64,
    ) -> Result<(), MicrogameError> {
        Ok(())
    }

    /// Countdown reached zero. The result may already be decided.
    fn timeout(
        &mut self,
        _state: &mut Self::State,
        _ctx: &mut MicrogameContext,
    ) -> Result<(), MicrogameError> {
        Ok(())
    }

    /// Computed ambient color. `None` falls back to the descriptor's fixed color.
    fn rgb(&self, _state: &Self::State, _ctx: &MicrogameContext) -> Option<Color> {
        None
    }
}
