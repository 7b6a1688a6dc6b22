//! Session sequencer
//!
//! Plays microgames back to back: picks the next id, hands out modifiers and
//! per-play-through seeds, keeps lives and score, and raises the pace every
//! `games_per_level` games. Speed climbs in steps up to `max_speed`; a level
//! up at top speed raises the difficulty and drops back to the start speed.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state_machine::{Difficulty, ModifierError, Modifiers, UndecidedFinish, WinState};
use crate::typed::MicrogameId;

/// Session settings, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub lives: u32,
    pub games_per_level: u32,
    pub start_speed: f32,
    pub speed_step: f32,
    pub max_speed: f32,
    pub start_difficulty: Difficulty,
    pub undecided_finish: UndecidedFinish,
    /// Stop after this many games even with lives left; 0 plays until out
    pub max_games: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lives: 4,
            games_per_level: 5,
            start_speed: 1.0,
            speed_step: 0.25,
            max_speed: 2.0,
            start_difficulty: Difficulty::MIN,
            undecided_finish: UndecidedFinish::Neutral,
            max_games: 0,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.lives == 0 {
            return Err(SessionError::InvalidConfig("lives must be at least 1".into()));
        }
        if self.games_per_level == 0 {
            return Err(SessionError::InvalidConfig(
                "games_per_level must be at least 1".into(),
            ));
        }
        if !self.speed_step.is_finite() || self.speed_step < 0.0 {
            return Err(SessionError::InvalidConfig(format!(
                "speed_step must be non-negative, got {}",
                self.speed_step
            )));
        }
        // Both ends must be valid speeds
        Modifiers::new(self.start_difficulty.level(), self.start_speed)?;
        Modifiers::new(self.start_difficulty.level(), self.max_speed)?;
        if self.max_speed < self.start_speed {
            return Err(SessionError::InvalidConfig(format!(
                "max_speed {} is below start_speed {}",
                self.max_speed, self.start_speed
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Modifier(#[from] ModifierError),
    #[error("No microgames to pick from")]
    EmptyCatalog,
    #[error("Session is over")]
    Over,
}

/// What recording a result changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Continue,
    SpeedUp(f32),
    DifficultyUp(Difficulty),
    GameOver,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub played: u32,
    pub score: u32,
    pub lives: u32,
    pub level: u32,
    pub speed: f32,
    pub difficulty: Difficulty,
}

pub struct Session {
    config: SessionConfig,
    rng: ChaCha20Rng,
    lives: u32,
    score: u32,
    played: u32,
    level: u32,
    modifiers: Modifiers,
    last: Option<MicrogameId>,
}

impl Session {
    pub fn new(config: SessionConfig, seed: u64) -> Result<Self, SessionError> {
        config.validate()?;
        let modifiers = Modifiers::new(config.start_difficulty.level(), config.start_speed)?;
        Ok(Self {
            lives: config.lives,
            rng: ChaCha20Rng::seed_from_u64(seed),
            score: 0,
            played: 0,
            level: 1,
            modifiers,
            last: None,
            config,
        })
    }

    /// Pick the next microgame, avoiding an immediate repeat when possible
    pub fn pick(&mut self, ids: &[MicrogameId]) -> Result<MicrogameId, SessionError> {
        if self.is_over() {
            return Err(SessionError::Over);
        }
        let fresh: Vec<&MicrogameId> = ids
            .iter()
            .filter(|id| Some(*id) != self.last.as_ref())
            .collect();
        let picked = if fresh.is_empty() {
            ids.choose(&mut self.rng)
        } else {
            fresh.choose(&mut self.rng).copied()
        };
        let picked = picked.cloned().ok_or(SessionError::EmptyCatalog)?;
        debug!("Session picked {}", picked);
        self.last = Some(picked.clone());
        Ok(picked)
    }

    /// Seed for the next play-through's context
    pub fn next_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Record one finished play-through
    ///
    /// A loss costs a life; a win scores. An undecided outcome does neither.
    pub fn record(&mut self, outcome: WinState) -> Progress {
        if self.is_over() {
            return Progress::GameOver;
        }
        self.played += 1;
        match outcome {
            WinState::Won => self.score += 1,
            WinState::Lost => self.lives = self.lives.saturating_sub(1),
            WinState::Undecided => {}
        }

        if self.is_over() {
            info!(
                "Session over after {} games with score {}",
                self.played, self.score
            );
            return Progress::GameOver;
        }
        if self.played % self.config.games_per_level != 0 {
            return Progress::Continue;
        }
        self.level_up()
    }

    fn level_up(&mut self) -> Progress {
        self.level += 1;
        let speed = self.modifiers.speed();
        let difficulty = self.modifiers.difficulty();

        let progress = if speed < self.config.max_speed {
            let next = (speed + self.config.speed_step).min(self.config.max_speed);
            self.modifiers = Modifiers::new(difficulty.level(), next).unwrap_or(self.modifiers);
            Progress::SpeedUp(self.modifiers.speed())
        } else if difficulty < Difficulty::MAX {
            let raised = difficulty.raised();
            self.modifiers =
                Modifiers::new(raised.level(), self.config.start_speed).unwrap_or(self.modifiers);
            Progress::DifficultyUp(raised)
        } else {
            Progress::Continue
        };

        info!(
            "Level {}: speed {}, difficulty {}",
            self.level,
            self.modifiers.speed(),
            self.modifiers.difficulty().level()
        );
        progress
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn undecided_finish(&self) -> UndecidedFinish {
        self.config.undecided_finish
    }

    pub fn is_over(&self) -> bool {
        self.lives == 0 || (self.config.max_games > 0 && self.played >= self.config.max_games)
    }

    pub fn lives(&self) -> u32 {
        self.lives
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn played(&self) -> u32 {
        self.played
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            played: self.played,
            score: self.score,
            lives: self.lives,
            level: self.level,
            speed: self.modifiers.speed(),
            difficulty: self.modifiers.difficulty(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("summary", &self.summary())
            .field("last", &self.last)
            .finish()
    }
}
