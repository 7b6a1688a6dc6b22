//! Play-through state machine
//!
//! `Loading → Running → {Won, Lost} → Finished`. The win state is a tagged
//! variant and the first decision is final; the countdown is scaled by speed
//! and a timeout forces a loss only while the result is undecided.

use serde::{Deserialize, Serialize};

/// Outcome of a play-through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinState {
    #[default]
    Undecided,
    Won,
    Lost,
}

impl WinState {
    pub fn is_decided(self) -> bool {
        self != WinState::Undecided
    }

    /// `None` while undecided, `Some(true)` when won
    pub fn as_option(self) -> Option<bool> {
        match self {
            WinState::Undecided => None,
            WinState::Won => Some(true),
            WinState::Lost => Some(false),
        }
    }
}

/// Observable phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Running,
    Won,
    Lost,
    Finished,
}

/// What `finish()` does when nothing has been decided yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndecidedFinish {
    /// Finish with an undecided outcome
    #[default]
    Neutral,
    /// Treat the early finish as a loss
    Lose,
}

/// Difficulty level, 1 through 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(3);

    pub fn new(level: u8) -> Result<Self, ModifierError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&level) {
            Ok(Difficulty(level))
        } else {
            Err(ModifierError::Difficulty(level))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Next level, saturating at the maximum
    pub fn raised(self) -> Difficulty {
        Difficulty((self.0 + 1).min(Self::MAX.0))
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::MIN
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = ModifierError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Difficulty::new(level)
    }
}

impl From<Difficulty> for u8 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.0
    }
}

/// Host-supplied pacing inputs, fixed before `start`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modifiers {
    difficulty: Difficulty,
    speed: f32,
}

impl Modifiers {
    pub fn new(difficulty: u8, speed: f32) -> Result<Self, ModifierError> {
        let difficulty = Difficulty::new(difficulty)?;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ModifierError::Speed(speed));
        }
        Ok(Self { difficulty, speed })
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::MIN,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModifierError {
    #[error("Difficulty must be between 1 and 3, got {0}")]
    Difficulty(u8),
    #[error("Speed must be a positive number, got {0}")]
    Speed(f32),
}

/// State change reported by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Won,
    Lost,
    /// Countdown hit zero; `forced_loss` is set when it decided the result
    TimedOut { forced_loss: bool },
    Finished(WinState),
    Aborted(WinState),
}

/// Mutable state of one play-through
#[derive(Debug, Clone)]
pub struct MicrogameState {
    modifiers: Modifiers,
    duration: f32,
    elapsed: f32,
    win_state: WinState,
    running: bool,
    finished: bool,
    timed_out: bool,
    undecided_finish: UndecidedFinish,
}

impl MicrogameState {
    /// New state in the `Loading` phase
    pub fn new(duration: f32, modifiers: Modifiers, undecided_finish: UndecidedFinish) -> Self {
        Self {
            modifiers,
            duration,
            elapsed: 0.0,
            win_state: WinState::Undecided,
            running: false,
            finished: false,
            timed_out: false,
            undecided_finish,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.finished {
            Phase::Finished
        } else if !self.running {
            Phase::Loading
        } else {
            match self.win_state {
                WinState::Undecided => Phase::Running,
                WinState::Won => Phase::Won,
                WinState::Lost => Phase::Lost,
            }
        }
    }

    /// `Loading → Running`, once
    pub fn begin(&mut self) -> Option<Transition> {
        if self.running || self.finished {
            return None;
        }
        self.running = true;
        Some(Transition::Started)
    }

    pub fn win(&mut self) -> Option<Transition> {
        self.decide(WinState::Won).then_some(Transition::Won)
    }

    pub fn lose(&mut self) -> Option<Transition> {
        self.decide(WinState::Lost).then_some(Transition::Lost)
    }

    fn decide(&mut self, outcome: WinState) -> bool {
        if !self.running || self.finished || self.win_state.is_decided() {
            return false;
        }
        self.win_state = outcome;
        true
    }

    /// `Running | Won | Lost → Finished`
    pub fn finish(&mut self) -> Option<Transition> {
        if !self.running || self.finished {
            return None;
        }
        if !self.win_state.is_decided() && self.undecided_finish == UndecidedFinish::Lose {
            self.win_state = WinState::Lost;
        }
        self.finished = true;
        Some(Transition::Finished(self.win_state))
    }

    /// Host-forced finish from any phase; the outcome is left as it stands
    pub fn abort(&mut self) -> Option<Transition> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(Transition::Aborted(self.win_state))
    }

    /// Advance the countdown by `dt` seconds of frame time
    pub fn advance(&mut self, dt: f32) -> Option<Transition> {
        if !self.running || self.finished || dt <= 0.0 {
            return None;
        }
        self.elapsed += dt;
        if self.timed_out || self.time_left() > 0.0 {
            return None;
        }
        self.timed_out = true;
        let forced_loss = !self.win_state.is_decided();
        if forced_loss {
            self.win_state = WinState::Lost;
        }
        Some(Transition::TimedOut { forced_loss })
    }

    pub fn time_left(&self) -> f32 {
        (self.duration - self.elapsed * self.modifiers.speed).max(0.0)
    }

    /// Frame time it takes the countdown to run out at the current speed
    pub fn effective_duration(&self) -> f32 {
        self.duration / self.modifiers.speed
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn win_state(&self) -> WinState {
        self.win_state
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn undecided_finish(&self) -> UndecidedFinish {
        self.undecided_finish
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(duration: f32, speed: f32) -> MicrogameState {
        let mut state = MicrogameState::new(
            duration,
            Modifiers::new(2, speed).unwrap(),
            UndecidedFinish::Neutral,
        );
        assert_eq!(state.begin(), Some(Transition::Started));
        state
    }

    #[test]
    fn test_starts_in_loading() {
        let state = MicrogameState::new(4.0, Modifiers::default(), UndecidedFinish::Neutral);
        assert_eq!(state.phase(), Phase::Loading);
        assert_eq!(state.win_state(), WinState::Undecided);
        assert_eq!(state.time_left(), 4.0);
    }

    #[test]
    fn test_decisions_ignored_while_loading() {
        let mut state = MicrogameState::new(4.0, Modifiers::default(), UndecidedFinish::Neutral);
        assert_eq!(state.win(), None);
        assert_eq!(state.finish(), None);
        assert_eq!(state.advance(10.0), None);
        assert_eq!(state.phase(), Phase::Loading);
    }

    #[test]
    fn test_first_decision_wins() {
        let mut state = running(4.0, 1.0);

        assert_eq!(state.win(), Some(Transition::Won));
        assert_eq!(state.lose(), None);
        assert_eq!(state.win(), None);
        assert_eq!(state.win_state(), WinState::Won);
        assert_eq!(state.phase(), Phase::Won);

        let mut state = running(4.0, 1.0);
        assert_eq!(state.lose(), Some(Transition::Lost));
        assert_eq!(state.win(), None);
        assert_eq!(state.win_state(), WinState::Lost);
    }

    #[test]
    fn test_timeout_forces_loss_when_undecided() {
        let mut state = running(4.0, 1.0);

        for _ in 0..7 {
            assert_eq!(state.advance(0.5), None);
        }
        assert_eq!(
            state.advance(0.5),
            Some(Transition::TimedOut { forced_loss: true })
        );
        assert_eq!(state.win_state(), WinState::Lost);
        assert!(state.timed_out());

        // Signalled only once
        assert_eq!(state.advance(0.5), None);
        // Never finishes on its own
        assert_eq!(state.phase(), Phase::Lost);
    }

    #[test]
    fn test_timeout_keeps_existing_decision() {
        let mut state = running(1.0, 1.0);
        state.win();

        assert_eq!(
            state.advance(1.0),
            Some(Transition::TimedOut { forced_loss: false })
        );
        assert_eq!(state.win_state(), WinState::Won);
    }

    #[test]
    fn test_speed_scales_countdown() {
        let mut normal = running(4.0, 1.0);
        let mut fast = running(4.0, 2.0);
        assert_eq!(fast.effective_duration(), 2.0);

        for _ in 0..3 {
            normal.advance(0.5);
            fast.advance(0.5);
        }
        assert_eq!(normal.time_left(), 2.5);
        assert_eq!(fast.time_left(), 1.0);
        assert!(!fast.timed_out());

        assert!(fast.advance(0.5).is_some());
        assert_eq!(fast.time_left(), 0.0);
        assert_eq!(fast.elapsed(), 2.0);
        assert!(!normal.timed_out());
    }

    #[test]
    fn test_finish_after_decision() {
        let mut state = running(4.0, 1.0);
        state.lose();

        assert_eq!(state.finish(), Some(Transition::Finished(WinState::Lost)));
        assert_eq!(state.phase(), Phase::Finished);
        assert_eq!(state.finish(), None);
        assert_eq!(state.win(), None);
        assert_eq!(state.advance(1.0), None);
    }

    #[test]
    fn test_undecided_finish_policies() {
        let mut neutral = running(4.0, 1.0);
        assert_eq!(
            neutral.finish(),
            Some(Transition::Finished(WinState::Undecided))
        );

        let mut losing =
            MicrogameState::new(4.0, Modifiers::default(), UndecidedFinish::Lose);
        losing.begin();
        assert_eq!(losing.finish(), Some(Transition::Finished(WinState::Lost)));
    }

    #[test]
    fn test_abort_from_loading() {
        let mut state = MicrogameState::new(4.0, Modifiers::default(), UndecidedFinish::Neutral);
        assert_eq!(
            state.abort(),
            Some(Transition::Aborted(WinState::Undecided))
        );
        assert!(state.is_finished());
        assert_eq!(state.begin(), None);
        assert_eq!(state.abort(), None);
    }

    #[test]
    fn test_modifier_validation() {
        assert!(Modifiers::new(0, 1.0).is_err());
        assert!(Modifiers::new(4, 1.0).is_err());
        assert_eq!(Modifiers::new(2, 0.0), Err(ModifierError::Speed(0.0)));
        assert!(Modifiers::new(3, f32::INFINITY).is_err());
        assert_eq!(Modifiers::new(3, 1.5).unwrap().difficulty().level(), 3);
        assert_eq!(Difficulty::MAX.raised(), Difficulty::MAX);
    }
}
