//! Dodge: switch lanes to avoid falling obstacles
//!
//! Obstacles spawn in random lanes at a difficulty-dependent interval and
//! land one second later at speed 1. Both times shrink with speed. Any obstacle landing in the player's lane loses;
//! surviving all of them wins.

use rand::Rng;

use microgame_core::context::MicrogameContext;
use microgame_core::erased::MicrogameError;
use microgame_core::typed::{Color, InputEvent, InputKind, Microgame, MicrogameDescriptor, Rgb};

pub const LANES: u8 = 3;

/// Seconds from spawn to landing at speed 1
pub const FALL_TIME: f32 = 1.0;

const OUTRO: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub lane: u8,
    pub eta: f32,
}

/// Result of advancing the obstacles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Hit,
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    lane: u8,
    obstacles: Vec<Obstacle>,
    to_spawn: u32,
    spawned: u32,
    dodged: u32,
    interval: f32,
    fall_time: f32,
    next_spawn: f32,
    pulse: bool,
}

impl State {
    pub fn new(difficulty: u8, speed: f32) -> Self {
        let speed = speed.max(f32::EPSILON);
        Self {
            lane: LANES / 2,
            obstacles: Vec::new(),
            to_spawn: 3 + u32::from(difficulty),
            spawned: 0,
            dodged: 0,
            interval: (1.2 - 0.2 * f32::from(difficulty)) / speed,
            fall_time: FALL_TIME / speed,
            next_spawn: 0.0,
            pulse: false,
        }
    }

    pub fn lane(&self) -> u8 {
        self.lane
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn dodged(&self) -> u32 {
        self.dodged
    }

    pub fn to_spawn(&self) -> u32 {
        self.to_spawn
    }

    pub fn move_left(&mut self) {
        self.lane = self.lane.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.lane = (self.lane + 1).min(LANES - 1);
    }

    /// Whether another obstacle is due after `dt` more seconds
    pub fn spawn_due(&mut self, dt: f32) -> bool {
        if self.spawned >= self.to_spawn {
            return false;
        }
        self.next_spawn -= dt;
        if self.next_spawn > 0.0 {
            return false;
        }
        self.next_spawn += self.interval;
        true
    }

    pub fn spawn(&mut self, lane: u8) {
        self.obstacles.push(Obstacle {
            lane: lane.min(LANES - 1),
            eta: self.fall_time,
        });
        self.spawned += 1;
    }

    /// Move obstacles down; reports a hit or the last obstacle clearing
    pub fn fall(&mut self, dt: f32) -> Option<Landing> {
        for obstacle in &mut self.obstacles {
            obstacle.eta -= dt;
        }
        let lane = self.lane;
        let before = self.obstacles.len();
        let mut hit = false;
        self.obstacles.retain(|obstacle| {
            if obstacle.eta > 0.0 {
                return true;
            }
            hit |= obstacle.lane == lane;
            false
        });
        self.dodged += (before - self.obstacles.len()) as u32;

        if hit {
            Some(Landing::Hit)
        } else if self.dodged >= self.to_spawn {
            Some(Landing::Cleared)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct Dodge;

impl Dodge {
    pub fn new() -> Self {
        Self
    }
}

fn finish_later(ctx: &mut MicrogameContext) {
    ctx.wait(OUTRO, |ctx| {
        ctx.finish();
        Ok(())
    });
}

impl Microgame for Dodge {
    type State = State;

    fn descriptor(&self) -> MicrogameDescriptor {
        MicrogameDescriptor {
            prompt: "DODGE!".to_string(),
            name: "dodge".to_string(),
            author: crate::AUTHOR.to_string(),
            pack: Some(crate::PACK.to_string()),
            rgb: Rgb::Computed,
            duration: 5.0,
            input: InputKind::Keys,
            url_prefix: "builtin/dodge".to_string(),
        }
    }

    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<State, MicrogameError> {
        Ok(State::new(ctx.difficulty().level(), ctx.speed()))
    }

    fn update(
        &mut self,
        state: &mut State,
        ctx: &mut MicrogameContext,
        dt: f32,
    ) -> Result<(), MicrogameError> {
        if ctx.win_state().is_decided() {
            return Ok(());
        }
        if state.spawn_due(dt) {
            let lane = ctx.rng().gen_range(0..LANES);
            state.spawn(lane);
        }
        match state.fall(dt) {
            Some(Landing::Hit) => {
                if ctx.lose() {
                    finish_later(ctx);
                }
            }
            Some(Landing::Cleared) => {
                if ctx.win() {
                    finish_later(ctx);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn input(
        &mut self,
        state: &mut State,
        _ctx: &mut MicrogameContext,
        event: &InputEvent,
    ) -> Result<(), MicrogameError> {
        if let InputEvent::KeyDown { key } = event {
            match key.as_str() {
                "left" | "a" => state.move_left(),
                "right" | "d" => state.move_right(),
                _ => {}
            }
        }
        Ok(())
    }

    fn beat(
        &mut self,
        state: &mut State,
        _ctx: &mut MicrogameContext,
        beat: i64,
    ) -> Result<(), MicrogameError> {
        state.pulse = beat % 2 == 0;
        Ok(())
    }

    fn timeout(&mut self, _state: &mut State, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        finish_later(ctx);
        Ok(())
    }

    fn rgb(&self, state: &State, _ctx: &MicrogameContext) -> Option<Color> {
        Some(if state.pulse {
            Color::new(40, 80, 255)
        } else {
            Color::new(20, 40, 160)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgame_core::adapter::MicrogameAdapter;
    use microgame_core::conductor::{Conductor, PlaybackClock};
    use microgame_core::runner::Playthrough;
    use microgame_core::state_machine::{Modifiers, UndecidedFinish};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_lane_bounds() {
        let mut state = State::new(1, 1.0);
        assert_eq!(state.lane(), 1);
        state.move_left();
        state.move_left();
        assert_eq!(state.lane(), 0);
        for _ in 0..5 {
            state.move_right();
        }
        assert_eq!(state.lane(), LANES - 1);
    }

    #[test]
    fn test_spawn_schedule() {
        let mut state = State::new(2, 1.0);
        assert_eq!(state.to_spawn(), 5);

        // First obstacle spawns immediately
        assert!(state.spawn_due(0.0));
        state.spawn(0);
        assert!(!state.spawn_due(0.5));
        assert!(state.spawn_due(0.5));
    }

    #[test]
    fn test_obstacle_in_player_lane_hits() {
        let mut state = State::new(1, 1.0);
        state.spawn(state.lane());
        assert_eq!(state.fall(0.5), None);
        assert_eq!(state.fall(0.5), Some(Landing::Hit));
    }

    #[test]
    fn test_clearing_every_obstacle() {
        let mut state = State::new(1, 1.0);
        for _ in 0..state.to_spawn() {
            state.spawn(0);
        }
        state.move_right();
        assert_eq!(state.fall(FALL_TIME), Some(Landing::Cleared));
        assert_eq!(state.dodged(), 4);
        assert!(state.obstacles().is_empty());
    }

    #[test]
    fn test_perfect_player_beats_the_countdown_at_any_speed() {
        let dt = 1.0 / 60.0;
        for difficulty in 1..=3 {
            for speed in [1.0, 1.5, 2.0] {
                let mut state = State::new(difficulty, speed);
                state.move_right();
                state.move_right();

                let mut elapsed = 0.0;
                let landing = loop {
                    if state.spawn_due(dt) {
                        state.spawn(0);
                    }
                    elapsed += dt;
                    if let Some(landing) = state.fall(dt) {
                        break landing;
                    }
                    assert!(elapsed < 10.0);
                };

                assert_eq!(landing, Landing::Cleared);
                assert!(
                    elapsed < 5.0 / speed,
                    "difficulty {difficulty} speed {speed}: cleared at {elapsed}"
                );
            }
        }
    }

    #[test]
    fn test_fall_time_shrinks_with_speed() {
        let mut state = State::new(1, 2.0);
        state.spawn(state.lane());
        assert_eq!(state.fall(0.25), None);
        assert_eq!(state.fall(0.25), Some(Landing::Hit));
    }

    #[test]
    fn test_playthrough_always_resolves() {
        for seed in 0..5 {
            let mut run = Playthrough::new(
                Box::new(MicrogameAdapter::new(Dodge::new())),
                Modifiers::new(3, 1.0).unwrap(),
                UndecidedFinish::Neutral,
                seed,
            );
            run.tick(0.0);
            for frame in 0..140 {
                if frame % 10 == 0 {
                    run.input(&InputEvent::key_down(if frame % 20 == 0 { "left" } else { "right" }));
                }
                run.tick(0.05);
            }

            let report = run.report();
            assert!(report.finished, "seed {seed} did not finish");
            assert!(report.outcome.is_decided());
        }
    }

    #[test]
    fn test_beat_pulses_color() {
        let clock = Rc::new(RefCell::new(PlaybackClock::new()));
        let mut run = Playthrough::new(
            Box::new(MicrogameAdapter::new(Dodge::new())),
            Modifiers::default(),
            UndecidedFinish::Neutral,
            0,
        )
        .with_conductor(Conductor::new(clock.clone(), 60.0).unwrap());
        run.tick(0.0);

        run.tick(0.0);
        assert_eq!(run.rgb(), Color::new(40, 80, 255));

        clock.borrow_mut().advance(1.0);
        run.tick(0.0);
        assert_eq!(run.rgb(), Color::new(20, 40, 160));
    }
}
