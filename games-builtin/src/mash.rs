//! Mash: press any key enough times before the countdown ends

use std::task::Poll;

use microgame_core::context::MicrogameContext;
use microgame_core::erased::MicrogameError;
use microgame_core::typed::{Color, InputEvent, InputKind, Microgame, MicrogameDescriptor, Rgb};

/// Presses needed per difficulty level
pub const PRESSES_PER_LEVEL: u32 = 4;

/// Seconds between the decision and `finish`
const OUTRO: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    presses: u32,
    needed: u32,
}

impl State {
    pub fn new(needed: u32) -> Self {
        Self { presses: 0, needed }
    }

    /// Count one press; true exactly when the target is reached
    pub fn press(&mut self) -> bool {
        if self.presses >= self.needed {
            return false;
        }
        self.presses += 1;
        self.presses == self.needed
    }

    pub fn presses(&self) -> u32 {
        self.presses
    }

    pub fn needed(&self) -> u32 {
        self.needed
    }

    /// Share of the target reached, 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        self.presses as f32 / self.needed.max(1) as f32
    }
}

#[derive(Debug, Default)]
pub struct Mash;

impl Mash {
    pub fn new() -> Self {
        Self
    }
}

impl Microgame for Mash {
    type State = State;

    fn descriptor(&self) -> MicrogameDescriptor {
        MicrogameDescriptor {
            prompt: "MASH!".to_string(),
            name: "mash".to_string(),
            author: crate::AUTHOR.to_string(),
            pack: Some(crate::PACK.to_string()),
            rgb: Rgb::Computed,
            duration: 4.0,
            input: InputKind::Keys,
            url_prefix: "builtin/mash".to_string(),
        }
    }

    fn load(&mut self, ctx: &mut MicrogameContext) -> Poll<Result<(), MicrogameError>> {
        ctx.load_sprite("button", "button.png");
        ctx.load_sound("click", "click.ogg");
        Poll::Ready(Ok(()))
    }

    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<State, MicrogameError> {
        Ok(State::new(
            PRESSES_PER_LEVEL * u32::from(ctx.difficulty().level()),
        ))
    }

    fn input(
        &mut self,
        state: &mut State,
        ctx: &mut MicrogameContext,
        event: &InputEvent,
    ) -> Result<(), MicrogameError> {
        if let InputEvent::KeyDown { .. } = event {
            if state.press() && ctx.win() {
                ctx.wait(OUTRO, |ctx| {
                    ctx.finish();
                    Ok(())
                });
            }
        }
        Ok(())
    }

    fn timeout(&mut self, _state: &mut State, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        ctx.wait(OUTRO, |ctx| {
            ctx.finish();
            Ok(())
        });
        Ok(())
    }

    fn rgb(&self, state: &State, _ctx: &MicrogameContext) -> Option<Color> {
        let heat = (state.progress() * 255.0).round() as u8;
        Some(Color::new(heat, 0, 255 - heat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgame_core::adapter::MicrogameAdapter;
    use microgame_core::runner::Playthrough;
    use microgame_core::state_machine::{Modifiers, Phase, UndecidedFinish, WinState};

    fn play(difficulty: u8) -> Playthrough {
        let mut run = Playthrough::new(
            Box::new(MicrogameAdapter::new(Mash::new())),
            Modifiers::new(difficulty, 1.0).unwrap(),
            UndecidedFinish::Neutral,
            1,
        );
        assert_eq!(run.tick(0.0), Phase::Running);
        run
    }

    #[test]
    fn test_press_counting() {
        let mut state = State::new(2);
        assert!(!state.press());
        assert!(state.press());
        // Extra presses are ignored
        assert!(!state.press());
        assert_eq!(state.presses(), 2);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn test_mash_to_win() {
        let mut run = play(2);
        for _ in 0..7 {
            run.input(&InputEvent::key_down("space"));
        }
        assert_eq!(run.phase(), Phase::Running);

        run.input(&InputEvent::key_down("space"));
        assert_eq!(run.phase(), Phase::Won);

        run.tick(0.25);
        assert_eq!(run.phase(), Phase::Won);
        run.tick(0.25);
        assert_eq!(run.phase(), Phase::Finished);
        assert_eq!(run.report().outcome, WinState::Won);
    }

    #[test]
    fn test_key_up_does_not_count() {
        let mut run = play(1);
        for _ in 0..10 {
            run.input(&InputEvent::key_up("space"));
        }
        assert_eq!(run.phase(), Phase::Running);
    }

    #[test]
    fn test_timeout_loses_then_finishes() {
        let mut run = play(1);
        for _ in 0..8 {
            run.tick(0.5);
        }
        assert_eq!(run.phase(), Phase::Lost);

        run.tick(0.5);
        let report = run.report();
        assert!(report.finished);
        assert!(report.timed_out);
        assert_eq!(report.outcome, WinState::Lost);
    }

    #[test]
    fn test_assets_under_prefix() {
        let run = play(1);
        let urls: Vec<&str> = run
            .context()
            .assets()
            .requests()
            .iter()
            .map(|r| r.url.as_str())
            .collect();
        assert_eq!(urls, vec!["builtin/mash/button.png", "builtin/mash/click.ogg"]);
    }

    #[test]
    fn test_rgb_heats_up() {
        let mut run = play(1);
        assert_eq!(run.rgb(), Color::new(0, 0, 255));

        run.input(&InputEvent::key_down("a"));
        run.input(&InputEvent::key_down("a"));
        assert_eq!(run.rgb(), Color::new(128, 0, 127));
    }
}
