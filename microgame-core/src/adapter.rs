//! Adapter layer converting typed microgames to the erased interface
//!
//! `MicrogameAdapter` wraps any typed `Microgame`, caches its descriptor and
//! owns the per-play-through state between `start` and the later hooks.

use std::task::Poll;

use crate::context::MicrogameContext;
use crate::erased::{ErasedMicrogame, MicrogameError};
use crate::typed::{Color, InputEvent, Microgame, MicrogameDescriptor, Rgb};

/// Adapter that converts typed microgames to the erased interface
///
/// # Example
///
/// ```rust
/// # use microgame_core::typed::*;
/// # use microgame_core::adapter::MicrogameAdapter;
/// # use microgame_core::erased::{ErasedMicrogame, MicrogameError};
/// # use microgame_core::context::MicrogameContext;
/// # #[derive(Default)]
/// # struct MyGame;
/// # impl Microgame for MyGame {
/// #     type State = u32;
/// #     fn descriptor(&self) -> MicrogameDescriptor {
/// #         MicrogameDescriptor {
/// #             prompt: "GO!".into(), name: "mine".into(), author: "me".into(), pack: None,
/// #             rgb: Rgb::Fixed(Color::BLACK), duration: 4.0, input: InputKind::Keys,
/// #             url_prefix: String::new(),
/// #         }
/// #     }
/// #     fn start(&mut self, _ctx: &mut MicrogameContext) -> Result<u32, MicrogameError> { Ok(0) }
/// # }
/// let erased: Box<dyn ErasedMicrogame> = Box::new(MicrogameAdapter::new(MyGame::default()));
/// println!("Microgame: {}", erased.descriptor().id());
/// ```
pub struct MicrogameAdapter<T: Microgame> {
    game: T,
    descriptor: MicrogameDescriptor,
    state: Option<T::State>,
}

impl<T: Microgame> MicrogameAdapter<T> {
    /// Create a new adapter wrapping the given microgame
    pub fn new(game: T) -> Self {
        let descriptor = game.descriptor();
        Self {
            game,
            descriptor,
            state: None,
        }
    }

    /// Get a reference to the underlying microgame
    pub fn game(&self) -> &T {
        &self.game
    }

    /// Get a mutable reference to the underlying microgame
    pub fn game_mut(&mut self) -> &mut T {
        &mut self.game
    }

    /// State created by `start`, if it ran
    pub fn state(&self) -> Option<&T::State> {
        self.state.as_ref()
    }

    /// Consume the adapter and return the underlying microgame
    pub fn into_inner(self) -> T {
        self.game
    }

    fn started(&mut self) -> Result<(&mut T, &mut T::State), MicrogameError> {
        match self.state.as_mut() {
            Some(state) => Ok((&mut self.game, state)),
            None => Err(MicrogameError::Logic(format!(
                "{} used before start",
                self.descriptor.id()
            ))),
        }
    }
}

impl<T: Microgame> ErasedMicrogame for MicrogameAdapter<T> {
    fn descriptor(&self) -> &MicrogameDescriptor {
        &self.descriptor
    }

    fn load(&mut self, ctx: &mut MicrogameContext) -> Poll<Result<(), MicrogameError>> {
        self.game.load(ctx)
    }

    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        if self.state.is_some() {
            return Err(MicrogameError::Logic(format!(
                "{} started twice",
                self.descriptor.id()
            )));
        }
        let state = self.game.start(ctx)?;
        self.state = Some(state);
        Ok(())
    }

    fn update(&mut self, ctx: &mut MicrogameContext, dt: f32) -> Result<(), MicrogameError> {
        let (game, state) = self.started()?;
        game.update(state, ctx, dt)
    }

    fn input(
        &mut self,
        ctx: &mut MicrogameContext,
        event: &InputEvent,
    ) -> Result<(), MicrogameError> {
        let (game, state) = self.started()?;
        game.input(state, ctx, event)
    }

    fn beat(&mut self, ctx: &mut MicrogameContext, beat: i64) -> Result<(), MicrogameError> {
        let (game, state) = self.started()?;
        game.beat(state, ctx, beat)
    }

    fn timeout(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        let (game, state) = self.started()?;
        game.timeout(state, ctx)
    }

    fn rgb(&self, ctx: &MicrogameContext) -> Color {
        let computed = self
            .state
            .as_ref()
            .and_then(|state| self.game.rgb(state, ctx));
        match (computed, self.descriptor.rgb) {
            (Some(color), _) => color,
            (None, Rgb::Fixed(color)) => color,
            (None, Rgb::Computed) => Color::BLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{Modifiers, UndecidedFinish, WinState};
    use crate::typed::InputKind;

    // Test microgame: press the key N times, N scaled by difficulty
    #[derive(Debug, PartialEq)]
    struct TestGame {
        id: String,
        starts: u32,
    }

    #[derive(Debug, PartialEq)]
    struct Presses {
        needed: u32,
        count: u32,
    }

    impl TestGame {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                starts: 0,
            }
        }
    }

    impl Microgame for TestGame {
        type State = Presses;

        fn descriptor(&self) -> MicrogameDescriptor {
            MicrogameDescriptor {
                prompt: "MASH!".to_string(),
                name: self.id.clone(),
                author: "test".to_string(),
                pack: None,
                rgb: Rgb::Computed,
                duration: 4.0,
                input: InputKind::Keys,
                url_prefix: String::new(),
            }
        }

        fn start(&mut self, ctx: &mut MicrogameContext) -> Result<Presses, MicrogameError> {
            self.starts += 1;
            Ok(Presses {
                needed: 2 * ctx.difficulty().level() as u32,
                count: 0,
            })
        }

        fn input(
            &mut self,
            state: &mut Presses,
            ctx: &mut MicrogameContext,
            _event: &InputEvent,
        ) -> Result<(), MicrogameError> {
            state.count += 1;
            if state.count >= state.needed {
                ctx.win();
            }
            Ok(())
        }

        fn rgb(&self, state: &Presses, _ctx: &MicrogameContext) -> Option<Color> {
            Some(Color::new((state.count * 10) as u8, 0, 0))
        }
    }

    fn context(difficulty: u8) -> MicrogameContext {
        let mut ctx = MicrogameContext::new(
            4.0,
            Modifiers::new(difficulty, 1.0).unwrap(),
            UndecidedFinish::Neutral,
            "",
            3,
        );
        ctx.begin();
        ctx
    }

    #[test]
    fn test_adapter_caches_descriptor() {
        let adapter = MicrogameAdapter::new(TestGame::new("mash"));
        assert_eq!(adapter.descriptor().id().to_string(), "test:mash");
        assert!(adapter.state().is_none());
    }

    #[test]
    fn test_adapter_start_and_input() {
        let mut adapter = MicrogameAdapter::new(TestGame::new("mash"));
        let mut ctx = context(2);

        adapter.start(&mut ctx).unwrap();
        assert_eq!(adapter.state(), Some(&Presses { needed: 4, count: 0 }));

        for _ in 0..4 {
            adapter.input(&mut ctx, &InputEvent::key_down("space")).unwrap();
        }
        assert_eq!(ctx.win_state(), WinState::Won);
    }

    #[test]
    fn test_adapter_rejects_hooks_before_start() {
        let mut adapter = MicrogameAdapter::new(TestGame::new("mash"));
        let mut ctx = context(1);

        let result = adapter.update(&mut ctx, 0.016);
        match result.unwrap_err() {
            MicrogameError::Logic(msg) => assert!(msg.contains("before start")),
            other => panic!("Expected Logic error, got {other:?}"),
        }
    }

    #[test]
    fn test_adapter_rejects_double_start() {
        let mut adapter = MicrogameAdapter::new(TestGame::new("mash"));
        let mut ctx = context(1);

        adapter.start(&mut ctx).unwrap();
        assert!(adapter.start(&mut ctx).is_err());
        assert_eq!(adapter.game().starts, 1);
    }

    #[test]
    fn test_adapter_computed_rgb() {
        let mut adapter = MicrogameAdapter::new(TestGame::new("mash"));
        let mut ctx = context(3);

        // Not started yet: falls back to black for computed colors
        assert_eq!(adapter.rgb(&ctx), Color::BLACK);

        adapter.start(&mut ctx).unwrap();
        adapter.input(&mut ctx, &InputEvent::key_down("a")).unwrap();
        assert_eq!(adapter.rgb(&ctx), Color::new(10, 0, 0));
    }

    #[test]
    fn test_adapter_inner_access() {
        let mut adapter = MicrogameAdapter::new(TestGame::new("mash"));

        adapter.game_mut().id = "modified".to_string();
        assert_eq!(adapter.game().id, "modified");
        // The cached descriptor is fixed at construction
        assert_eq!(adapter.descriptor().name, "mash");

        let inner = adapter.into_inner();
        assert_eq!(inner.id, "modified");
    }
}
