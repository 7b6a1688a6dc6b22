//! Per-play-through driver
//!
//! A `Playthrough` owns one fresh microgame instance and its context and
//! drives it frame by frame: load polling, the one-time start, the countdown,
//! beat dispatch, due waits and `update`. Every call into microgame code is
//! isolated; an error or panic aborts this play-through and nothing else.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::task::Poll;

use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

use crate::conductor::Conductor;
use crate::context::MicrogameContext;
use crate::erased::{ErasedMicrogame, MicrogameError};
use crate::state_machine::{Modifiers, Phase, Transition, UndecidedFinish, WinState};
use crate::typed::{Color, InputEvent, MicrogameDescriptor, MicrogameId};

/// Microgame hook a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Start,
    Update,
    Input,
    Beat,
    Timeout,
    Wait,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Start => "start",
            Stage::Update => "update",
            Stage::Input => "input",
            Stage::Beat => "beat",
            Stage::Timeout => "timeout",
            Stage::Wait => "wait",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaythroughFailure {
    pub stage: Stage,
    pub error: MicrogameError,
}

/// Summary of a play-through, available at any point
#[derive(Debug, Clone, PartialEq)]
pub struct PlaythroughReport {
    pub id: Uuid,
    pub microgame: MicrogameId,
    pub seed: u64,
    pub outcome: WinState,
    pub finished: bool,
    pub timed_out: bool,
    pub elapsed: f32,
    pub failure: Option<PlaythroughFailure>,
}

impl PlaythroughReport {
    pub fn won(&self) -> bool {
        self.outcome == WinState::Won
    }
}

/// Drives one microgame instance from load to finish
pub struct Playthrough {
    id: Uuid,
    microgame: MicrogameId,
    game: Box<dyn ErasedMicrogame>,
    ctx: MicrogameContext,
    conductor: Option<Conductor>,
    seed: u64,
    started: bool,
    failure: Option<PlaythroughFailure>,
    span: Span,
}

impl Playthrough {
    /// Wrap a freshly created microgame; the context starts in `Loading`
    pub fn new(
        game: Box<dyn ErasedMicrogame>,
        modifiers: Modifiers,
        undecided_finish: UndecidedFinish,
        seed: u64,
    ) -> Self {
        let descriptor = game.descriptor();
        let microgame = descriptor.id();
        let ctx = MicrogameContext::new(
            descriptor.duration,
            modifiers,
            undecided_finish,
            descriptor.url_prefix.clone(),
            seed,
        );
        let id = Uuid::new_v4();
        let span = tracing::info_span!("playthrough", microgame = %microgame, id = %id);
        span.in_scope(|| {
            debug!(
                "Created play-through (difficulty {}, speed {}, seed {})",
                modifiers.difficulty().level(),
                modifiers.speed(),
                seed
            )
        });

        Self {
            id,
            microgame,
            game,
            ctx,
            conductor: None,
            seed,
            started: false,
            failure: None,
            span,
        }
    }

    /// Deliver beats from `conductor` to the microgame's `beat` hook
    ///
    /// The conductor is destroyed when the play-through finishes.
    pub fn with_conductor(mut self, conductor: Conductor) -> Self {
        self.conductor = Some(conductor);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn microgame(&self) -> &MicrogameId {
        &self.microgame
    }

    pub fn descriptor(&self) -> &MicrogameDescriptor {
        self.game.descriptor()
    }

    pub fn context(&self) -> &MicrogameContext {
        &self.ctx
    }

    pub fn conductor(&self) -> Option<&Conductor> {
        self.conductor.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.is_finished()
    }

    pub fn failure(&self) -> Option<&PlaythroughFailure> {
        self.failure.as_ref()
    }

    /// Run one frame of `dt` seconds
    ///
    /// While loading, this only polls `load` (and calls `start` once it is
    /// ready). Once running: countdown, beats, due waits, then `update`.
    pub fn tick(&mut self, dt: f32) -> Phase {
        let span = self.span.clone();
        let _entered = span.enter();

        if self.ctx.is_finished() {
            return Phase::Finished;
        }

        if !self.started {
            self.poll_load();
            self.settle();
            return self.ctx.phase();
        }

        if let Some(Transition::TimedOut { .. }) = self.ctx.advance(dt) {
            self.call(Stage::Timeout, |game, ctx| game.timeout(ctx));
        }

        let beat = self
            .conductor
            .as_mut()
            .and_then(|conductor| conductor.tick());
        if let Some(beat) = beat {
            if !self.ctx.is_finished() {
                self.call(Stage::Beat, move |game, ctx| game.beat(ctx, beat));
            }
        }

        self.run_due_waits();

        if !self.ctx.is_finished() {
            self.call(Stage::Update, move |game, ctx| game.update(ctx, dt));
        }

        self.settle();
        self.ctx.phase()
    }

    /// Forward one input event; ignored unless the microgame has started
    pub fn input(&mut self, event: &InputEvent) {
        let span = self.span.clone();
        let _entered = span.enter();

        if !self.started || self.ctx.is_finished() {
            debug!("Dropping input {:?} outside of the running phase", event);
            return;
        }
        self.call(Stage::Input, |game, ctx| game.input(ctx, event));
        self.settle();
    }

    /// Ambient color for this frame
    pub fn rgb(&self) -> Color {
        let game = self.game.as_ref();
        let ctx = &self.ctx;
        match panic::catch_unwind(AssertUnwindSafe(|| game.rgb(ctx))) {
            Ok(color) => color,
            Err(payload) => {
                warn!(
                    microgame = %self.microgame,
                    "rgb hook panicked: {}",
                    panic_message(payload.as_ref())
                );
                Color::BLACK
            }
        }
    }

    /// Host-forced finish; the outcome is left as it stands
    pub fn abort(&mut self) {
        let span = self.span.clone();
        let _entered = span.enter();
        self.ctx.abort();
        self.settle();
    }

    pub fn report(&self) -> PlaythroughReport {
        PlaythroughReport {
            id: self.id,
            microgame: self.microgame.clone(),
            seed: self.seed,
            outcome: self.ctx.win_state(),
            finished: self.ctx.is_finished(),
            timed_out: self.ctx.timed_out(),
            elapsed: self.ctx.elapsed(),
            failure: self.failure.clone(),
        }
    }

    fn poll_load(&mut self) {
        let game = self.game.as_mut();
        let ctx = &mut self.ctx;
        let polled = guarded(move || match game.load(ctx) {
            Poll::Pending => Ok(false),
            Poll::Ready(result) => result.map(|()| true),
        });

        match polled {
            Ok(false) => {}
            Ok(true) => {
                self.ctx.begin();
                self.started = true;
                self.call(Stage::Start, |game, ctx| game.start(ctx));
            }
            Err(error) => self.fail(Stage::Load, error),
        }
    }

    fn run_due_waits(&mut self) {
        while !self.ctx.is_finished() {
            let Some(callback) = self.ctx.pop_due_wait() else {
                break;
            };
            let ctx = &mut self.ctx;
            if let Err(error) = guarded(move || callback(ctx)) {
                self.fail(Stage::Wait, error);
            }
        }
    }

    fn call<F>(&mut self, stage: Stage, hook: F)
    where
        F: FnOnce(&mut dyn ErasedMicrogame, &mut MicrogameContext) -> Result<(), MicrogameError>,
    {
        let game = self.game.as_mut();
        let ctx = &mut self.ctx;
        if let Err(error) = guarded(move || hook(game, ctx)) {
            self.fail(stage, error);
        }
    }

    fn fail(&mut self, stage: Stage, error: MicrogameError) {
        error!(
            microgame = %self.microgame,
            stage = %stage,
            "Microgame failed, aborting play-through: {}",
            error
        );
        if self.failure.is_none() {
            self.failure = Some(PlaythroughFailure { stage, error });
        }
        self.ctx.abort();
    }

    /// Log transitions and tear down once finished
    fn settle(&mut self) {
        for transition in self.ctx.take_transitions() {
            match transition {
                Transition::Started => info!("Started: {}", self.game.descriptor().prompt),
                Transition::Won => info!("Won"),
                Transition::Lost => info!("Lost"),
                Transition::TimedOut { forced_loss } => {
                    debug!("Timed out (forced loss: {})", forced_loss)
                }
                Transition::Finished(outcome) => info!("Finished with {:?}", outcome),
                Transition::Aborted(outcome) => warn!("Aborted with {:?}", outcome),
            }
        }

        if self.ctx.is_finished() {
            if let Some(mut conductor) = self.conductor.take() {
                conductor.destroy();
            }
        }
    }
}

impl fmt::Debug for Playthrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Playthrough")
            .field("id", &self.id)
            .field("microgame", &self.microgame)
            .field("ctx", &self.ctx)
            .field("started", &self.started)
            .field("failure", &self.failure)
            .finish()
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R, MicrogameError>) -> Result<R, MicrogameError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(MicrogameError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
