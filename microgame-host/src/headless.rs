//! Headless frame loop
//!
//! Plays microgames without a window: a fixed frame time, a simulated music
//! track feeding the conductor, and an `InputPolicy` standing in for the
//! player. Used by the `run` and `session` commands and by tests.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use microgame_core::conductor::{Conductor, ConductorError, PlaybackClock};
use microgame_core::erased::MicrogameError;
use microgame_core::registry::Catalog;
use microgame_core::runner::{Playthrough, PlaythroughReport};
use microgame_core::session::{Progress, Session, SessionConfig, SessionError, SessionSummary};
use microgame_core::state_machine::{Modifiers, Phase, UndecidedFinish, WinState};
use microgame_core::typed::{InputEvent, MicrogameId};

use crate::policy::InputPolicy;

/// Tempo of the backing track at speed 1.0
pub const BASE_BPM: f64 = 120.0;

/// Seconds `load` may stay pending before the play-through is aborted
pub const LOAD_BUDGET: f32 = 5.0;

/// Seconds past the countdown a microgame gets to call `finish`
pub const FINISH_GRACE: f32 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Unknown microgame {0}")]
    UnknownMicrogame(MicrogameId),
    #[error("Cannot create {id}: {source}")]
    Create {
        id: MicrogameId,
        source: MicrogameError,
    },
    #[error(transparent)]
    Conductor(#[from] ConductorError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Cannot write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Cannot encode recording: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Settings for one headless play-through
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub modifiers: Modifiers,
    pub undecided_finish: UndecidedFinish,
    pub seed: u64,
    pub fps: u32,
}

impl PlayOptions {
    pub fn frame_time(&self) -> f32 {
        1.0 / self.fps.max(1) as f32
    }
}

/// One input event and when it was delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedInput {
    pub frame: u64,
    /// Seconds since the microgame started
    pub time: f32,
    pub event: InputEvent,
}

/// Every input delivered during one play-through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecording {
    pub id: Uuid,
    pub microgame: String,
    pub seed: u64,
    pub fps: u32,
    pub difficulty: u8,
    pub speed: f32,
    pub outcome: WinState,
    pub events: Vec<RecordedInput>,
}

impl InputRecording {
    pub fn new(id: &MicrogameId, options: &PlayOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            microgame: id.to_string(),
            seed: options.seed,
            fps: options.fps,
            difficulty: options.modifiers.difficulty().level(),
            speed: options.modifiers.speed(),
            outcome: WinState::Undecided,
            events: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.microgame.replace(':', "_"), self.id)
    }

    /// Write the recording as JSON under `dir`, creating it if needed
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, HostError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| HostError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        let path = dir.join(self.file_name());
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| HostError::Io {
                path: path.clone(),
                source,
            })?;

        info!("Saved {} input events to {}", self.events.len(), path.display());
        Ok(path)
    }
}

/// Play `id` to completion
///
/// The play-through is aborted if loading takes longer than `LOAD_BUDGET` or
/// the microgame has not finished `FINISH_GRACE` seconds after its countdown.
pub fn play(
    catalog: &Catalog,
    id: &MicrogameId,
    options: &PlayOptions,
    policy: &mut dyn InputPolicy,
    mut recording: Option<&mut InputRecording>,
) -> Result<PlaythroughReport, HostError> {
    let game = catalog
        .create(id)
        .ok_or_else(|| HostError::UnknownMicrogame(id.clone()))?
        .map_err(|source| HostError::Create {
            id: id.clone(),
            source,
        })?;

    let input = game.descriptor().input;
    let effective = game.descriptor().duration / options.modifiers.speed();
    let clock = Rc::new(RefCell::new(PlaybackClock::with_length(f64::from(
        effective + FINISH_GRACE,
    ))));
    let conductor = Conductor::new(
        clock.clone(),
        BASE_BPM * f64::from(options.modifiers.speed()),
    )?;

    let mut run = Playthrough::new(
        game,
        options.modifiers,
        options.undecided_finish,
        options.seed,
    )
    .with_conductor(conductor);

    let dt = options.frame_time();
    let load_frames = frames_for(LOAD_BUDGET, options.fps);
    let run_frames = frames_for(effective + FINISH_GRACE, options.fps);
    let mut loading_frames = 0u64;
    let mut running_frames = 0u64;
    let mut frame = 0u64;

    while !run.is_finished() {
        if run.phase() == Phase::Loading {
            if loading_frames >= load_frames {
                warn!("{} did not load within {}s, aborting", id, LOAD_BUDGET);
                run.abort();
                break;
            }
            loading_frames += 1;
        } else {
            if running_frames >= run_frames {
                warn!("{} did not finish within {}s of its countdown, aborting", id, FINISH_GRACE);
                run.abort();
                break;
            }
            running_frames += 1;

            for event in policy.events(input, dt) {
                if let Some(recording) = recording.as_deref_mut() {
                    recording.events.push(RecordedInput {
                        frame,
                        time: run.context().elapsed(),
                        event: event.clone(),
                    });
                }
                run.input(&event);
            }
        }

        let was_loading = run.phase() == Phase::Loading;
        run.tick(dt);
        if !was_loading {
            clock.borrow_mut().advance(f64::from(dt));
        }
        frame += 1;
    }

    let report = run.report();
    if let Some(recording) = recording {
        recording.outcome = report.outcome;
    }
    info!(
        "{} finished: {:?} after {:.2}s{}",
        id,
        report.outcome,
        report.elapsed,
        if report.timed_out { " (timed out)" } else { "" }
    );
    Ok(report)
}

fn frames_for(seconds: f32, fps: u32) -> u64 {
    (seconds * fps as f32).ceil().max(1.0) as u64
}

/// Play back to back until the session is over
///
/// A microgame that cannot be created or fails mid-play counts as a loss, so a
/// broken bundle cannot stall the session.
pub fn run_session(
    catalog: &Catalog,
    config: SessionConfig,
    seed: u64,
    fps: u32,
    policy: &mut dyn InputPolicy,
) -> Result<SessionSummary, HostError> {
    let mut session = Session::new(config, seed)?;

    while !session.is_over() {
        let id = session.pick(catalog.ids())?;
        let options = PlayOptions {
            modifiers: session.modifiers(),
            undecided_finish: session.undecided_finish(),
            seed: session.next_seed(),
            fps,
        };

        let outcome = match play(catalog, &id, &options, policy, None) {
            Ok(report) if report.failure.is_some() => WinState::Lost,
            Ok(report) => report.outcome,
            Err(HostError::Create { id, source }) => {
                warn!("Counting {} as lost: {}", id, source);
                WinState::Lost
            }
            Err(error) => return Err(error),
        };

        match session.record(outcome) {
            Progress::SpeedUp(speed) => info!("Speed up to {}", speed),
            Progress::DifficultyUp(difficulty) => {
                info!("Difficulty up to {}", difficulty.level())
            }
            Progress::Continue | Progress::GameOver => {}
        }
    }

    let summary = session.summary();
    info!(
        "Session over: {} played, score {}, level {}",
        summary.played, summary.score, summary.level
    );
    Ok(summary)
}
