//! Context handed to microgame hooks
//!
//! The context is the only channel a microgame has into the host: it reads
//! the pacing inputs and countdown, decides the outcome, schedules delayed
//! callbacks and declares the assets it wants under its `url_prefix`.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, warn};

use crate::erased::MicrogameError;
use crate::state_machine::{
    Difficulty, MicrogameState, Modifiers, Phase, Transition, UndecidedFinish, WinState,
};

/// Callback scheduled with [`MicrogameContext::wait`]
pub type WaitCallback = Box<dyn FnOnce(&mut MicrogameContext) -> Result<(), MicrogameError>>;

/// Handle for cancelling a pending wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(u64);

struct PendingWait {
    id: WaitId,
    due: f32,
    callback: WaitCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Sprite,
    Sound,
    Font,
}

/// Asset declared by a microgame, resolved against its url prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub kind: AssetKind,
    pub name: String,
    pub url: String,
}

/// Asset declarations scoped to one microgame's url prefix
#[derive(Debug, Clone, Default)]
pub struct AssetScope {
    url_prefix: String,
    requests: Vec<AssetRequest>,
}

impl AssetScope {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            requests: Vec::new(),
        }
    }

    /// Join `path` onto the url prefix
    pub fn resolve(&self, path: &str) -> String {
        if self.url_prefix.is_empty() || path.contains("://") {
            path.to_string()
        } else if self.url_prefix.ends_with('/') {
            format!("{}{}", self.url_prefix, path.trim_start_matches('/'))
        } else {
            format!("{}/{}", self.url_prefix, path.trim_start_matches('/'))
        }
    }

    pub fn request(&mut self, kind: AssetKind, name: impl Into<String>, path: &str) {
        let url = self.resolve(path);
        self.requests.push(AssetRequest {
            kind,
            name: name.into(),
            url,
        });
    }

    pub fn requests(&self) -> &[AssetRequest] {
        &self.requests
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }
}

/// Per-play-through context
pub struct MicrogameContext {
    state: MicrogameState,
    assets: AssetScope,
    rng: ChaCha20Rng,
    clock: f32,
    waits: Vec<PendingWait>,
    next_wait: u64,
    transitions: Vec<Transition>,
}

impl MicrogameContext {
    /// Create a context in the `Loading` phase
    pub fn new(
        duration: f32,
        modifiers: Modifiers,
        undecided_finish: UndecidedFinish,
        url_prefix: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            state: MicrogameState::new(duration, modifiers, undecided_finish),
            assets: AssetScope::new(url_prefix),
            rng: ChaCha20Rng::seed_from_u64(seed),
            clock: 0.0,
            waits: Vec::new(),
            next_wait: 0,
            transitions: Vec::new(),
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.state.modifiers().difficulty()
    }

    pub fn speed(&self) -> f32 {
        self.state.modifiers().speed()
    }

    pub fn duration(&self) -> f32 {
        self.state.duration()
    }

    pub fn time_left(&self) -> f32 {
        self.state.time_left()
    }

    pub fn elapsed(&self) -> f32 {
        self.state.elapsed()
    }

    pub fn win_state(&self) -> WinState {
        self.state.win_state()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn timed_out(&self) -> bool {
        self.state.timed_out()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Decide a win. Returns `false` if the result was already decided.
    pub fn win(&mut self) -> bool {
        let transition = self.state.win();
        self.record(transition)
    }

    /// Decide a loss. Returns `false` if the result was already decided.
    pub fn lose(&mut self) -> bool {
        let transition = self.state.lose();
        self.record(transition)
    }

    /// End the play-through. Pending waits are dropped immediately.
    pub fn finish(&mut self) -> bool {
        let transition = self.state.finish();
        let changed = self.record(transition);
        if changed {
            self.waits.clear();
        }
        changed
    }

    /// Run `callback` after `seconds` of frame time
    pub fn wait<F>(&mut self, seconds: f32, callback: F) -> WaitId
    where
        F: FnOnce(&mut MicrogameContext) -> Result<(), MicrogameError> + 'static,
    {
        let id = WaitId(self.next_wait);
        self.next_wait += 1;
        if self.state.is_finished() {
            debug!("Ignoring wait scheduled after finish");
            return id;
        }
        self.waits.push(PendingWait {
            id,
            due: self.clock + seconds.max(0.0),
            callback: Box::new(callback),
        });
        id
    }

    pub fn cancel_wait(&mut self, id: WaitId) -> bool {
        let before = self.waits.len();
        self.waits.retain(|wait| wait.id != id);
        self.waits.len() != before
    }

    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    pub fn load_sprite(&mut self, name: impl Into<String>, path: &str) {
        self.load_asset(AssetKind::Sprite, name, path);
    }

    pub fn load_sound(&mut self, name: impl Into<String>, path: &str) {
        self.load_asset(AssetKind::Sound, name, path);
    }

    pub fn load_font(&mut self, name: impl Into<String>, path: &str) {
        self.load_asset(AssetKind::Font, name, path);
    }

    fn load_asset(&mut self, kind: AssetKind, name: impl Into<String>, path: &str) {
        if self.state.phase() != Phase::Loading {
            warn!("Asset `{}` requested outside of load", path);
        }
        self.assets.request(kind, name, path);
    }

    pub fn assets(&self) -> &AssetScope {
        &self.assets
    }

    /// Deterministic per-play-through random source
    pub fn rng(&mut self) -> &mut ChaCha20Rng {
        &mut self.rng
    }

    pub fn state(&self) -> &MicrogameState {
        &self.state
    }

    fn record(&mut self, transition: Option<Transition>) -> bool {
        match transition {
            Some(transition) => {
                self.transitions.push(transition);
                true
            }
            None => false,
        }
    }

    pub(crate) fn begin(&mut self) -> bool {
        let transition = self.state.begin();
        self.record(transition)
    }

    pub(crate) fn abort(&mut self) -> bool {
        let transition = self.state.abort();
        self.waits.clear();
        self.record(transition)
    }

    /// Advance the countdown and the wait clock
    pub(crate) fn advance(&mut self, dt: f32) -> Option<Transition> {
        self.clock += dt.max(0.0);
        let transition = self.state.advance(dt);
        self.record(transition);
        transition
    }

    /// Remove the earliest wait that is due, if any
    pub(crate) fn pop_due_wait(&mut self) -> Option<WaitCallback> {
        let clock = self.clock;
        let index = self
            .waits
            .iter()
            .enumerate()
            .filter(|(_, wait)| wait.due <= clock)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.0.cmp(&b.id.0)))
            .map(|(index, _)| index)?;
        Some(self.waits.remove(index).callback)
    }

    pub(crate) fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }
}

impl std::fmt::Debug for MicrogameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrogameContext")
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("pending_waits", &self.waits.len())
            .finish()
    }
}
