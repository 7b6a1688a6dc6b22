//! Beat conductor
//!
//! Turns a continuously advancing audio position into one notification per
//! beat index change. The conductor is ticked once per host frame, before
//! any microgame logic that reads the current beat.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

/// Source of the audio playback position
pub trait AudioClock {
    /// Current playback position in seconds
    fn position(&self) -> f64;

    /// Whether the bound audio has ended
    fn has_ended(&self) -> bool;
}

/// Host-driven playback clock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackClock {
    position: f64,
    length: Option<f64>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock for a track of known length; it reports ended at the end
    pub fn with_length(length: f64) -> Self {
        Self {
            position: 0.0,
            length: Some(length),
        }
    }

    pub fn advance(&mut self, delta: f64) {
        self.position = (self.position + delta).max(0.0);
    }

    pub fn seek(&mut self, position: f64) {
        self.position = position.max(0.0);
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
    }
}

impl AudioClock for PlaybackClock {
    fn position(&self) -> f64 {
        self.position
    }

    fn has_ended(&self) -> bool {
        self.length.is_some_and(|length| self.position >= length)
    }
}

/// Shared clock, advanced by the host and read by the conductor
impl<T: AudioClock> AudioClock for Rc<RefCell<T>> {
    fn position(&self) -> f64 {
        self.borrow().position()
    }

    fn has_ended(&self) -> bool {
        self.borrow().has_ended()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConductorError {
    #[error("BPM must be a positive number, got {0}")]
    InvalidBpm(f64),
}

type Listener = Rc<RefCell<Box<dyn FnMut(i64)>>>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

impl Listeners {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }
}

/// Disposer returned by [`Conductor::on_beat`]
#[derive(Debug, Clone)]
pub struct BeatSubscription {
    id: u64,
    listeners: Weak<RefCell<Listeners>>,
}

impl BeatSubscription {
    /// Unregister the listener. Returns `false` if it was already gone.
    pub fn dispose(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = listeners.borrow_mut();
        let before = listeners.entries.len();
        listeners.entries.retain(|(id, _)| *id != self.id);
        listeners.entries.len() != before
    }
}

/// Derives discrete beats from an [`AudioClock`]
pub struct Conductor {
    bpm: f64,
    clock: Box<dyn AudioClock>,
    current_beat: Option<i64>,
    listeners: Rc<RefCell<Listeners>>,
    destroyed: bool,
}

impl Conductor {
    pub fn new(clock: impl AudioClock + 'static, bpm: f64) -> Result<Self, ConductorError> {
        Self::check_bpm(bpm)?;
        Ok(Self {
            bpm,
            clock: Box::new(clock),
            current_beat: None,
            listeners: Rc::new(RefCell::new(Listeners::default())),
            destroyed: false,
        })
    }

    fn check_bpm(bpm: f64) -> Result<(), ConductorError> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(())
        } else {
            Err(ConductorError::InvalidBpm(bpm))
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Change tempo; the next tick uses the new interval as is
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ConductorError> {
        Self::check_bpm(bpm)?;
        self.bpm = bpm;
        Ok(())
    }

    /// Seconds per beat
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Last beat index delivered
    pub fn current_beat(&self) -> Option<i64> {
        self.current_beat
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }

    /// Register a beat listener
    ///
    /// After `destroy` the listener is dropped right away and the returned
    /// subscription is inert.
    pub fn on_beat(&mut self, listener: impl FnMut(i64) + 'static) -> BeatSubscription {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id += 1;
        if !self.destroyed {
            let callback: Box<dyn FnMut(i64)> = Box::new(listener);
            listeners.entries.push((id, Rc::new(RefCell::new(callback))));
        }
        BeatSubscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Recompute the beat index from the clock, delivering it on change
    pub fn tick(&mut self) -> Option<i64> {
        if self.destroyed {
            return None;
        }
        if self.clock.has_ended() {
            debug!("Audio ended, destroying conductor");
            self.destroy();
            return None;
        }

        let beat = (self.clock.position() / self.beat_interval()).floor() as i64;
        if self.current_beat == Some(beat) {
            return None;
        }
        self.current_beat = Some(beat);

        let snapshot: Vec<(u64, Listener)> = self.listeners.borrow().entries.clone();
        for (id, listener) in snapshot {
            // Skip listeners disposed by an earlier listener in this dispatch
            if !self.listeners.borrow().contains(id) {
                continue;
            }
            (*listener.borrow_mut())(beat);
        }
        Some(beat)
    }

    /// Stop recomputation and release every listener; idempotent
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.listeners.borrow_mut().entries.clear();
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("bpm", &self.bpm)
            .field("current_beat", &self.current_beat)
            .field("listeners", &self.listener_count())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
