use rand::prelude::*;
use rand_chacha::ChaCha20Rng;

use microgame_core::typed::{InputEvent, InputKind};

/// Keys the random bot presses
pub const BOT_KEYS: &[&str] = &["left", "right", "up", "down", "space", "a", "d"];

/// Trait for headless input sources
pub trait InputPolicy {
    /// Events to deliver this frame for a microgame taking `kind` input
    fn events(&mut self, kind: InputKind, dt: f32) -> Vec<InputEvent>;
}

/// Policy that never sends input
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlePolicy;

impl InputPolicy for IdlePolicy {
    fn events(&mut self, _kind: InputKind, _dt: f32) -> Vec<InputEvent> {
        Vec::new()
    }
}

/// Policy that sends random events of the microgame's modality
///
/// Events arrive at `rate` per second on average. Positions are normalized
/// screen coordinates in `0.0..1.0`.
pub struct RandomPolicy {
    rng: ChaCha20Rng,
    rate: f32,
}

impl RandomPolicy {
    pub fn with_seed(rate: f32, seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            rate,
        }
    }

    fn position(&mut self) -> (f32, f32) {
        (self.rng.gen_range(0.0..1.0), self.rng.gen_range(0.0..1.0))
    }
}

impl InputPolicy for RandomPolicy {
    fn events(&mut self, kind: InputKind, dt: f32) -> Vec<InputEvent> {
        let chance = f64::from((self.rate * dt).clamp(0.0, 1.0));
        if !self.rng.gen_bool(chance) {
            return Vec::new();
        }

        match kind {
            InputKind::Keys => {
                let key = BOT_KEYS.choose(&mut self.rng).copied().unwrap_or("space");
                vec![InputEvent::key_down(key), InputEvent::key_up(key)]
            }
            InputKind::Mouse => {
                let (x, y) = self.position();
                vec![InputEvent::MouseMove { x, y }]
            }
            InputKind::Click => {
                let (x, y) = self.position();
                vec![InputEvent::Click { x, y }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_policy() {
        let mut policy = IdlePolicy;
        assert!(policy.events(InputKind::Keys, 1.0).is_empty());
    }

    #[test]
    fn test_events_match_modality() {
        let mut policy = RandomPolicy::with_seed(1000.0, 3);

        let keys = policy.events(InputKind::Keys, 0.1);
        assert_eq!(keys.len(), 2);
        assert!(matches!(&keys[0], InputEvent::KeyDown { key } if BOT_KEYS.contains(&key.as_str())));
        assert!(matches!(&keys[1], InputEvent::KeyUp { .. }));

        let moves = policy.events(InputKind::Mouse, 0.1);
        assert!(matches!(moves[..], [InputEvent::MouseMove { x, y }] if (0.0..1.0).contains(&x) && (0.0..1.0).contains(&y)));

        let clicks = policy.events(InputKind::Click, 0.1);
        assert!(matches!(clicks[..], [InputEvent::Click { .. }]));
    }

    #[test]
    fn test_zero_rate_is_silent() {
        let mut policy = RandomPolicy::with_seed(0.0, 3);
        for _ in 0..100 {
            assert!(policy.events(InputKind::Click, 0.1).is_empty());
        }
    }

    #[test]
    fn test_seeded_policy_is_deterministic() {
        let mut a = RandomPolicy::with_seed(5.0, 42);
        let mut b = RandomPolicy::with_seed(5.0, 42);
        for _ in 0..200 {
            assert_eq!(a.events(InputKind::Keys, 1.0 / 60.0), b.events(InputKind::Keys, 1.0 / 60.0));
        }
    }

    #[test]
    fn test_rate_roughly_matches() {
        let mut policy = RandomPolicy::with_seed(6.0, 7);
        let frames = 60 * 100;
        let sent: usize = (0..frames)
            .map(|_| policy.events(InputKind::Click, 1.0 / 60.0).len())
            .sum();
        // 600 expected
        assert!((450..750).contains(&sent), "sent {sent}");
    }
}
