//! Event names and the high-frequency event throttle.
//!
//! Event names are free-form in source (`on player join:`) and normalized to
//! a single lowercase, hyphenated key (`player-join`) before indexing and
//! dispatch.  A few events fire at per-frame rates; for those, dispatch is
//! gated per (event, actor) pair so no script runs more than once a second
//! for the same actor.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Minimum time between two dispatches of a throttled event for one actor.
pub const THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Lowercase, trim, and join internal whitespace with hyphens.
pub fn normalize_event(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

// ── HighFrequency ─────────────────────────────────────────────────────────────

/// Events that hosts fire continuously and that are always throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HighFrequency {
    Move,
    Tick,
    Step,
}

impl HighFrequency {
    pub const ALL: &'static [HighFrequency] =
        &[HighFrequency::Move, HighFrequency::Tick, HighFrequency::Step];

    /// Normalized event name.
    pub fn name(self) -> &'static str {
        match self {
            HighFrequency::Move => "player-move",
            HighFrequency::Tick => "player-tick",
            HighFrequency::Step => "player-step",
        }
    }
}

impl fmt::Display for HighFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HighFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let key = normalize_event(s);
        HighFrequency::ALL
            .iter()
            .copied()
            .find(|h| h.name() == key)
            .ok_or_else(|| format!("not a high-frequency event: {s}"))
    }
}

// ── Throttle ──────────────────────────────────────────────────────────────────

/// Last-fire timestamps per (event, actor id).
#[derive(Debug, Default)]
pub struct Throttle {
    last_fire: HashMap<(HighFrequency, String), Instant>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a firing at `now` and say whether it may run.
    ///
    /// Events outside [`HighFrequency`] always pass.  A dropped firing does
    /// not move the window.
    pub fn allow(&mut self, event: &str, actor_id: &str, now: Instant) -> bool {
        let Ok(kind) = event.parse::<HighFrequency>() else {
            return true;
        };
        let key = (kind, actor_id.to_owned());
        match self.last_fire.get(&key) {
            Some(&last) if now.saturating_duration_since(last) < THROTTLE_INTERVAL => false,
            _ => {
                // Expired entries gate nothing.
                self.last_fire.retain(|_, last| now.saturating_duration_since(*last) < THROTTLE_INTERVAL);
                self.last_fire.insert(key, now);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_fire.clear();
    }

    pub fn len(&self) -> usize {
        self.last_fire.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fire.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
