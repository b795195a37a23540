//! Current-draw reading, goal threshold and the ratio between them

use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reading shown before the meter reports anything, in amperes
pub const DEFAULT_INITIAL_READING: f32 = 0.1;

/// Default consumption goal in amperes
pub const DEFAULT_GOAL_AMPS: f32 = 0.15;

/// Decode one inbound token as amperes
///
/// Empty, malformed and non-finite payloads yield `None`.
pub fn parse_reading(payload: &str) -> Option<f32> {
    payload
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Latest reading, shared by the polling and simulation loops
///
/// Last write wins; neither writer coordinates with the other.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    value: Arc<RwLock<f32>>,
}

impl ReadingStore {
    pub fn new(initial: f32) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> f32 {
        *self.value.read().await
    }

    pub async fn set(&self, value: f32) {
        *self.value.write().await = value;
    }

    /// Add `delta` and return the new value
    pub async fn add(&self, delta: f32) -> f32 {
        let mut value = self.value.write().await;
        *value += delta;
        *value
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_READING)
    }
}

/// Consumption threshold readings are compared against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goal(f32);

impl Goal {
    /// Accepts strictly positive, finite amperes only
    pub fn new(amps: f32) -> Option<Self> {
        (amps.is_finite() && amps > 0.0).then_some(Self(amps))
    }

    pub fn amps(&self) -> f32 {
        self.0
    }

    /// `reading / goal`, clamped to [0, 1]
    pub fn ratio(&self, reading: f32) -> f32 {
        (reading / self.0).clamp(0.0, 1.0)
    }
}

impl Default for Goal {
    fn default() -> Self {
        Self(DEFAULT_GOAL_AMPS)
    }
}

/// What the dashboard shows at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DashboardSnapshot {
    pub reading: f32,
    pub goal: f32,
    pub ratio: f32,
    /// A connection is requested; stays set after the link drops until
    /// the session disconnects
    pub connected: bool,
    pub simulating: bool,
}

impl fmt::Display for DashboardSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current draw: {:.2} A | goal {:.2} A ({:.0}%)",
            self.reading,
            self.goal,
            self.ratio * 100.0
        )?;
        if self.connected {
            write!(f, " [linked]")?;
        }
        if self.simulating {
            write!(f, " [simulating]")?;
        }
        Ok(())
    }
}
