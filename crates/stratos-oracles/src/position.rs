//! Position oracle: current location and Euclidean distance to a peer,
//! mutated by the simulation harness's mobility stepper.

use std::sync::RwLock;

use stratos_types::Position;

/// `position()` / `distance_to(other)`.
pub trait PositionOracle: Send + Sync {
    fn position(&self) -> Position;

    fn distance_to(&self, other: Position) -> f64 {
        self.position().distance_to(&other)
    }
}

/// A position the harness can move between mobility ticks.
pub struct SimPositionOracle {
    current: RwLock<Position>,
}

impl SimPositionOracle {
    pub fn new(start: Position) -> Self {
        Self { current: RwLock::new(start) }
    }

    pub fn set_position(&self, at: Position) {
        *self.current.write().expect("position lock poisoned") = at;
    }
}

impl PositionOracle for SimPositionOracle {
    fn position(&self) -> Position {
        *self.current.read().expect("position lock poisoned")
    }
}
