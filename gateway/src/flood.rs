//! Flood guard: requests-per-minute ceiling per session

use std::time::Duration;

/// Sessions younger than this are never judged, so connect bursts pass
pub const EVALUATION_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct FloodGuard {
    rpm_limit: f64,
}

impl FloodGuard {
    pub fn new(rpm_limit: f64) -> Self {
        Self { rpm_limit }
    }

    pub fn rpm_limit(&self) -> f64 {
        self.rpm_limit
    }

    /// Returns the offending rate when the session is over the ceiling
    pub fn evaluate(&self, packet_count: u32, age: Duration) -> Option<f64> {
        if age < EVALUATION_FLOOR {
            return None;
        }
        let minutes = age.as_secs_f64() / 60.0;
        let rpm = packet_count as f64 / minutes;
        if rpm > self.rpm_limit {
            Some(rpm)
        } else {
            None
        }
    }
}
