use std::fmt;

use crate::models::game::Color;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockServiceError {
    /// The running clocks disagree with the color that has to act.
    ClockInconsistency {
        expected: Option<Color>,
        white_running: bool,
        black_running: bool,
    },
}

impl fmt::Display for ClockServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClockServiceError::ClockInconsistency {
                expected,
                white_running,
                black_running,
            } => write!(
                f,
                "Clock inconsistency: expected {} running, white running: {}, black running: {}",
                expected.map_or("no clock".to_string(), |c| format!("{} clock", c)),
                white_running,
                black_running
            ),
        }
    }
}

impl std::error::Error for ClockServiceError {}
