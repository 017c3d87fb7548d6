use serde::{Deserialize, Serialize};

/// Smallest amount booked on a remote ticket.
pub const MIN_BILLABLE_HOURS: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    Closest,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingConfig {
    pub increment_minutes: u32,
    pub mode: RoundingMode,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self::quarter_hour_up()
    }
}

impl RoundingConfig {
    pub const fn quarter_hour_up() -> Self {
        Self {
            increment_minutes: 15,
            mode: RoundingMode::Up,
        }
    }

    /// Rounds a non-negative duration in whole seconds to the configured increment.
    pub fn apply(&self, seconds: i64) -> i64 {
        let increment = i64::from(self.increment_minutes) * 60;
        if increment == 0 || seconds <= 0 {
            return seconds.max(0);
        }

        let lower = seconds - seconds % increment;
        if lower == seconds {
            return seconds;
        }
        let upper = lower.saturating_add(increment);

        match self.mode {
            RoundingMode::Down => lower,
            RoundingMode::Up => upper,
            RoundingMode::Closest => {
                if upper - seconds <= seconds - lower {
                    upper
                } else {
                    lower
                }
            }
        }
    }

    /// Rounded hours for a stored duration. Fractional seconds count as a started second.
    pub fn hours(&self, seconds: f64) -> f64 {
        self.apply(whole_seconds(seconds)) as f64 / 3600.0
    }
}

/// Ceiling to the next quarter hour, in hours. Exact multiples stay put.
pub fn quarter_hours_up(seconds: f64) -> f64 {
    RoundingConfig::quarter_hour_up().hours(seconds)
}

/// Hours booked on Redmine for a local duration.
pub fn billable_hours(seconds: f64) -> f64 {
    quarter_hours_up(seconds).max(MIN_BILLABLE_HOURS)
}

/// Same rule applied to hours reported by the server.
pub fn billable_from_hours(hours: f64) -> f64 {
    billable_hours(hours * 3600.0)
}

fn whole_seconds(seconds: f64) -> i64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    // Strip float noise such as 2700.0000000001 before taking the ceiling.
    let snapped = (seconds * 1000.0).round() / 1000.0;
    snapped.ceil() as i64
}
