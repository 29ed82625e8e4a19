//! Range classification against fixed clinical thresholds (mg/dL).

use serde::{Deserialize, Serialize};

use crate::models::{GlucoseInterval, MealCategory};

pub const LOW: f64 = 60.0;
/// Upper bound for meal categories under the 1-hour convention.
pub const HIGH: f64 = 140.0;
pub const FASTING_HIGH: f64 = 95.0;
/// Upper bound for meal categories under the 2-hour convention.
pub const OTHER_HIGH: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeClass {
    Low,
    InRange,
    High,
}

/// Inclusive upper bound of the healthy band for a category.
#[must_use]
pub fn upper_bound(category: MealCategory, interval: GlucoseInterval) -> f64 {
    match (category, interval) {
        (MealCategory::Fasting, _) => FASTING_HIGH,
        (_, GlucoseInterval::TwoHour) => OTHER_HIGH,
        _ => HIGH,
    }
}

/// Both bounds are inclusive.
#[must_use]
pub fn classify(value: f64, category: MealCategory, interval: GlucoseInterval) -> RangeClass {
    if value < LOW {
        RangeClass::Low
    } else if value <= upper_bound(category, interval) {
        RangeClass::InRange
    } else {
        RangeClass::High
    }
}

/// Low / in-range / high tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeCounts {
    pub low: usize,
    pub in_range: usize,
    pub high: usize,
}

impl RangeCounts {
    pub fn record(&mut self, class: RangeClass) {
        match class {
            RangeClass::Low => self.low += 1,
            RangeClass::InRange => self.in_range += 1,
            RangeClass::High => self.high += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.low + self.in_range + self.high
    }
}

impl std::ops::Add for RangeCounts {
    type Output = RangeCounts;

    fn add(self, rhs: RangeCounts) -> RangeCounts {
        RangeCounts {
            low: self.low + rhs.low,
            in_range: self.in_range + rhs.in_range,
            high: self.high + rhs.high,
        }
    }
}

/// `count / total * 100` with two decimals, or `"0"` when there is nothing
/// to divide by.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_percentage(count: usize, total: usize) -> String {
    if total == 0 {
        return "0".to_string();
    }
    format!("{:.2}", count as f64 / total as f64 * 100.0)
}
