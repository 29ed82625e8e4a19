//! Picks which stored field is the canonical glucose value of a reading.

use crate::models::{GlucoseInterval, GlucoseReading};

/// The interval a request asks for and the subject's own default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSelection {
    pub requested: Option<GlucoseInterval>,
    pub subject_default: GlucoseInterval,
}

impl IntervalSelection {
    #[must_use]
    pub fn new(requested: Option<GlucoseInterval>, subject_default: GlucoseInterval) -> Self {
        Self {
            requested,
            subject_default,
        }
    }

    /// Interval in force for grouping: the override, else the subject's default.
    #[must_use]
    pub fn effective(&self) -> GlucoseInterval {
        self.requested.unwrap_or(self.subject_default)
    }

    /// Interval used for display and range thresholds. Combined mode defers
    /// to the subject's own setting.
    #[must_use]
    pub fn display(&self) -> GlucoseInterval {
        match self.effective() {
            GlucoseInterval::Combined => match self.subject_default {
                GlucoseInterval::Combined => GlucoseInterval::OneHour,
                own => own,
            },
            other => other,
        }
    }
}

fn select(reading: &GlucoseReading, interval: GlucoseInterval) -> Option<f64> {
    match interval {
        GlucoseInterval::TwoHour if !reading.category.is_fasting() => reading.glucose_2hr,
        GlucoseInterval::Combined => match (reading.glucose, reading.glucose_2hr) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        },
        _ => reading.glucose,
    }
}

/// The single displayed value of a reading.
///
/// Fasting always yields `glucose`; interval 2 yields `glucose2hr` for meal
/// categories; interval 1 yields `glucose`. Under combined mode the subject's
/// own interval decides.
#[must_use]
pub fn resolve_value(
    reading: &GlucoseReading,
    requested: Option<GlucoseInterval>,
    user_default: GlucoseInterval,
) -> Option<f64> {
    let selection = IntervalSelection::new(requested, user_default);
    select(reading, selection.display())
}

/// The value a reading is grouped and ranked by.
///
/// Identical to [`resolve_value`] except under combined mode, where it is
/// `max(glucose, glucose2hr)`.
#[must_use]
pub fn grouping_value(reading: &GlucoseReading, selection: IntervalSelection) -> Option<f64> {
    match selection.effective() {
        GlucoseInterval::Combined if !reading.category.is_fasting() => {
            select(reading, GlucoseInterval::Combined)
        }
        _ => select(reading, selection.display()),
    }
}

/// Grouping value, treating zero placeholders as "no reading".
#[must_use]
pub fn measured_value(reading: &GlucoseReading, selection: IntervalSelection) -> Option<f64> {
    grouping_value(reading, selection).filter(|v| *v > 0.0)
}
