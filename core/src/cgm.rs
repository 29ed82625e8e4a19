//! CGM quality summary: population min/max/mean, range document counts, the
//! measurement-indicator mean and the variation figure, plus exercise totals.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::ceil_mean;
use crate::models::{CgmAnnotations, DateWindow, ExerciseEntry, GlucoseReading, ms_to_date};
use crate::range::{FASTING_HIGH, HIGH, LOW};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSummary {
    pub total_minutes: f64,
    pub active_days: usize,
    /// Ceiling of total minutes per active day.
    pub average_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CgmSummary {
    pub min_glucose: f64,
    pub max_glucose: f64,
    pub avg_glucose: f64,
    pub low_range: usize,
    pub in_range: usize,
    pub out_range: usize,
    pub measurement_indicator_mean: f64,
    pub coeff_variation: String,
    pub exercise: ExerciseSummary,
    pub cgm_active_time: Option<String>,
    pub gmi: Option<String>,
    pub cov: Option<String>,
}

/// The variance is ceiling-rounded before the square root is taken.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coefficient_of_variation(positives: &[f64], indicator_mean: f64) -> String {
    if positives.is_empty() {
        return "0".to_string();
    }
    let squared: f64 = positives.iter().map(|x| (x - indicator_mean).powi(2)).sum();
    let variance = (squared / positives.len() as f64).ceil();
    format!("{:.2}", variance.sqrt())
}

#[must_use]
pub fn summarize_exercise(entries: &[ExerciseEntry], window: &DateWindow) -> ExerciseSummary {
    let (Some(first), Some(last)) = (ms_to_date(window.from), ms_to_date(window.to)) else {
        return ExerciseSummary::default();
    };

    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.date >= first && e.date <= last) {
        *per_day.entry(entry.date).or_default() += entry.duration_minutes;
    }

    let total_minutes: f64 = per_day.values().sum();
    let active_days = per_day.len();
    #[allow(clippy::cast_precision_loss)]
    let average_minutes = if active_days == 0 {
        0.0
    } else {
        (total_minutes / active_days as f64).ceil()
    };

    ExerciseSummary {
        total_minutes,
        active_days,
        average_minutes,
    }
}

#[must_use]
pub fn summarize(
    readings: &[GlucoseReading],
    window: &DateWindow,
    exercise: &[ExerciseEntry],
    annotations: CgmAnnotations,
) -> CgmSummary {
    let in_window: Vec<&GlucoseReading> =
        readings.iter().filter(|r| window.contains(r.time)).collect();

    let all: Vec<f64> = in_window.iter().map(|r| r.glucose.unwrap_or(0.0)).collect();
    let positives: Vec<f64> = all.iter().copied().filter(|v| *v > 0.0).collect();

    // An all-zero window still reports its zeros rather than "no data".
    let population = if positives.is_empty() { &all } else { &positives };
    let min_glucose = population.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max_glucose = population.iter().copied().reduce(f64::max).unwrap_or(0.0);

    let mut low_range = 0;
    let mut meal_in_range = 0;
    let mut fasting_in_range = 0;
    let mut meal_out_range = 0;
    let mut fasting_out_range = 0;

    for reading in &in_window {
        let value = match reading.glucose {
            Some(v) if v > 0.0 => v,
            _ => continue,
        };
        if value < LOW {
            low_range += 1;
        } else if reading.category.is_fasting() {
            if value <= FASTING_HIGH {
                fasting_in_range += 1;
            } else {
                fasting_out_range += 1;
            }
        } else if value <= HIGH {
            meal_in_range += 1;
        } else {
            meal_out_range += 1;
        }
    }

    let avg_glucose = ceil_mean(&positives);
    let measurement_indicator_mean = ceil_mean(&positives);

    CgmSummary {
        min_glucose,
        max_glucose,
        avg_glucose,
        low_range,
        in_range: meal_in_range + fasting_in_range,
        out_range: meal_out_range + fasting_out_range,
        measurement_indicator_mean,
        coeff_variation: coefficient_of_variation(&positives, measurement_indicator_mean),
        exercise: summarize_exercise(exercise, window),
        cgm_active_time: annotations.cgm_active_time,
        gmi: annotations.gmi,
        cov: annotations.cov,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GLUCOSE_UNIT, MealCategory, day_start_ms};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn reading(id: i64, category: MealCategory, glucose: Option<f64>) -> GlucoseReading {
        GlucoseReading {
            id,
            uuid: String::new(),
            user_id: 1,
            date: date(10),
            category,
            glucose,
            glucose_2hr: None,
            is_glucose_exists: glucose.is_some_and(|g| g > 0.0),
            is_glucose_exist_2hr: false,
            is_meal_exists: true,
            is_medication_exists: false,
            insulin_units: None,
            time: day_start_ms(date(10)) + id,
            unit: GLUCOSE_UNIT.to_string(),
        }
    }

    fn window() -> DateWindow {
        DateWindow::for_days(date(1), date(30))
    }

    fn summary_of(values: &[f64]) -> CgmSummary {
        let readings: Vec<GlucoseReading> = values
            .iter()
            .enumerate()
            .map(|(i, v)| reading(i as i64, MealCategory::Lunch, Some(*v)))
            .collect();
        summarize(&readings, &window(), &[], CgmAnnotations::default())
    }

    #[test]
    fn test_zero_variance() {
        let s = summary_of(&[100.0, 100.0, 100.0]);
        assert_eq!(s.coeff_variation, "0.00");
        assert!((s.measurement_indicator_mean - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_variance_example() {
        let s = summary_of(&[80.0, 120.0]);
        assert!((s.measurement_indicator_mean - 100.0).abs() < f64::EPSILON);
        assert_eq!(s.coeff_variation, "20.00");
        assert!((s.min_glucose - 80.0).abs() < f64::EPSILON);
        assert!((s.max_glucose - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_variance_rounded_before_sqrt() {
        let s = summary_of(&[100.0, 103.0]);
        assert!((s.measurement_indicator_mean - 102.0).abs() < f64::EPSILON);
        // mean ceil(101.5) = 102; deviations 4 + 1 = 5; 5 / 2 = 2.5 -> 3 -> sqrt 1.73
        assert_eq!(s.coeff_variation, "1.73");
    }

    #[test]
    fn test_empty_window() {
        let s = summary_of(&[]);
        assert!((s.min_glucose - 0.0).abs() < f64::EPSILON);
        assert!((s.max_glucose - 0.0).abs() < f64::EPSILON);
        assert!((s.avg_glucose - 0.0).abs() < f64::EPSILON);
        assert_eq!(s.coeff_variation, "0");
        assert_eq!(s.low_range + s.in_range + s.out_range, 0);
    }

    #[test]
    fn test_min_ignores_zeros_when_positives_exist() {
        let s = summary_of(&[0.0, 90.0, 150.0]);
        assert!((s.min_glucose - 90.0).abs() < f64::EPSILON);
        assert!((s.avg_glucose - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_all_zero_window_reports_zero_min() {
        let s = summary_of(&[0.0, 0.0]);
        assert!((s.min_glucose - 0.0).abs() < f64::EPSILON);
        assert!((s.max_glucose - 0.0).abs() < f64::EPSILON);
        assert_eq!(s.coeff_variation, "0");
    }

    #[test]
    fn test_range_counts_use_category_thresholds() {
        let readings = vec![
            reading(1, MealCategory::Fasting, Some(50.0)),
            reading(2, MealCategory::Fasting, Some(95.0)),
            reading(3, MealCategory::Fasting, Some(100.0)),
            reading(4, MealCategory::Dinner, Some(140.0)),
            reading(5, MealCategory::Dinner, Some(141.0)),
            reading(6, MealCategory::Dinner, None),
        ];
        let s = summarize(&readings, &window(), &[], CgmAnnotations::default());
        assert_eq!(s.low_range, 1);
        assert_eq!(s.in_range, 2);
        assert_eq!(s.out_range, 2);
    }

    #[test]
    fn test_annotations_echoed() {
        let annotations = CgmAnnotations {
            cgm_active_time: Some("93%".to_string()),
            gmi: Some("6.1".to_string()),
            cov: Some("28.4".to_string()),
        };
        let s = summarize(&[], &window(), &[], annotations);
        assert_eq!(s.cgm_active_time.as_deref(), Some("93%"));
        assert_eq!(s.gmi.as_deref(), Some("6.1"));
        assert_eq!(s.cov.as_deref(), Some("28.4"));
    }

    #[test]
    fn test_exercise_summary() {
        let entries = vec![
            ExerciseEntry { user_id: 1, date: date(10), duration_minutes: 20.0 },
            ExerciseEntry { user_id: 1, date: date(10), duration_minutes: 15.0 },
            ExerciseEntry { user_id: 1, date: date(11), duration_minutes: 30.0 },
            ExerciseEntry { user_id: 1, date: NaiveDate::from_ymd_opt(2024, 7, 2).unwrap(), duration_minutes: 60.0 },
        ];
        let ex = summarize_exercise(&entries, &window());
        assert!((ex.total_minutes - 65.0).abs() < f64::EPSILON);
        assert_eq!(ex.active_days, 2);
        assert!((ex.average_minutes - 33.0).abs() < f64::EPSILON);

        let none = summarize_exercise(&[], &window());
        assert_eq!(none, ExerciseSummary::default());
    }
}
