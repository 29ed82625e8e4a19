//! Per-category glucose statistics, time-in-range percentages and rolling
//! averages over a reading window.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::interval::{IntervalSelection, measured_value};
use crate::models::{DateWindow, GlucoseInterval, GlucoseReading, MealCategory};
use crate::range::{RangeClass, RangeCounts, classify, format_percentage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerCategoryStats {
    pub category: MealCategory,
    pub max_glucose: f64,
    /// Ceiling of the mean.
    pub average_glucose: f64,
    pub total_count: usize,
    pub in_range_count: usize,
    pub low_count: usize,
    pub high_count: usize,
    pub meals: Vec<GlucoseReading>,
}

impl PerCategoryStats {
    fn empty(category: MealCategory) -> Self {
        Self {
            category,
            max_glucose: 0.0,
            average_glucose: 0.0,
            total_count: 0,
            in_range_count: 0,
            low_count: 0,
            high_count: 0,
            meals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangePercentages {
    pub low_range: String,
    pub in_range: String,
    pub out_range: String,
    pub total_readings: usize,
}

impl From<RangeCounts> for RangePercentages {
    fn from(counts: RangeCounts) -> Self {
        let total = counts.total();
        Self {
            low_range: format_percentage(counts.low, total),
            in_range: format_percentage(counts.in_range, total),
            out_range: format_percentage(counts.high, total),
            total_readings: total,
        }
    }
}

/// The aggregation result handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseOverview {
    pub user_id: i64,
    pub glucose_interval: GlucoseInterval,
    pub from: i64,
    pub to: i64,
    pub categories: Vec<PerCategoryStats>,
    /// Percentages over the requested window.
    pub range: RangePercentages,
    /// Percentages over the trailing 7 days.
    pub weekly_range: RangePercentages,
    pub is_export: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickSummaryEntry {
    pub category: MealCategory,
    pub peak_glucose: Option<f64>,
    pub in_range_count: usize,
    pub total_count: usize,
    pub insulin_average: Option<f64>,
    pub meal: Option<GlucoseReading>,
}

impl QuickSummaryEntry {
    /// `in/total` as shown in summary tables.
    #[must_use]
    pub fn in_range_ratio(&self) -> String {
        format!("{}/{}", self.in_range_count, self.total_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub average_glucose: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendView {
    pub days: Vec<DailyAverage>,
    pub window_average: f64,
    pub seven_day_average: f64,
}

/// Ceiling of the arithmetic mean, `0` for an empty set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ceil_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().sum::<f64>() / values.len() as f64).ceil()
}

fn in_window<'a>(
    readings: &'a [GlucoseReading],
    window: &'a DateWindow,
) -> impl Iterator<Item = &'a GlucoseReading> + 'a {
    readings.iter().filter(move |r| window.contains(r.time))
}

fn category_stats(
    category: MealCategory,
    readings: &[&GlucoseReading],
    selection: IntervalSelection,
) -> PerCategoryStats {
    let mut stats = PerCategoryStats::empty(category);
    let mut values = Vec::new();
    let interval = selection.display();

    for reading in readings {
        let Some(value) = measured_value(reading, selection) else {
            continue;
        };
        values.push(value);
        stats.meals.push((*reading).clone());
        match classify(value, category, interval) {
            RangeClass::Low => stats.low_count += 1,
            RangeClass::InRange => stats.in_range_count += 1,
            RangeClass::High => stats.high_count += 1,
        }
    }

    stats.total_count = values.len();
    stats.max_glucose = values.iter().copied().fold(0.0, f64::max);
    stats.average_glucose = ceil_mean(&values);
    stats
}

fn group_by_category<'a>(
    readings: &'a [GlucoseReading],
    window: &'a DateWindow,
) -> BTreeMap<MealCategory, Vec<&'a GlucoseReading>> {
    let mut groups: BTreeMap<MealCategory, Vec<&GlucoseReading>> = BTreeMap::new();
    for reading in in_window(readings, window) {
        groups.entry(reading.category).or_default().push(reading);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| (r.time, r.id));
    }
    groups
}

/// Statistics for each category that has at least one row in the window.
#[must_use]
pub fn aggregate(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> Vec<PerCategoryStats> {
    group_by_category(readings, window)
        .into_iter()
        .map(|(category, group)| category_stats(category, &group, selection))
        .collect()
}

/// Like [`aggregate`], but each category keeps only its peak reading as the
/// representative meal. On ties the latest reading wins.
#[must_use]
pub fn aggregate_peaks(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> Vec<PerCategoryStats> {
    aggregate(readings, window, selection)
        .into_iter()
        .map(|mut stats| {
            let peak = stats
                .meals
                .iter()
                .rev()
                .find(|r| measured_value(r, selection) == Some(stats.max_glucose))
                .cloned();
            stats.meals = peak.into_iter().collect();
            stats
        })
        .collect()
}

/// Fasting and meal readings are tallied against their own thresholds and
/// then summed.
#[must_use]
pub fn range_counts(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> RangeCounts {
    let interval = selection.display();
    let mut fasting = RangeCounts::default();
    let mut meals = RangeCounts::default();

    for reading in in_window(readings, window) {
        let Some(value) = measured_value(reading, selection) else {
            continue;
        };
        let class = classify(value, reading.category, interval);
        if reading.category.is_fasting() {
            fasting.record(class);
        } else {
            meals.record(class);
        }
    }

    fasting + meals
}

#[must_use]
pub fn range_percentages(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> RangePercentages {
    range_counts(readings, window, selection).into()
}

/// Build the full overview: per-category stats over `window` plus range
/// percentages over both `window` and the 7 days ending at `anchor`.
#[must_use]
pub fn build_overview(
    user_id: i64,
    readings: &[GlucoseReading],
    window: &DateWindow,
    anchor: i64,
    selection: IntervalSelection,
    is_export: bool,
) -> GlucoseOverview {
    let weekly = DateWindow::trailing_days(anchor, 7);
    GlucoseOverview {
        user_id,
        glucose_interval: selection.display(),
        from: window.from,
        to: window.to,
        categories: aggregate(readings, window, selection),
        range: range_percentages(readings, window, selection),
        weekly_range: range_percentages(readings, &weekly, selection),
        is_export,
    }
}

#[allow(clippy::cast_precision_loss)]
fn insulin_average(readings: &[&GlucoseReading]) -> Option<f64> {
    let doses: Vec<f64> = readings.iter().filter_map(|r| r.insulin_units).collect();
    if doses.is_empty() {
        return None;
    }
    let mean = doses.iter().sum::<f64>() / doses.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}

/// One row per category (always all four), each with its peak reading.
#[must_use]
pub fn quick_summary(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> Vec<QuickSummaryEntry> {
    let groups = group_by_category(readings, window);
    let peaks = aggregate_peaks(readings, window, selection);

    MealCategory::ALL
        .iter()
        .map(|&category| {
            let stats = peaks.iter().find(|s| s.category == category);
            let insulin = groups.get(&category).and_then(|g| insulin_average(g));
            match stats {
                Some(s) if s.total_count > 0 => QuickSummaryEntry {
                    category,
                    peak_glucose: Some(s.max_glucose),
                    in_range_count: s.in_range_count,
                    total_count: s.total_count,
                    insulin_average: insulin,
                    meal: s.meals.first().cloned(),
                },
                _ => QuickSummaryEntry {
                    category,
                    peak_glucose: None,
                    in_range_count: 0,
                    total_count: 0,
                    insulin_average: insulin,
                    meal: None,
                },
            }
        })
        .collect()
}

/// Ceiling-rounded mean of every measured value in the window.
#[must_use]
pub fn window_average(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> f64 {
    let values: Vec<f64> = in_window(readings, window)
        .filter_map(|r| measured_value(r, selection))
        .collect();
    ceil_mean(&values)
}

#[must_use]
pub fn rolling_average(
    readings: &[GlucoseReading],
    anchor: i64,
    days: i64,
    selection: IntervalSelection,
) -> f64 {
    window_average(readings, &DateWindow::trailing_days(anchor, days), selection)
}

/// Per-day averages for the trend chart. Days without a value are omitted.
#[must_use]
pub fn daily_trend(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> Vec<DailyAverage> {
    let mut by_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for reading in in_window(readings, window) {
        if let Some(value) = measured_value(reading, selection) {
            by_day.entry(reading.date).or_default().push(value);
        }
    }
    by_day
        .into_iter()
        .map(|(date, values)| DailyAverage {
            date,
            average_glucose: ceil_mean(&values),
            count: values.len(),
        })
        .collect()
}

#[must_use]
pub fn build_trend(
    readings: &[GlucoseReading],
    window: &DateWindow,
    anchor: i64,
    selection: IntervalSelection,
) -> TrendView {
    TrendView {
        days: daily_trend(readings, window, selection),
        window_average: window_average(readings, window, selection),
        seven_day_average: rolling_average(readings, anchor, 7, selection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GLUCOSE_UNIT, MS_PER_DAY, day_start_ms};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn reading(id: i64, day: u32, category: MealCategory, glucose: f64) -> GlucoseReading {
        GlucoseReading {
            id,
            uuid: String::new(),
            user_id: 1,
            date: date(day),
            category,
            glucose: Some(glucose),
            glucose_2hr: if category.is_fasting() { Some(glucose) } else { None },
            is_glucose_exists: glucose > 0.0,
            is_glucose_exist_2hr: category.is_fasting() && glucose > 0.0,
            is_meal_exists: true,
            is_medication_exists: false,
            insulin_units: None,
            time: day_start_ms(date(day)) + id * 1000,
            unit: GLUCOSE_UNIT.to_string(),
        }
    }

    fn june() -> DateWindow {
        DateWindow::for_days(date(1), date(30))
    }

    fn one_hour() -> IntervalSelection {
        IntervalSelection::new(Some(GlucoseInterval::OneHour), GlucoseInterval::OneHour)
    }

    #[test]
    fn test_empty_set_is_zeroed() {
        let stats = aggregate(&[], &june(), one_hour());
        assert!(stats.is_empty());
        let pct = range_percentages(&[], &june(), one_hour());
        assert_eq!(pct.low_range, "0");
        assert_eq!(pct.in_range, "0");
        assert_eq!(pct.out_range, "0");
        assert!((window_average(&[], &june(), one_hour()) - 0.0).abs() < f64::EPSILON);
        let overview = build_overview(1, &[], &june(), june().to, one_hour(), false);
        assert!(overview.categories.is_empty());
        assert_eq!(overview.weekly_range.total_readings, 0);
    }

    #[test]
    fn test_breakfast_example() {
        let readings = vec![
            reading(1, 10, MealCategory::Breakfast, 100.0),
            reading(2, 11, MealCategory::Breakfast, 120.0),
            reading(3, 12, MealCategory::Breakfast, 140.0),
        ];
        let stats = aggregate(&readings, &june(), one_hour());
        assert_eq!(stats.len(), 1);
        let b = &stats[0];
        assert_eq!(b.category, MealCategory::Breakfast);
        assert!((b.average_glucose - 120.0).abs() < f64::EPSILON);
        assert!((b.max_glucose - 140.0).abs() < f64::EPSILON);
        assert_eq!(b.total_count, 3);
        assert_eq!(b.in_range_count, 3);
        assert_eq!(b.meals.len(), 3);
    }

    #[test]
    fn test_average_is_ceiled() {
        let readings = vec![
            reading(1, 10, MealCategory::Lunch, 100.0),
            reading(2, 11, MealCategory::Lunch, 101.0),
        ];
        let stats = aggregate(&readings, &june(), one_hour());
        assert!((stats[0].average_glucose - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_two_hour_thresholds_apply() {
        let mut r = reading(1, 10, MealCategory::Dinner, 150.0);
        r.glucose_2hr = Some(130.0);
        let sel = IntervalSelection::new(Some(GlucoseInterval::TwoHour), GlucoseInterval::OneHour);
        let stats = aggregate(&[r], &june(), sel);
        assert!((stats[0].max_glucose - 130.0).abs() < f64::EPSILON);
        assert_eq!(stats[0].in_range_count, 0);
        assert_eq!(stats[0].high_count, 1);
    }

    #[test]
    fn test_placeholders_do_not_count() {
        let readings = vec![
            reading(1, 10, MealCategory::Lunch, 0.0),
            reading(2, 11, MealCategory::Lunch, 110.0),
        ];
        let stats = aggregate(&readings, &june(), one_hour());
        assert_eq!(stats[0].total_count, 1);
        assert!((stats[0].average_glucose - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_category_with_only_placeholders_is_zeroed() {
        let readings = vec![reading(1, 10, MealCategory::Dinner, 0.0)];
        let stats = aggregate(&readings, &june(), one_hour());
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total_count, 0);
        assert!((stats[0].average_glucose - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_excludes_outside_readings() {
        let readings = vec![
            reading(1, 10, MealCategory::Lunch, 100.0),
            reading(2, 20, MealCategory::Lunch, 200.0),
        ];
        let window = DateWindow::for_days(date(9), date(11));
        let stats = aggregate(&readings, &window, one_hour());
        assert_eq!(stats[0].total_count, 1);
    }

    #[test]
    fn test_range_counts_sum_fasting_and_meals() {
        let readings = vec![
            reading(1, 10, MealCategory::Fasting, 100.0), // high for fasting
            reading(2, 10, MealCategory::Breakfast, 100.0), // in range for meals
            reading(3, 10, MealCategory::Lunch, 50.0),    // low
            reading(4, 10, MealCategory::Fasting, 90.0),  // in range
        ];
        let counts = range_counts(&readings, &june(), one_hour());
        assert_eq!(counts.low, 1);
        assert_eq!(counts.in_range, 2);
        assert_eq!(counts.high, 1);
        let pct: RangePercentages = counts.into();
        assert_eq!(pct.low_range, "25.00");
        assert_eq!(pct.in_range, "50.00");
        assert_eq!(pct.out_range, "25.00");
    }

    #[test]
    fn test_overview_weekly_window_is_trailing() {
        let readings = vec![
            reading(1, 2, MealCategory::Lunch, 200.0),
            reading(2, 28, MealCategory::Lunch, 100.0),
        ];
        let anchor = day_start_ms(date(29));
        let overview = build_overview(1, &readings, &june(), anchor, one_hour(), true);
        assert_eq!(overview.range.total_readings, 2);
        assert_eq!(overview.weekly_range.total_readings, 1);
        assert_eq!(overview.weekly_range.in_range, "100.00");
        assert!(overview.is_export);
    }

    #[test]
    fn test_peaks_keep_last_max_reading() {
        let readings = vec![
            reading(1, 10, MealCategory::Lunch, 150.0),
            reading(2, 11, MealCategory::Lunch, 120.0),
            reading(3, 12, MealCategory::Lunch, 150.0),
        ];
        let peaks = aggregate_peaks(&readings, &june(), one_hour());
        assert_eq!(peaks[0].meals.len(), 1);
        assert_eq!(peaks[0].meals[0].id, 3);
        assert_eq!(peaks[0].total_count, 3);
    }

    #[test]
    fn test_quick_summary_has_all_categories() {
        let mut lunch = reading(1, 10, MealCategory::Lunch, 130.0);
        lunch.insulin_units = Some(4.0);
        let mut lunch2 = reading(2, 11, MealCategory::Lunch, 90.0);
        lunch2.insulin_units = Some(5.0);
        let summary = quick_summary(&[lunch, lunch2], &june(), one_hour());
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].category, MealCategory::Fasting);
        assert!(summary[0].peak_glucose.is_none());
        assert_eq!(summary[0].in_range_ratio(), "0/0");

        let l = &summary[2];
        assert_eq!(l.category, MealCategory::Lunch);
        assert_eq!(l.peak_glucose, Some(130.0));
        assert_eq!(l.in_range_ratio(), "2/2");
        assert_eq!(l.insulin_average, Some(4.5));
        assert_eq!(l.meal.as_ref().unwrap().id, 1);
    }

    #[test]
    fn test_daily_trend_and_rolling() {
        let readings = vec![
            reading(1, 10, MealCategory::Breakfast, 100.0),
            reading(2, 10, MealCategory::Lunch, 111.0),
            reading(3, 12, MealCategory::Dinner, 130.0),
        ];
        let trend = daily_trend(&readings, &june(), one_hour());
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date, date(10));
        assert!((trend[0].average_glucose - 106.0).abs() < f64::EPSILON);
        assert_eq!(trend[0].count, 2);

        let anchor = day_start_ms(date(12)) + MS_PER_DAY - 1;
        let avg = rolling_average(&readings, anchor, 1, one_hour());
        assert!((avg - 130.0).abs() < f64::EPSILON);

        let view = build_trend(&readings, &june(), anchor, one_hour());
        assert!((view.window_average - 114.0).abs() < f64::EPSILON);
        assert!((view.seven_day_average - 114.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_combined_groups_by_max() {
        let mut r = reading(1, 10, MealCategory::Breakfast, 118.0);
        r.glucose_2hr = Some(150.0);
        let sel = IntervalSelection::new(Some(GlucoseInterval::Combined), GlucoseInterval::TwoHour);
        let stats = aggregate(&[r], &june(), sel);
        assert!((stats[0].max_glucose - 150.0).abs() < f64::EPSILON);
        assert_eq!(stats[0].high_count, 1);
    }
}
