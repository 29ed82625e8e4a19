//! Downloadable renderings of aggregated data: a date-by-category table, the
//! four-row quick summary, and a plain-text overview for email bodies.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregate::{GlucoseOverview, QuickSummaryEntry, RangePercentages};
use crate::interval::{IntervalSelection, resolve_value};
use crate::models::{DEVICE_DATE_FORMAT, DateWindow, GlucoseReading, MealCategory, ms_to_date};

/// Placeholder for a date/category cell with no reading.
pub const MISSING: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn to_csv(&self) -> Result<String> {
        write_csv(&self.header, &self.rows)
    }
}

fn format_value(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn format_percent(value: &str) -> String {
    if value == "0" { "0%".to_string() } else { format!("{value}%") }
}

fn write_csv(header: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().map_err(csv::IntoInnerError::into_error)?;
    Ok(String::from_utf8(bytes)?)
}

/// Dates across, categories down. Each cell is the displayed value of that
/// day's reading, or `--`.
#[must_use]
pub fn date_table(
    readings: &[GlucoseReading],
    window: &DateWindow,
    selection: IntervalSelection,
) -> ExportTable {
    let days = window.days();
    let header = std::iter::once("Category".to_string())
        .chain(days.iter().map(|d| d.format(DEVICE_DATE_FORMAT).to_string()))
        .collect();

    let cell = |category: MealCategory, day: NaiveDate| {
        readings
            .iter()
            .filter(|r| r.category == category && r.date == day && window.contains(r.time))
            .filter_map(|r| resolve_value(r, selection.requested, selection.subject_default))
            .filter(|v| *v > 0.0)
            .last()
            .map_or_else(|| MISSING.to_string(), format_value)
    };

    let rows = MealCategory::ALL
        .iter()
        .map(|&category| {
            std::iter::once(category.label().to_string())
                .chain(days.iter().map(|&day| cell(category, day)))
                .collect::<Vec<String>>()
        })
        .collect();

    ExportTable { header, rows }
}

#[must_use]
pub fn quick_summary_table(entries: &[QuickSummaryEntry]) -> ExportTable {
    let header = ["Category", "Peak", "In Range", "Insulin Avg"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.category.label().to_string(),
                e.peak_glucose.map_or_else(|| MISSING.to_string(), format_value),
                e.in_range_ratio(),
                e.insulin_average
                    .map_or_else(|| MISSING.to_string(), |u| format!("{u:.2}")),
            ]
        })
        .collect();
    ExportTable { header, rows }
}

fn range_line(label: &str, range: &RangePercentages) -> String {
    format!(
        "{label}: low {}, in range {}, high {} ({} readings)",
        format_percent(&range.low_range),
        format_percent(&range.in_range),
        format_percent(&range.out_range),
        range.total_readings
    )
}

/// Plain-text overview, one line per category followed by range figures.
#[must_use]
pub fn text_snapshot(overview: &GlucoseOverview) -> String {
    let mut out = String::new();
    let span = match (ms_to_date(overview.from), ms_to_date(overview.to)) {
        (Some(from), Some(to)) => format!("{from} to {to}"),
        _ => format!("{} to {}", overview.from, overview.to),
    };

    let _ = writeln!(out, "Glucose overview for user {}", overview.user_id);
    let _ = writeln!(out, "Window: {span} (interval {})", overview.glucose_interval);
    let _ = writeln!(out);

    if overview.categories.is_empty() {
        let _ = writeln!(out, "No readings in this window.");
    }
    for stats in &overview.categories {
        let _ = writeln!(
            out,
            "{}: avg {} mg/dL, max {} mg/dL, in range {}/{}",
            stats.category.label(),
            format_value(stats.average_glucose),
            format_value(stats.max_glucose),
            stats.in_range_count,
            stats.total_count
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", range_line("Time in range", &overview.range));
    let _ = writeln!(out, "{}", range_line("Last 7 days", &overview.weekly_range));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{build_overview, quick_summary};
    use crate::models::{GLUCOSE_UNIT, GlucoseInterval, day_start_ms};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn reading(id: i64, day: u32, category: MealCategory, glucose: f64, glucose_2hr: Option<f64>) -> GlucoseReading {
        GlucoseReading {
            id,
            uuid: String::new(),
            user_id: 1,
            date: date(day),
            category,
            glucose: Some(glucose),
            glucose_2hr,
            is_glucose_exists: glucose > 0.0,
            is_glucose_exist_2hr: glucose_2hr.is_some(),
            is_meal_exists: true,
            is_medication_exists: false,
            insulin_units: None,
            time: day_start_ms(date(day)) + id,
            unit: GLUCOSE_UNIT.to_string(),
        }
    }

    fn one_hour() -> IntervalSelection {
        IntervalSelection::new(None, GlucoseInterval::OneHour)
    }

    #[test]
    fn test_date_table_layout() {
        let readings = vec![
            reading(1, 10, MealCategory::Fasting, 88.0, Some(88.0)),
            reading(2, 11, MealCategory::Lunch, 132.5, None),
            reading(3, 11, MealCategory::Dinner, 0.0, None),
        ];
        let window = DateWindow::for_days(date(10), date(11));
        let table = date_table(&readings, &window, one_hour());

        assert_eq!(table.header, vec!["Category", "06-10-2024", "06-11-2024"]);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[0], vec!["Fasting", "88", "--"]);
        assert_eq!(table.rows[1], vec!["Breakfast", "--", "--"]);
        assert_eq!(table.rows[2], vec!["Lunch", "--", "132.5"]);
        assert_eq!(table.rows[3], vec!["Dinner", "--", "--"]);
    }

    #[test]
    fn test_date_table_follows_interval() {
        let readings = vec![reading(1, 10, MealCategory::Lunch, 150.0, Some(118.0))];
        let window = DateWindow::for_days(date(10), date(10));
        let sel = IntervalSelection::new(Some(GlucoseInterval::TwoHour), GlucoseInterval::OneHour);
        let table = date_table(&readings, &window, sel);
        assert_eq!(table.rows[2][1], "118");
    }

    #[test]
    fn test_table_csv() {
        let window = DateWindow::for_days(date(10), date(10));
        let csv = date_table(&[], &window, one_hour()).to_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Category,06-10-2024");
        assert_eq!(lines[1], "Fasting,--");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_quick_summary_table() {
        let mut lunch = reading(1, 10, MealCategory::Lunch, 130.0, None);
        lunch.insulin_units = Some(4.0);
        let window = DateWindow::for_days(date(1), date(30));
        let entries = quick_summary(&[lunch], &window, one_hour());
        let table = quick_summary_table(&entries);

        assert_eq!(table.header, vec!["Category", "Peak", "In Range", "Insulin Avg"]);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[0], vec!["Fasting", "--", "0/0", "--"]);
        assert_eq!(table.rows[2], vec!["Lunch", "130", "1/1", "4.00"]);
    }

    #[test]
    fn test_text_snapshot() {
        let readings = vec![
            reading(1, 10, MealCategory::Breakfast, 100.0, None),
            reading(2, 11, MealCategory::Breakfast, 150.0, None),
        ];
        let window = DateWindow::for_days(date(1), date(30));
        let overview = build_overview(1, &readings, &window, day_start_ms(date(12)), one_hour(), true);
        let text = text_snapshot(&overview);

        assert!(text.starts_with("Glucose overview for user 1\n"));
        assert!(text.contains("Window: 2024-06-01 to 2024-06-30 (interval 1)"));
        assert!(text.contains("Breakfast: avg 125 mg/dL, max 150 mg/dL, in range 1/2"));
        assert!(text.contains("Time in range: low 0.00%, in range 50.00%, high 50.00% (2 readings)"));
    }

    #[test]
    fn test_text_snapshot_empty() {
        let window = DateWindow::for_days(date(1), date(2));
        let overview = build_overview(1, &[], &window, window.to, one_hour(), false);
        let text = text_snapshot(&overview);
        assert!(text.contains("No readings in this window."));
        assert!(text.contains("Last 7 days: low 0%, in range 0%, high 0% (0 readings)"));
    }
}
