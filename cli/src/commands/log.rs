use anyhow::{Result, bail};

use glyco_core::models::{ExerciseEntry, MealCategory, ReadingUpsert};
use glyco_core::service::GlucoseService;

use super::helpers::{fmt_glucose, parse_date, parse_datetime, print_json};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_log(
    svc: &GlucoseService,
    user_id: i64,
    category: &str,
    glucose: Option<f64>,
    glucose_2hr: Option<f64>,
    insulin: Option<f64>,
    date: Option<String>,
    at: Option<&str>,
    no_meal: bool,
    json: bool,
) -> Result<()> {
    if glucose.is_none() && glucose_2hr.is_none() && insulin.is_none() {
        bail!("Nothing to log. Provide at least one of --glucose, --glucose-2hr or --insulin");
    }

    let category: MealCategory = category.parse()?;
    let mut upsert = ReadingUpsert::new(user_id, parse_date(date)?, category);
    if let Some(at) = at {
        let ts = parse_datetime(at)?;
        upsert.date = ts.date();
        upsert.time = Some(ts.and_utc().timestamp_millis());
    }
    upsert.glucose = glucose;
    upsert.glucose_2hr = glucose_2hr;
    upsert.insulin_units = insulin;
    upsert.is_meal_exists = Some(!no_meal);

    let reading = svc.log_glucose(&upsert)?;

    if json {
        return print_json(&reading);
    }
    let insulin = reading
        .insulin_units
        .map(|u| format!(", insulin {u:.1} u"))
        .unwrap_or_default();
    println!(
        "Logged {} for user {} on {}: 1h {} / 2h {} {}{insulin}",
        reading.category.label(),
        reading.user_id,
        reading.date.format("%Y-%m-%d"),
        fmt_glucose(reading.glucose),
        fmt_glucose(reading.glucose_2hr),
        reading.unit,
    );
    Ok(())
}

pub(crate) fn cmd_exercise(
    svc: &GlucoseService,
    user_id: i64,
    minutes: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let entry = ExerciseEntry {
        user_id,
        date: parse_date(date)?,
        duration_minutes: minutes,
    };
    svc.log_exercise(&entry)?;

    if json {
        return print_json(&entry);
    }
    println!(
        "Logged {minutes:.0} min of exercise for user {user_id} on {}",
        entry.date.format("%Y-%m-%d")
    );
    Ok(())
}
