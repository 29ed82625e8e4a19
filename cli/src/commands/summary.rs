use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use glyco_core::models::{CgmAnnotations, ms_to_date};
use glyco_core::service::GlucoseService;

use super::helpers::{WindowArgs, fmt_glucose, fmt_percent, print_json};

fn span(from: i64, to: i64) -> String {
    match (ms_to_date(from), ms_to_date(to)) {
        (Some(f), Some(t)) => format!("{f} to {t}"),
        _ => format!("{from} to {to}"),
    }
}

pub(crate) fn cmd_overview(svc: &GlucoseService, args: &WindowArgs, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct CategoryRow {
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Avg")]
        average: String,
        #[tabled(rename = "Max")]
        max: String,
        #[tabled(rename = "In Range")]
        in_range: String,
        #[tabled(rename = "Low")]
        low: usize,
        #[tabled(rename = "High")]
        high: usize,
    }

    let overview = svc.overview(&args.query()?, false)?;

    if json {
        return print_json(&overview);
    }

    if overview.categories.iter().all(|c| c.total_count == 0) {
        eprintln!(
            "No readings for user {} from {}",
            overview.user_id,
            span(overview.from, overview.to)
        );
        process::exit(2);
    }

    println!(
        "=== User {} | {} | interval {} ===\n",
        overview.user_id,
        span(overview.from, overview.to),
        overview.glucose_interval
    );

    let rows: Vec<CategoryRow> = overview
        .categories
        .iter()
        .map(|c| CategoryRow {
            category: c.category.label().to_string(),
            average: fmt_glucose(Some(c.average_glucose)),
            max: fmt_glucose(Some(c.max_glucose)),
            in_range: format!("{}/{}", c.in_range_count, c.total_count),
            low: c.low_count,
            high: c.high_count,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}\n");

    let r = &overview.range;
    println!(
        "  WINDOW:      low {} | in range {} | high {} ({} readings)",
        fmt_percent(&r.low_range),
        fmt_percent(&r.in_range),
        fmt_percent(&r.out_range),
        r.total_readings
    );
    let w = &overview.weekly_range;
    println!(
        "  LAST 7 DAYS: low {} | in range {} | high {} ({} readings)",
        fmt_percent(&w.low_range),
        fmt_percent(&w.in_range),
        fmt_percent(&w.out_range),
        w.total_readings
    );

    Ok(())
}

pub(crate) fn cmd_quick(svc: &GlucoseService, args: &WindowArgs, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct QuickRow {
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Peak")]
        peak: String,
        #[tabled(rename = "In Range")]
        in_range: String,
        #[tabled(rename = "Insulin Avg")]
        insulin: String,
    }

    let entries = svc.quick_summary(&args.query()?)?;

    if json {
        return print_json(&entries);
    }

    let rows: Vec<QuickRow> = entries
        .iter()
        .map(|e| QuickRow {
            category: e.category.label().to_string(),
            peak: fmt_glucose(e.peak_glucose),
            in_range: e.in_range_ratio(),
            insulin: e.insulin_average.map_or("-".into(), |u| format!("{u:.2}")),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_trend(svc: &GlucoseService, args: &WindowArgs, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TrendRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Avg")]
        average: String,
        #[tabled(rename = "Readings")]
        count: usize,
    }

    let trend = svc.trend(&args.query()?)?;

    if json {
        return print_json(&trend);
    }

    if trend.days.is_empty() {
        eprintln!("No readings for user {} in this window", args.user);
        process::exit(2);
    }

    let rows: Vec<TrendRow> = trend
        .days
        .iter()
        .map(|d| TrendRow {
            date: d.date.format("%Y-%m-%d").to_string(),
            average: fmt_glucose(Some(d.average_glucose)),
            count: d.count,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}\n");
    println!("  WINDOW AVG: {}", fmt_glucose(Some(trend.window_average)));
    println!("  7-DAY AVG:  {}", fmt_glucose(Some(trend.seven_day_average)));
    Ok(())
}

pub(crate) fn cmd_cgm(
    svc: &GlucoseService,
    args: &WindowArgs,
    annotations: CgmAnnotations,
    json: bool,
) -> Result<()> {
    let summary = svc.cgm_summary(&args.query()?, annotations)?;

    if json {
        return print_json(&summary);
    }

    println!("=== CGM summary for user {} ===\n", args.user);
    println!(
        "  Glucose:    min {} | max {} | avg {}",
        fmt_glucose(Some(summary.min_glucose)),
        fmt_glucose(Some(summary.max_glucose)),
        fmt_glucose(Some(summary.avg_glucose))
    );
    println!(
        "  Readings:   low {} | in range {} | high {}",
        summary.low_range, summary.in_range, summary.out_range
    );
    println!(
        "  Indicator:  mean {} | variation {}",
        fmt_glucose(Some(summary.measurement_indicator_mean)),
        summary.coeff_variation
    );
    let ex = &summary.exercise;
    println!(
        "  Exercise:   {:.0} min over {} days (avg {:.0} min/day)",
        ex.total_minutes, ex.active_days, ex.average_minutes
    );
    for (label, value) in [
        ("Active time", &summary.cgm_active_time),
        ("GMI", &summary.gmi),
        ("CoV", &summary.cov),
    ] {
        if let Some(v) = value {
            println!("  {label}: {v}");
        }
    }
    Ok(())
}
