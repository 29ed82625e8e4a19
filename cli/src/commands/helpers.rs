use anyhow::{Context, Result, bail};
use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use clap::Args;
use serde::Serialize;

use glyco_core::models::{DateWindow, GlucoseInterval};
use glyco_core::service::WindowQuery;

/// User, date range and interval flags shared by the reporting commands.
#[derive(Args, Debug, Clone)]
pub(crate) struct WindowArgs {
    /// User ID
    #[arg(short, long)]
    pub user: i64,
    /// First day (YYYY-MM-DD or today/yesterday)
    #[arg(long)]
    pub from: Option<String>,
    /// Last day (YYYY-MM-DD or today/yesterday, default: today)
    #[arg(long)]
    pub to: Option<String>,
    /// Days ending at --to when --from is not given
    #[arg(short, long, default_value = "7")]
    pub days: u32,
    /// Postprandial interval override: 1, 2 or 3 (combined)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub interval: Option<u8>,
}

impl WindowArgs {
    pub fn query(&self) -> Result<WindowQuery> {
        let window = parse_window(self.from.clone(), self.to.clone(), self.days)?;
        let mut query = WindowQuery::new(self.user, window);
        query.glucose_interval = parse_interval(self.interval)?;
        Ok(query)
    }
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")
            }),
        },
    }
}

/// Parse `YYYY-MM-DD HH:MM[:SS]`, or a bare `HH:MM[:SS]` meaning today.
pub(crate) fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = chrono::NaiveTime::parse_from_str(s, fmt) {
            return Ok(Local::now().date_naive().and_time(t));
        }
    }
    bail!("Invalid time '{s}'. Use 'YYYY-MM-DD HH:MM' or 'HH:MM'")
}

/// Whole days `from..=to`; without `from`, the `days` days ending at `to`.
pub(crate) fn parse_window(from: Option<String>, to: Option<String>, days: u32) -> Result<DateWindow> {
    let last = parse_date(to)?;
    let first = match from {
        Some(s) => parse_date(Some(s))?,
        None => {
            if days == 0 {
                bail!("--days must be at least 1");
            }
            last.checked_sub_days(Days::new(u64::from(days - 1)))
                .context("Date range out of bounds")?
        }
    };
    let window = DateWindow::for_days(first, last);
    Ok(DateWindow::new(window.from, window.to)?)
}

pub(crate) fn parse_interval(interval: Option<u8>) -> Result<Option<GlucoseInterval>> {
    Ok(interval.map(GlucoseInterval::try_from).transpose()?)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn fmt_glucose(value: Option<f64>) -> String {
    match value {
        Some(v) if v > 0.0 && v.fract().abs() < f64::EPSILON => format!("{v:.0}"),
        Some(v) if v > 0.0 => format!("{v:.1}"),
        _ => "-".to_string(),
    }
}

pub(crate) fn fmt_percent(value: &str) -> String {
    format!("{value}%")
}
