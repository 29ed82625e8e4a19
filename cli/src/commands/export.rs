use anyhow::{Context, Result};
use std::path::Path;

use glyco_core::service::GlucoseService;

use super::helpers::WindowArgs;

fn emit(content: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

pub(crate) fn cmd_export_table(
    svc: &GlucoseService,
    args: &WindowArgs,
    out: Option<&Path>,
) -> Result<()> {
    let csv = svc.export_table_csv(&args.query()?)?;
    emit(&csv, out)
}

pub(crate) fn cmd_export_quick(
    svc: &GlucoseService,
    args: &WindowArgs,
    out: Option<&Path>,
) -> Result<()> {
    let csv = svc.export_quick_summary_csv(&args.query()?)?;
    emit(&csv, out)
}

pub(crate) fn cmd_export_text(
    svc: &GlucoseService,
    args: &WindowArgs,
    out: Option<&Path>,
) -> Result<()> {
    let mut text = svc.export_text_snapshot(&args.query()?)?;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    emit(&text, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use glyco_core::models::{
        DeviceVendor, GlucoseInterval, MealCategory, ReadingUpsert, UserGlucoseProfile,
    };

    fn service_with_user(user_id: i64) -> GlucoseService {
        let svc = GlucoseService::new_in_memory().unwrap();
        svc.set_profile(&UserGlucoseProfile {
            user_id,
            glucose_interval: GlucoseInterval::OneHour,
            device: DeviceVendor::None,
            active: true,
        })
        .unwrap();
        svc
    }

    fn args(user: i64) -> WindowArgs {
        WindowArgs {
            user,
            from: Some("2024-06-10".to_string()),
            to: Some("2024-06-16".to_string()),
            days: 7,
            interval: Some(1),
        }
    }

    #[test]
    fn test_export_table_to_file() {
        let svc = service_with_user(1);
        let mut upsert = ReadingUpsert::new(
            1,
            NaiveDate::from_ymd_opt(2024, 6, 12).unwrap(),
            MealCategory::Breakfast,
        );
        upsert.glucose = Some(140.0);
        svc.log_glucose(&upsert).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        cmd_export_table(&svc, &args(1), Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Category,06-10-2024"));
        assert!(content.contains("140"));
    }

    #[test]
    fn test_export_text_to_file() {
        let svc = service_with_user(3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.txt");
        cmd_export_text(&svc, &args(3), Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Glucose overview for user 3"));
        assert!(content.ends_with('\n'));
    }
}
