use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use glyco_core::reconcile::{CgmVendorClient, Job, JobContext, JobReport, daily_jobs, run_jobs};
use glyco_core::store::SharedStore;

use crate::config::Settings;

#[must_use]
pub fn job_context(store: SharedStore, settings: &Settings, now: NaiveDateTime) -> JobContext {
    let mut ctx = JobContext::new(store, now);
    ctx.chunk_size = settings.chunk_size;
    ctx.sync_lookback_hours = settings.sync_lookback_hours;
    ctx
}

/// The daily jobs, or just the one called `name`. `all` selects every job.
pub fn select_jobs(name: &str, client: Arc<dyn CgmVendorClient>) -> Result<Vec<Box<dyn Job>>> {
    let jobs = daily_jobs(client);
    if name == "all" {
        return Ok(jobs);
    }
    let known: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
    let known = known.join(", ");
    let selected: Vec<Box<dyn Job>> = jobs.into_iter().filter(|j| j.name() == name).collect();
    if selected.is_empty() {
        bail!("Unknown job '{name}'. Use one of: {known}, all");
    }
    Ok(selected)
}

/// Run jobs once. Any job error is returned after all jobs have had a turn.
pub async fn run_once(jobs: &[Box<dyn Job>], ctx: &JobContext) -> Result<Vec<JobReport>> {
    let mut reports = Vec::with_capacity(jobs.len());
    let mut first_error = None;
    for result in run_jobs(jobs, ctx).await {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}

/// Next time strictly after `now` that the clock reads `hour:00`.
#[must_use]
pub fn next_run(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    // Clamped, so the fallback is unreachable.
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map_or(today, |d| d.and_time(at))
    }
}

/// Fire the daily jobs at `settings.job_hour` local time, forever.
pub fn spawn_daily(
    store: SharedStore,
    client: Arc<dyn CgmVendorClient>,
    settings: Settings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let jobs = daily_jobs(client);
        loop {
            let now = Local::now().naive_local();
            let next = next_run(now, settings.job_hour);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Scheduled daily jobs");
            tokio::time::sleep(wait).await;

            let ctx = job_context(Arc::clone(&store), &settings, Local::now().naive_local());
            for result in run_jobs(&jobs, &ctx).await {
                if let Err(e) = result {
                    warn!(error = %e, "Scheduled job failed; will retry on the next run");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use glyco_core::db::Database;
    use glyco_core::models::{
        DateWindow, DeviceHistoryRecord, DeviceSample, DeviceVendor, GlucoseInterval, MealCategory,
        UserGlucoseProfile, VendorCredentials, VendorReading,
    };
    use glyco_core::store::{BoxFuture, GlucoseStore, Placeholder, lock, shared};

    struct NoVendor;

    impl CgmVendorClient for NoVendor {
        fn fetch_readings<'a>(
            &'a self,
            _credentials: &'a VendorCredentials,
            _window: DateWindow,
        ) -> BoxFuture<'a, Result<Vec<VendorReading>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        assert_eq!(next_run(at(1, 30), 3), at(3, 0));
    }

    #[test]
    fn test_next_run_tomorrow() {
        let tomorrow = NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert_eq!(next_run(at(3, 0), 3), tomorrow);
        assert_eq!(next_run(at(22, 0), 3), tomorrow);
    }

    #[test]
    fn test_select_jobs() {
        let client: Arc<dyn CgmVendorClient> = Arc::new(NoVendor);
        assert_eq!(select_jobs("all", Arc::clone(&client)).unwrap().len(), 3);
        let one = select_jobs("fasting-autofill", Arc::clone(&client)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name(), "fasting-autofill");
        let err = select_jobs("nope", client).err().unwrap();
        assert!(err.to_string().contains("missing-slot-backfill"));
    }

    #[tokio::test]
    async fn test_run_once_reports_every_job() {
        let store = shared(Database::open_in_memory().unwrap());
        let settings = Settings {
            chunk_size: 5,
            ..Settings::default()
        };
        let ctx = job_context(store, &settings, at(9, 0));
        assert_eq!(ctx.chunk_size, 5);

        let jobs = select_jobs("all", Arc::new(NoVendor)).unwrap();
        let reports = run_once(&jobs, &ctx).await.unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.job).collect();
        assert_eq!(names, vec!["missing-slot-backfill", "device-sync", "fasting-autofill"]);
    }

    #[tokio::test]
    async fn test_default_hour_run_fills_fasting_slots() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_profile(&UserGlucoseProfile {
            user_id: 1,
            glucose_interval: GlucoseInterval::OneHour,
            device: DeviceVendor::None,
            active: true,
        })
        .unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        let samples = vec![
            DeviceSample::at(day(14).and_hms_opt(4, 2, 0).unwrap(), 92.0),
            DeviceSample::at(at(4, 3), 97.0),
        ];
        db.add_device_history(1, &DeviceHistoryRecord::group_samples(1, samples))
            .unwrap();
        db.insert_placeholders(&[Placeholder { user_id: 1, date: day(15), category: MealCategory::Fasting }])
            .unwrap();
        let store = shared(db);

        let settings = Settings::default();
        let ctx = job_context(Arc::clone(&store), &settings, at(settings.job_hour, 0));
        let jobs = select_jobs("all", Arc::new(NoVendor)).unwrap();
        let reports = run_once(&jobs, &ctx).await.unwrap();
        let autofill = reports.iter().find(|r| r.job == "fasting-autofill").unwrap();
        assert_eq!(autofill.updated, 2);

        let fasting = |d| {
            let window = DateWindow::for_days(day(d), day(d));
            lock(&store)
                .readings_in_window(1, &window)
                .unwrap()
                .into_iter()
                .find(|r| r.category == MealCategory::Fasting)
                .and_then(|r| r.glucose)
        };
        assert_eq!(fasting(14), Some(92.0));
        assert_eq!(fasting(15), Some(97.0));
    }
}
