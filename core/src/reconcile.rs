//! Scheduled jobs that write device data into the reading store: the
//! missing-slot backfill, the external CGM sync and the fasting auto-fill.
//!
//! Every job is idempotent. Fleet-wide work is split into chunks of
//! `chunk_size` users; chunks run one after another and per-user failures are
//! logged and counted without stopping the run.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::{
    DateWindow, DeviceHistoryRecord, DeviceSample, MealCategory, ReadingUpsert, VendorAccount,
    VendorCredentials, VendorReading, ms_to_datetime,
};
use crate::store::{BoxFuture, Placeholder, SharedStore, lock};

/// Opaque `getReadings(credentials, window)` against a CGM vendor.
pub trait CgmVendorClient: Send + Sync {
    fn fetch_readings<'a>(
        &'a self,
        credentials: &'a VendorCredentials,
        window: DateWindow,
    ) -> BoxFuture<'a, Result<Vec<VendorReading>>>;
}

#[derive(Clone)]
pub struct JobContext {
    pub store: SharedStore,
    /// Wall-clock time the run is considered to happen at.
    pub now: NaiveDateTime,
    pub chunk_size: usize,
    pub sync_lookback_hours: i64,
}

impl JobContext {
    #[must_use]
    pub fn new(store: SharedStore, now: NaiveDateTime) -> Self {
        Self {
            store,
            now,
            chunk_size: 50,
            sync_lookback_hours: 24,
        }
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    /// Days the fasting auto-fill looks at: the previous day, plus today once
    /// its fasting window has closed.
    #[must_use]
    pub fn fasting_dates(&self) -> Vec<NaiveDate> {
        let today = self.today();
        let mut dates: Vec<NaiveDate> = today.checked_sub_days(Days::new(1)).into_iter().collect();
        if self.now.time() > FASTING_END {
            dates.push(today);
        }
        dates
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job: &'static str,
    /// Users or slots looked at.
    pub processed: usize,
    /// Rows created or filled.
    pub updated: usize,
    pub failed: usize,
}

impl JobReport {
    fn new(job: &'static str) -> Self {
        Self {
            job,
            processed: 0,
            updated: 0,
            failed: 0,
        }
    }
}

pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    fn run<'a>(&'a self, ctx: &'a JobContext) -> BoxFuture<'a, Result<JobReport>>;
}

// --- Fasting auto-fill ---

const FASTING_START: NaiveTime = match NaiveTime::from_hms_opt(4, 0, 0) {
    Some(t) => t,
    None => panic!("invalid fasting window start"),
};

const FASTING_END: NaiveTime = match NaiveTime::from_hms_opt(4, 5, 0) {
    Some(t) => t,
    None => panic!("invalid fasting window end"),
};

/// Inclusive time-of-day window a fasting sample must fall in.
#[must_use]
pub fn fasting_window() -> (NaiveTime, NaiveTime) {
    (FASTING_START, FASTING_END)
}

/// The earliest sample whose time of day is within 4:00:00-4:05:00 AM.
#[must_use]
pub fn fasting_sample(samples: &[DeviceSample]) -> Option<&DeviceSample> {
    let (start, end) = fasting_window();
    samples
        .iter()
        .filter(|s| s.value > 0.0)
        .filter(|s| {
            let time = s
                .time_of_day()
                .or_else(|| ms_to_datetime(s.time_in_msec).map(|dt| dt.time()));
            time.is_some_and(|t| t >= start && t <= end)
        })
        .min_by_key(|s| s.time_in_msec)
}

pub struct FastingAutofillJob;

impl FastingAutofillJob {
    fn fill(ctx: &JobContext) -> Result<JobReport> {
        let mut report = JobReport::new(FastingAutofillJob.name());
        for date in ctx.fasting_dates() {
            Self::fill_date(ctx, date, &mut report)?;
        }
        Ok(report)
    }

    fn fill_date(ctx: &JobContext, date: NaiveDate, report: &mut JobReport) -> Result<()> {
        let slots = lock(&ctx.store).unfilled_fasting_slots(date)?;

        for slot in slots {
            report.processed += 1;
            let samples = lock(&ctx.store).device_samples_for_date(slot.user_id, date);
            let samples = match samples {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(user_id = slot.user_id, %date, error = %e, "Failed to read device history");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(sample) = fasting_sample(&samples) else {
                continue;
            };

            let mut upsert = ReadingUpsert::new(slot.user_id, date, MealCategory::Fasting);
            upsert.glucose = Some(sample.value);
            upsert.glucose_2hr = Some(sample.value);
            let filled = lock(&ctx.store).upsert_reading(&upsert);
            match filled {
                Ok(_) => report.updated += 1,
                Err(e) => {
                    warn!(user_id = slot.user_id, %date, error = %e, "Failed to fill fasting slot");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

impl Job for FastingAutofillJob {
    fn name(&self) -> &'static str {
        "fasting-autofill"
    }

    fn run<'a>(&'a self, ctx: &'a JobContext) -> BoxFuture<'a, Result<JobReport>> {
        Box::pin(async move { Self::fill(ctx) })
    }
}

// --- Missing-slot backfill ---

pub struct MissingSlotBackfillJob;

impl MissingSlotBackfillJob {
    fn backfill(ctx: &JobContext) -> Result<JobReport> {
        let Some(date) = ctx.today().checked_sub_days(Days::new(1)) else {
            bail!("No previous day before {}", ctx.today());
        };
        let mut report = JobReport::new(MissingSlotBackfillJob.name());
        let users = lock(&ctx.store).active_user_ids()?;

        for chunk in users.chunks(ctx.chunk_size()) {
            let existing = lock(&ctx.store).existing_slots(date, chunk)?;
            let placeholders: Vec<Placeholder> = chunk
                .iter()
                .flat_map(|&user_id| {
                    MealCategory::ALL.into_iter().map(move |category| Placeholder {
                        user_id,
                        date,
                        category,
                    })
                })
                .filter(|p| !existing.contains(&(p.user_id, p.category)))
                .collect();

            let created = lock(&ctx.store).insert_placeholders(&placeholders)?;
            debug!(users = chunk.len(), created, %date, "Backfilled chunk");
            report.processed += chunk.len();
            report.updated += created;
        }
        Ok(report)
    }
}

impl Job for MissingSlotBackfillJob {
    fn name(&self) -> &'static str {
        "missing-slot-backfill"
    }

    fn run<'a>(&'a self, ctx: &'a JobContext) -> BoxFuture<'a, Result<JobReport>> {
        Box::pin(async move { Self::backfill(ctx) })
    }
}

// --- External device sync ---

/// Parse a vendor timestamp into wall-clock time.
///
/// Accepts RFC 3339 (offset is dropped, local reading time is kept), naive
/// ISO 8601, and the `M/D/YYYY h:mm:ss AM` form LibreLinkUp uses.
#[must_use]
pub fn parse_vendor_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%m/%d/%Y %I:%M:%S %p"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Convert vendor pairs to samples, dropping any that cannot be parsed.
#[must_use]
pub fn vendor_samples(user_id: i64, readings: &[VendorReading]) -> Vec<DeviceSample> {
    readings
        .iter()
        .filter_map(|r| {
            if !r.value.is_finite() || r.value < 0.0 {
                warn!(user_id, value = r.value, "Dropping device sample with bad value");
                return None;
            }
            match parse_vendor_timestamp(&r.timestamp) {
                Some(ts) => Some(DeviceSample::at(ts, r.value)),
                None => {
                    warn!(user_id, timestamp = %r.timestamp, "Dropping device sample with unparseable timestamp");
                    None
                }
            }
        })
        .collect()
}

pub struct DeviceSyncJob {
    client: Arc<dyn CgmVendorClient>,
}

impl DeviceSyncJob {
    #[must_use]
    pub fn new(client: Arc<dyn CgmVendorClient>) -> Self {
        Self { client }
    }

    fn window(ctx: &JobContext) -> DateWindow {
        let to = ctx.now.and_utc().timestamp_millis();
        let from = to - ctx.sync_lookback_hours.max(0) * 60 * 60 * 1000;
        DateWindow { from, to }
    }

    async fn sync_chunk(
        &self,
        ctx: &JobContext,
        chunk: &[VendorAccount],
        window: DateWindow,
        report: &mut JobReport,
    ) {
        let mut tasks = JoinSet::new();
        for account in chunk {
            let client = Arc::clone(&self.client);
            let account = account.clone();
            tasks.spawn(async move {
                let fetched = client.fetch_readings(&account.credentials, window).await;
                (account.user_id, fetched)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            report.processed += 1;
            let (user_id, fetched) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Device sync task did not complete");
                    report.failed += 1;
                    continue;
                }
            };
            let readings = match fetched {
                Ok(readings) => readings,
                Err(e) => {
                    warn!(user_id, error = %e, "Device sync failed");
                    report.failed += 1;
                    continue;
                }
            };

            let records = DeviceHistoryRecord::group_samples(user_id, vendor_samples(user_id, &readings));
            let stored = lock(&ctx.store).add_device_history(user_id, &records);
            match stored {
                Ok(created) => report.updated += created,
                Err(e) => {
                    warn!(user_id, error = %e, "Failed to store device history");
                    report.failed += 1;
                }
            }
        }
    }
}

impl Job for DeviceSyncJob {
    fn name(&self) -> &'static str {
        "device-sync"
    }

    fn run<'a>(&'a self, ctx: &'a JobContext) -> BoxFuture<'a, Result<JobReport>> {
        Box::pin(async move {
            let mut report = JobReport::new(self.name());
            let accounts = lock(&ctx.store).vendor_accounts()?;
            let window = Self::window(ctx);
            for (index, chunk) in accounts.chunks(ctx.chunk_size()).enumerate() {
                debug!(chunk = index, users = chunk.len(), "Syncing device chunk");
                self.sync_chunk(ctx, chunk, window, &mut report).await;
            }
            Ok(report)
        })
    }
}

// --- Running ---

/// The daily job set, in the order they should run.
#[must_use]
pub fn daily_jobs(client: Arc<dyn CgmVendorClient>) -> Vec<Box<dyn Job>> {
    vec![
        Box::new(MissingSlotBackfillJob),
        Box::new(DeviceSyncJob::new(client)),
        Box::new(FastingAutofillJob),
    ]
}

/// Run jobs in order. A failing job is logged and does not stop the rest.
pub async fn run_jobs(jobs: &[Box<dyn Job>], ctx: &JobContext) -> Vec<Result<JobReport>> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        info!(job = job.name(), "Starting job");
        let result = job.run(ctx).await;
        match &result {
            Ok(report) => info!(
                job = report.job,
                processed = report.processed,
                updated = report.updated,
                failed = report.failed,
                "Job finished"
            ),
            Err(e) => warn!(job = job.name(), error = %e, "Job failed"),
        }
        results.push(result);
    }
    results
}
