use std::path::Path;
use std::sync::MutexGuard;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::aggregate::{self, GlucoseOverview, QuickSummaryEntry, TrendView};
use crate::cgm::{self, CgmSummary};
use crate::db::Database;
use crate::error::EngineError;
use crate::export;
use crate::interval::IntervalSelection;
use crate::models::{
    CgmAnnotations, DateWindow, DeviceHistoryRecord, DeviceSample, ExerciseEntry,
    GlucoseInterval, GlucoseReading, ReadingUpsert, UserGlucoseProfile, VendorCredentials,
    validate_exercise_minutes, validate_glucose_value, validate_insulin_units,
};
use crate::store::{GlucoseStore, SharedStore, lock, shared};

/// A user, an epoch-ms window and an optional interval override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowQuery {
    pub user_id: i64,
    #[serde(rename = "fromDate")]
    pub from: i64,
    #[serde(rename = "toDate")]
    pub to: i64,
    #[serde(default)]
    pub glucose_interval: Option<GlucoseInterval>,
    /// End of the trailing 7-day window. Defaults to now.
    #[serde(default)]
    pub anchor: Option<i64>,
}

impl WindowQuery {
    #[must_use]
    pub fn new(user_id: i64, window: DateWindow) -> Self {
        Self {
            user_id,
            from: window.from,
            to: window.to,
            glucose_interval: None,
            anchor: None,
        }
    }

    pub fn window(&self) -> Result<DateWindow> {
        Ok(DateWindow::new(self.from, self.to)?)
    }

    fn anchor(&self) -> i64 {
        self.anchor.unwrap_or_else(|| Utc::now().timestamp_millis())
    }
}

pub struct GlucoseService {
    store: SharedStore,
}

impl GlucoseService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self::with_store(shared(db)))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_store(shared(db)))
    }

    #[must_use]
    pub fn with_store(store: SharedStore) -> Self {
        Self { store }
    }

    /// Handle for jobs that need to share the same store.
    #[must_use]
    pub fn store(&self) -> SharedStore {
        std::sync::Arc::clone(&self.store)
    }

    fn db(&self) -> MutexGuard<'_, dyn GlucoseStore + Send + 'static> {
        lock(&self.store)
    }

    // --- Profiles ---

    /// Stores a profile. Combined mode is a request-time override only, so a
    /// profile must carry interval 1 or 2.
    pub fn set_profile(&self, profile: &UserGlucoseProfile) -> Result<UserGlucoseProfile> {
        if profile.glucose_interval == GlucoseInterval::Combined {
            return Err(EngineError::InvalidProfileInterval(profile.glucose_interval.as_u8()).into());
        }
        self.db().upsert_profile(profile)
    }

    pub fn get_profile(&self, user_id: i64) -> Result<UserGlucoseProfile> {
        let profile = self.db().get_profile(user_id)?;
        profile.ok_or_else(|| EngineError::UserNotFound(user_id).into())
    }

    fn selection(&self, query: &WindowQuery) -> Result<(IntervalSelection, DateWindow)> {
        let window = query.window()?;
        let profile = self.get_profile(query.user_id)?;
        Ok((
            IntervalSelection::new(query.glucose_interval, profile.glucose_interval),
            window,
        ))
    }

    fn readings(&self, user_id: i64, window: &DateWindow) -> Result<Vec<GlucoseReading>> {
        self.db().readings_in_window(user_id, window)
    }

    // --- Logging ---

    pub fn log_glucose(&self, upsert: &ReadingUpsert) -> Result<GlucoseReading> {
        self.get_profile(upsert.user_id)?;
        for value in [upsert.glucose, upsert.glucose_2hr].into_iter().flatten() {
            validate_glucose_value(value)?;
        }
        if let Some(units) = upsert.insulin_units {
            validate_insulin_units(units)?;
        }
        self.db().upsert_reading(upsert)
    }

    pub fn log_exercise(&self, entry: &ExerciseEntry) -> Result<()> {
        self.get_profile(entry.user_id)?;
        validate_exercise_minutes(entry.duration_minutes)?;
        self.db().log_exercise(entry)
    }

    pub fn set_vendor_credentials(&self, user_id: i64, credentials: &VendorCredentials) -> Result<()> {
        self.get_profile(user_id)?;
        self.db().set_vendor_credentials(user_id, credentials)
    }

    // --- Aggregation ---

    pub fn overview(&self, query: &WindowQuery, is_export: bool) -> Result<GlucoseOverview> {
        let (selection, window) = self.selection(query)?;
        let anchor = query.anchor();
        let week = DateWindow::checked_trailing_days(anchor, 7)?;
        // Readings for the trailing week may fall outside the requested window.
        let fetch = DateWindow {
            from: window.from.min(week.from),
            to: window.to.max(anchor),
        };
        let readings = self.readings(query.user_id, &fetch)?;
        Ok(aggregate::build_overview(
            query.user_id,
            &readings,
            &window,
            anchor,
            selection,
            is_export,
        ))
    }

    pub fn quick_summary(&self, query: &WindowQuery) -> Result<Vec<QuickSummaryEntry>> {
        let (selection, window) = self.selection(query)?;
        let readings = self.readings(query.user_id, &window)?;
        Ok(aggregate::quick_summary(&readings, &window, selection))
    }

    pub fn trend(&self, query: &WindowQuery) -> Result<TrendView> {
        let (selection, window) = self.selection(query)?;
        let anchor = query.anchor();
        let week = DateWindow::checked_trailing_days(anchor, 7)?;
        let fetch = DateWindow {
            from: window.from.min(week.from),
            to: window.to.max(anchor),
        };
        let readings = self.readings(query.user_id, &fetch)?;
        Ok(aggregate::build_trend(&readings, &window, anchor, selection))
    }

    /// Average over the `days` days ending at `anchor`; `days` must lie in
    /// `1..=MAX_TRAILING_DAYS`.
    pub fn rolling_average(
        &self,
        user_id: i64,
        days: i64,
        anchor: i64,
        interval: Option<GlucoseInterval>,
    ) -> Result<f64> {
        let profile = self.get_profile(user_id)?;
        let window = DateWindow::checked_trailing_days(anchor, days)?;
        let readings = self.readings(user_id, &window)?;
        let selection = IntervalSelection::new(interval, profile.glucose_interval);
        Ok(aggregate::rolling_average(&readings, anchor, days, selection))
    }

    pub fn cgm_summary(&self, query: &WindowQuery, annotations: CgmAnnotations) -> Result<CgmSummary> {
        let (_, window) = self.selection(query)?;
        let readings = self.readings(query.user_id, &window)?;
        let exercise = self.db().exercise_in_window(query.user_id, &window)?;
        Ok(cgm::summarize(&readings, &window, &exercise, annotations))
    }

    // --- Device history ---

    pub fn add_device_history(&self, user_id: i64, samples: Vec<DeviceSample>) -> Result<usize> {
        self.get_profile(user_id)?;
        let records = DeviceHistoryRecord::group_samples(user_id, samples);
        self.db().add_device_history(user_id, &records)
    }

    pub fn device_graph(&self, user_id: i64, window: &DateWindow) -> Result<Vec<DeviceHistoryRecord>> {
        self.get_profile(user_id)?;
        let samples = self.db().device_samples_in_window(user_id, window)?;
        Ok(DeviceHistoryRecord::group_samples(user_id, samples))
    }

    // --- Export ---

    pub fn export_table_csv(&self, query: &WindowQuery) -> Result<String> {
        let (selection, window) = self.selection(query)?;
        let readings = self.readings(query.user_id, &window)?;
        export::date_table(&readings, &window, selection).to_csv()
    }

    pub fn export_quick_summary_csv(&self, query: &WindowQuery) -> Result<String> {
        let entries = self.quick_summary(query)?;
        export::quick_summary_table(&entries).to_csv()
    }

    pub fn export_text_snapshot(&self, query: &WindowQuery) -> Result<String> {
        let overview = self.overview(query, true)?;
        Ok(export::text_snapshot(&overview))
    }
}
