use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::NaiveDate;

use crate::models::{
    DateWindow, DeviceHistoryRecord, DeviceSample, ExerciseEntry, GlucoseReading, MealCategory,
    ReadingUpsert, UserGlucoseProfile, VendorAccount, VendorCredentials,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A placeholder row for a (user, date, category) slot with no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub user_id: i64,
    pub date: NaiveDate,
    pub category: MealCategory,
}

/// Storage the engine and reconciler read from and write into.
///
/// `Database` is the SQLite implementation; anything else (fakes in tests)
/// only needs to honour the same upsert keys: (user, date, category) for
/// readings and (user, timeInMsec) for device samples.
pub trait GlucoseStore {
    fn get_profile(&self, user_id: i64) -> Result<Option<UserGlucoseProfile>>;
    fn upsert_profile(&self, profile: &UserGlucoseProfile) -> Result<UserGlucoseProfile>;
    fn active_user_ids(&self) -> Result<Vec<i64>>;

    fn upsert_reading(&self, upsert: &ReadingUpsert) -> Result<GlucoseReading>;
    fn readings_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<GlucoseReading>>;
    /// Fasting slots on `date` whose glucose is unset or zero.
    fn unfilled_fasting_slots(&self, date: NaiveDate) -> Result<Vec<GlucoseReading>>;
    /// Categories that already have a row on `date`, per user.
    fn existing_slots(&self, date: NaiveDate, user_ids: &[i64]) -> Result<Vec<(i64, MealCategory)>>;
    /// Insert zero-valued placeholders, skipping slots that already exist.
    /// Returns the number of rows actually created.
    fn insert_placeholders(&self, placeholders: &[Placeholder]) -> Result<usize>;

    /// Append samples, ignoring ones already stored. Returns rows created.
    fn add_device_history(&self, user_id: i64, records: &[DeviceHistoryRecord]) -> Result<usize>;
    fn device_samples_for_date(&self, user_id: i64, date: NaiveDate) -> Result<Vec<DeviceSample>>;
    fn device_samples_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<DeviceSample>>;

    fn set_vendor_credentials(&self, user_id: i64, credentials: &VendorCredentials) -> Result<()>;
    /// Active users with a vendor device and stored credentials for it.
    fn vendor_accounts(&self) -> Result<Vec<VendorAccount>>;

    fn log_exercise(&self, entry: &ExerciseEntry) -> Result<()>;
    fn exercise_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<ExerciseEntry>>;
}

pub type SharedStore = Arc<Mutex<dyn GlucoseStore + Send>>;

pub fn shared<S: GlucoseStore + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock the store, recovering from a poisoned mutex.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, dyn GlucoseStore + Send + 'static> {
    store.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
