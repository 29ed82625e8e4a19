use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Longest trailing window a caller may ask for.
pub const MAX_TRAILING_DAYS: i64 = 366;

/// Unit every stored glucose value is expressed in.
pub const GLUCOSE_UNIT: &str = "mg/dL";

/// Date format of device-history records (`MM-DD-YYYY`).
pub const DEVICE_DATE_FORMAT: &str = "%m-%d-%Y";

/// Time-of-day label format of device samples (`4:02:00 AM`).
pub const DEVICE_TIME_FORMAT: &str = "%I:%M:%S %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealCategory {
    Fasting,
    Breakfast,
    Lunch,
    Dinner,
}

impl MealCategory {
    pub const ALL: [MealCategory; 4] = [
        MealCategory::Fasting,
        MealCategory::Breakfast,
        MealCategory::Lunch,
        MealCategory::Dinner,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MealCategory::Fasting => "fasting",
            MealCategory::Breakfast => "breakfast",
            MealCategory::Lunch => "lunch",
            MealCategory::Dinner => "dinner",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MealCategory::Fasting => "Fasting",
            MealCategory::Breakfast => "Breakfast",
            MealCategory::Lunch => "Lunch",
            MealCategory::Dinner => "Dinner",
        }
    }

    #[must_use]
    pub fn is_fasting(self) -> bool {
        self == MealCategory::Fasting
    }
}

impl fmt::Display for MealCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fasting" => Ok(MealCategory::Fasting),
            "breakfast" => Ok(MealCategory::Breakfast),
            "lunch" => Ok(MealCategory::Lunch),
            "dinner" => Ok(MealCategory::Dinner),
            _ => Err(EngineError::InvalidCategory(s.to_string())),
        }
    }
}

/// Postprandial interval convention.
///
/// `Combined` is only meaningful for cross-patient listings where the
/// caller's interval differs from the subject's: values are grouped by
/// `max(glucose, glucose2hr)` while the displayed value follows the
/// subject's own interval.
/// It is a request override; a stored profile holds 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GlucoseInterval {
    OneHour,
    TwoHour,
    Combined,
}

impl GlucoseInterval {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            GlucoseInterval::OneHour => 1,
            GlucoseInterval::TwoHour => 2,
            GlucoseInterval::Combined => 3,
        }
    }
}

impl TryFrom<u8> for GlucoseInterval {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GlucoseInterval::OneHour),
            2 => Ok(GlucoseInterval::TwoHour),
            3 => Ok(GlucoseInterval::Combined),
            other => Err(EngineError::InvalidInterval(i64::from(other))),
        }
    }
}

impl From<GlucoseInterval> for u8 {
    fn from(value: GlucoseInterval) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for GlucoseInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceVendor {
    #[serde(rename = "N/A")]
    None,
    Libre,
    Dexcom,
}

impl DeviceVendor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceVendor::None => "N/A",
            DeviceVendor::Libre => "Libre",
            DeviceVendor::Dexcom => "Dexcom",
        }
    }
}

impl FromStr for DeviceVendor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "n/a" | "none" | "manual" | "" => Ok(DeviceVendor::None),
            "libre" => Ok(DeviceVendor::Libre),
            "dexcom" => Ok(DeviceVendor::Dexcom),
            _ => bail!("Unknown device vendor '{s}'. Use N/A, libre or dexcom"),
        }
    }
}

/// Inclusive epoch-millisecond window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: i64,
    pub to: i64,
}

impl DateWindow {
    pub fn new(from: i64, to: i64) -> Result<Self, EngineError> {
        if from > to {
            return Err(EngineError::InvalidWindow { from, to });
        }
        Ok(Self { from, to })
    }

    /// The `days`-day window ending at `anchor`. Saturates at the i64 bounds;
    /// callers holding untrusted input go through [`Self::checked_trailing_days`].
    #[must_use]
    pub fn trailing_days(anchor: i64, days: i64) -> Self {
        Self {
            from: anchor.saturating_sub(days.saturating_mul(MS_PER_DAY)),
            to: anchor,
        }
    }

    /// Like [`Self::trailing_days`], rejecting day counts outside
    /// `1..=MAX_TRAILING_DAYS` and anchors whose window leaves the calendar.
    pub fn checked_trailing_days(anchor: i64, days: i64) -> Result<Self, EngineError> {
        if !(1..=MAX_TRAILING_DAYS).contains(&days) {
            return Err(EngineError::InvalidDayCount(days));
        }
        let from = days
            .checked_mul(MS_PER_DAY)
            .and_then(|span| anchor.checked_sub(span))
            .filter(|from| ms_to_datetime(*from).is_some() && ms_to_datetime(anchor).is_some())
            .ok_or(EngineError::InvalidAnchor(anchor))?;
        Ok(Self { from, to: anchor })
    }

    /// Whole calendar days `first..=last`.
    #[must_use]
    pub fn for_days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            from: day_start_ms(first),
            to: day_start_ms(last) + MS_PER_DAY - 1,
        }
    }

    #[must_use]
    pub fn contains(&self, time: i64) -> bool {
        time >= self.from && time <= self.to
    }

    /// Calendar days touched by the window, in order.
    #[must_use]
    pub fn days(&self) -> Vec<NaiveDate> {
        let (Some(first), Some(last)) = (ms_to_date(self.from), ms_to_date(self.to)) else {
            return Vec::new();
        };
        first.iter_days().take_while(|d| *d <= last).collect()
    }
}

#[must_use]
pub fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

#[must_use]
pub fn ms_to_datetime(ms: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

#[must_use]
pub fn ms_to_date(ms: i64) -> Option<NaiveDate> {
    ms_to_datetime(ms).map(|dt| dt.date())
}

/// One glucose-bearing slot: a (user, day, category) meal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReading {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub user_id: i64,
    pub date: NaiveDate,
    pub category: MealCategory,
    pub glucose: Option<f64>,
    #[serde(rename = "glucose2hr")]
    pub glucose_2hr: Option<f64>,
    pub is_glucose_exists: bool,
    #[serde(rename = "isGlucoseExist2hr")]
    pub is_glucose_exist_2hr: bool,
    pub is_meal_exists: bool,
    pub is_medication_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin_units: Option<f64>,
    pub time: i64,
    pub unit: String,
}

/// Fields a writer wants to set on a (user, date, category) slot.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingUpsert {
    pub user_id: i64,
    pub date: NaiveDate,
    pub category: MealCategory,
    pub glucose: Option<f64>,
    pub glucose_2hr: Option<f64>,
    pub is_meal_exists: Option<bool>,
    pub insulin_units: Option<f64>,
    pub time: Option<i64>,
}

impl ReadingUpsert {
    #[must_use]
    pub fn new(user_id: i64, date: NaiveDate, category: MealCategory) -> Self {
        Self {
            user_id,
            date,
            category,
            glucose: None,
            glucose_2hr: None,
            is_meal_exists: None,
            insulin_units: None,
            time: None,
        }
    }

    /// Apply the fasting mirror: fasting has one reading that also serves as
    /// the 2-hour value.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.category.is_fasting() {
            if self.glucose.is_none() {
                self.glucose = self.glucose_2hr;
            }
            self.glucose_2hr = self.glucose;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGlucoseProfile {
    pub user_id: i64,
    pub glucose_interval: GlucoseInterval,
    pub device: DeviceVendor,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSample {
    pub time: String,
    pub time_in_msec: i64,
    pub value: f64,
}

impl DeviceSample {
    /// Build a sample from a wall-clock timestamp, deriving the time label.
    #[must_use]
    pub fn at(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            time: timestamp.format("%-I:%M:%S %p").to_string(),
            time_in_msec: timestamp.and_utc().timestamp_millis(),
            value,
        }
    }

    #[must_use]
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), DEVICE_TIME_FORMAT).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistoryRecord {
    pub user_id: i64,
    /// `MM-DD-YYYY`
    pub date: String,
    pub samples: Vec<DeviceSample>,
}

impl DeviceHistoryRecord {
    /// Group samples by their calendar day, ordering days and samples by time.
    #[must_use]
    pub fn group_samples(user_id: i64, mut samples: Vec<DeviceSample>) -> Vec<Self> {
        samples.sort_by_key(|s| s.time_in_msec);
        let mut records: Vec<Self> = Vec::new();
        for sample in samples {
            let Some(day) = ms_to_date(sample.time_in_msec) else {
                continue;
            };
            let date = day.format(DEVICE_DATE_FORMAT).to_string();
            match records.last_mut() {
                Some(last) if last.date == date => last.samples.push(sample),
                _ => records.push(Self {
                    user_id,
                    date,
                    samples: vec![sample],
                }),
            }
        }
        records
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseEntry {
    pub user_id: i64,
    pub date: NaiveDate,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCredentials {
    pub vendor: DeviceVendor,
    pub access_token: String,
    /// Vendor-side account or patient id, when the API needs one.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// A user eligible for external device sync.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorAccount {
    pub user_id: i64,
    pub credentials: VendorCredentials,
}

/// Raw timestamp/value pair as returned by a CGM vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorReading {
    pub timestamp: String,
    pub value: f64,
}

/// Caller-supplied annotations echoed by the CGM summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CgmAnnotations {
    pub cgm_active_time: Option<String>,
    pub gmi: Option<String>,
    pub cov: Option<String>,
}

pub fn validate_glucose_value(value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("Glucose value must be a non-negative number (got {value})");
    }
    if value > 1000.0 {
        bail!("Glucose value {value} {GLUCOSE_UNIT} is outside the measurable range");
    }
    Ok(())
}

pub fn validate_insulin_units(units: f64) -> Result<()> {
    if !units.is_finite() || units < 0.0 {
        bail!("Insulin dose must be a non-negative number (got {units})");
    }
    Ok(())
}

pub fn validate_exercise_minutes(minutes: f64) -> Result<()> {
    if !minutes.is_finite() || minutes <= 0.0 {
        bail!("Exercise duration must be greater than 0 minutes");
    }
    if minutes > 24.0 * 60.0 {
        bail!("Exercise duration cannot exceed one day");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_case_insensitive() {
        assert_eq!("Fasting".parse::<MealCategory>().unwrap(), MealCategory::Fasting);
        assert_eq!(" DINNER ".parse::<MealCategory>().unwrap(), MealCategory::Dinner);
        assert!("snack".parse::<MealCategory>().is_err());
    }

    #[test]
    fn test_interval_from_u8() {
        assert_eq!(GlucoseInterval::try_from(2).unwrap(), GlucoseInterval::TwoHour);
        assert_eq!(GlucoseInterval::try_from(3).unwrap(), GlucoseInterval::Combined);
        assert!(GlucoseInterval::try_from(4).is_err());
    }

    #[test]
    fn test_interval_serde_as_number() {
        let json = serde_json::to_string(&GlucoseInterval::TwoHour).unwrap();
        assert_eq!(json, "2");
        let back: GlucoseInterval = serde_json::from_str("1").unwrap();
        assert_eq!(back, GlucoseInterval::OneHour);
        assert!(serde_json::from_str::<GlucoseInterval>("7").is_err());
    }

    #[test]
    fn test_device_vendor_serde() {
        assert_eq!(serde_json::to_string(&DeviceVendor::None).unwrap(), "\"N/A\"");
        assert_eq!("dexcom".parse::<DeviceVendor>().unwrap(), DeviceVendor::Dexcom);
        assert!("medtronic".parse::<DeviceVendor>().is_err());
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(DateWindow::new(10, 5).is_err());
        assert!(DateWindow::new(5, 5).is_ok());
    }

    #[test]
    fn test_trailing_days_saturates() {
        let window = DateWindow::trailing_days(i64::MIN + 5, 7);
        assert_eq!(window.from, i64::MIN);
        assert_eq!(DateWindow::trailing_days(0, i64::MAX).from, i64::MIN);
        assert_eq!(DateWindow::trailing_days(MS_PER_DAY * 7, 7).from, 0);
    }

    #[test]
    fn test_checked_trailing_days() {
        let anchor = day_start_ms(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        let window = DateWindow::checked_trailing_days(anchor, 7).unwrap();
        assert_eq!(window.to - window.from, 7 * MS_PER_DAY);

        assert_eq!(
            DateWindow::checked_trailing_days(anchor, 0),
            Err(EngineError::InvalidDayCount(0))
        );
        assert_eq!(
            DateWindow::checked_trailing_days(anchor, 200_000_000_000),
            Err(EngineError::InvalidDayCount(200_000_000_000))
        );
        assert_eq!(
            DateWindow::checked_trailing_days(i64::MIN, 7),
            Err(EngineError::InvalidAnchor(i64::MIN))
        );
        assert_eq!(
            DateWindow::checked_trailing_days(i64::MAX, 1),
            Err(EngineError::InvalidAnchor(i64::MAX))
        );
    }

    #[test]
    fn test_window_days() {
        let first = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
        let last = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let window = DateWindow::for_days(first, last);
        let days = window.days();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], first);
        assert_eq!(days[2], last);
        assert!(window.contains(day_start_ms(last) + 1000));
        assert!(!window.contains(day_start_ms(last) + MS_PER_DAY));
    }

    #[test]
    fn test_fasting_upsert_mirrors_glucose() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let mut upsert = ReadingUpsert::new(1, date, MealCategory::Fasting);
        upsert.glucose = Some(88.0);
        upsert.glucose_2hr = Some(130.0);
        let upsert = upsert.normalized();
        assert_eq!(upsert.glucose_2hr, Some(88.0));

        let mut only_2hr = ReadingUpsert::new(1, date, MealCategory::Fasting);
        only_2hr.glucose_2hr = Some(91.0);
        let only_2hr = only_2hr.normalized();
        assert_eq!(only_2hr.glucose, Some(91.0));
        assert_eq!(only_2hr.glucose_2hr, Some(91.0));
    }

    #[test]
    fn test_non_fasting_upsert_untouched() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let mut upsert = ReadingUpsert::new(1, date, MealCategory::Lunch);
        upsert.glucose = Some(150.0);
        let upsert = upsert.normalized();
        assert_eq!(upsert.glucose_2hr, None);
    }

    #[test]
    fn test_device_sample_label_round_trips_time() {
        let ts = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(4, 2, 0)
            .unwrap();
        let sample = DeviceSample::at(ts, 92.0);
        assert_eq!(sample.time, "4:02:00 AM");
        assert_eq!(sample.time_of_day(), NaiveTime::from_hms_opt(4, 2, 0));
    }

    #[test]
    fn test_group_samples_by_day() {
        let day1 = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let samples = vec![
            DeviceSample::at(day2.and_hms_opt(1, 0, 0).unwrap(), 100.0),
            DeviceSample::at(day1.and_hms_opt(23, 0, 0).unwrap(), 110.0),
            DeviceSample::at(day1.and_hms_opt(7, 0, 0).unwrap(), 120.0),
        ];
        let records = DeviceHistoryRecord::group_samples(3, samples);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, "06-15-2024");
        assert_eq!(records[0].samples.len(), 2);
        assert!((records[0].samples[0].value - 120.0).abs() < f64::EPSILON);
        assert_eq!(records[1].date, "06-16-2024");
    }

    #[test]
    fn test_validate_glucose_value() {
        assert!(validate_glucose_value(0.0).is_ok());
        assert!(validate_glucose_value(120.0).is_ok());
        assert!(validate_glucose_value(-1.0).is_err());
        assert!(validate_glucose_value(f64::NAN).is_err());
        assert!(validate_glucose_value(5000.0).is_err());
    }

    #[test]
    fn test_validate_exercise_minutes() {
        assert!(validate_exercise_minutes(30.0).is_ok());
        assert!(validate_exercise_minutes(0.0).is_err());
        assert!(validate_exercise_minutes(2000.0).is_err());
    }
}
