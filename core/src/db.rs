use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    DEVICE_DATE_FORMAT, DateWindow, DeviceHistoryRecord, DeviceSample, DeviceVendor,
    ExerciseEntry, GLUCOSE_UNIT, GlucoseInterval, GlucoseReading, MealCategory, ReadingUpsert,
    UserGlucoseProfile, VendorAccount, VendorCredentials, day_start_ms,
};
use crate::store::{GlucoseStore, Placeholder};

const READING_COLUMNS: &str = "id, uuid, user_id, date, category, glucose, glucose_2hr,
     is_glucose_exists, is_glucose_exist_2hr, is_meal_exists, is_medication_exists,
     insulin_units, time, unit";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS user_profiles (
                    user_id INTEGER PRIMARY KEY,
                    glucose_interval INTEGER NOT NULL DEFAULT 1
                        CHECK (glucose_interval IN (1, 2)),
                    device TEXT NOT NULL DEFAULT 'N/A',
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS glucose_readings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    category TEXT NOT NULL,
                    glucose REAL,
                    glucose_2hr REAL,
                    is_glucose_exists INTEGER NOT NULL DEFAULT 0,
                    is_glucose_exist_2hr INTEGER NOT NULL DEFAULT 0,
                    is_meal_exists INTEGER NOT NULL DEFAULT 0,
                    is_medication_exists INTEGER NOT NULL DEFAULT 0,
                    insulin_units REAL,
                    time INTEGER NOT NULL,
                    unit TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, date, category)
                );

                CREATE TABLE IF NOT EXISTS device_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    time_label TEXT NOT NULL,
                    time_in_msec INTEGER NOT NULL,
                    value REAL NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, time_in_msec)
                );

                CREATE INDEX IF NOT EXISTS idx_glucose_readings_user_time
                    ON glucose_readings(user_id, time);
                CREATE INDEX IF NOT EXISTS idx_glucose_readings_date
                    ON glucose_readings(date, category);
                CREATE INDEX IF NOT EXISTS idx_device_history_user_date
                    ON device_history(user_id, date);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS vendor_credentials (
                    user_id INTEGER PRIMARY KEY,
                    vendor TEXT NOT NULL,
                    access_token TEXT NOT NULL,
                    account_id TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS exercise_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    duration_minutes REAL NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_exercise_entries_user_date
                    ON exercise_entries(user_id, date);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    fn reading_from_row(row: &rusqlite::Row) -> rusqlite::Result<GlucoseReading> {
        let date_str: String = row.get(3)?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let category_str: String = row.get(4)?;
        let category = category_str.parse::<MealCategory>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(GlucoseReading {
            id: row.get(0)?,
            uuid: row.get(1)?,
            user_id: row.get(2)?,
            date,
            category,
            glucose: row.get(5)?,
            glucose_2hr: row.get(6)?,
            is_glucose_exists: row.get(7)?,
            is_glucose_exist_2hr: row.get(8)?,
            is_meal_exists: row.get(9)?,
            is_medication_exists: row.get(10)?,
            insulin_units: row.get(11)?,
            time: row.get(12)?,
            unit: row.get(13)?,
        })
    }

    fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserGlucoseProfile> {
        let interval: u8 = row.get(1)?;
        let glucose_interval = GlucoseInterval::try_from(interval).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
        })?;
        let device: String = row.get(2)?;
        Ok(UserGlucoseProfile {
            user_id: row.get(0)?,
            glucose_interval,
            device: device.parse().unwrap_or(DeviceVendor::None),
            active: row.get(3)?,
        })
    }

    fn sample_from_row(row: &rusqlite::Row) -> rusqlite::Result<DeviceSample> {
        Ok(DeviceSample {
            time: row.get(0)?,
            time_in_msec: row.get(1)?,
            value: row.get(2)?,
        })
    }

    pub fn get_reading(&self, user_id: i64, date: NaiveDate, category: MealCategory) -> Result<Option<GlucoseReading>> {
        let reading = self
            .conn
            .query_row(
                &format!(
                    "SELECT {READING_COLUMNS} FROM glucose_readings
                     WHERE user_id = ?1 AND date = ?2 AND category = ?3"
                ),
                params![user_id, date.format("%Y-%m-%d").to_string(), category.as_str()],
                Self::reading_from_row,
            )
            .optional()?;
        Ok(reading)
    }
}

impl GlucoseStore for Database {
    fn get_profile(&self, user_id: i64) -> Result<Option<UserGlucoseProfile>> {
        let profile = self
            .conn
            .query_row(
                "SELECT user_id, glucose_interval, device, active
                 FROM user_profiles WHERE user_id = ?1",
                params![user_id],
                Self::profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    fn upsert_profile(&self, profile: &UserGlucoseProfile) -> Result<UserGlucoseProfile> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_profiles (user_id, glucose_interval, device, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                glucose_interval = excluded.glucose_interval,
                device = excluded.device,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                profile.user_id,
                profile.glucose_interval.as_u8(),
                profile.device.as_str(),
                profile.active,
                now
            ],
        )?;
        self.get_profile(profile.user_id)?
            .context("Profile not found after upsert")
    }

    fn active_user_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM user_profiles WHERE active = 1 ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn upsert_reading(&self, upsert: &ReadingUpsert) -> Result<GlucoseReading> {
        let upsert = upsert.clone().normalized();
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        let date_str = upsert.date.format("%Y-%m-%d").to_string();
        let insert_time = upsert.time.unwrap_or_else(|| day_start_ms(upsert.date));
        let glucose_set = upsert.glucose.is_some_and(|g| g > 0.0);
        let glucose_2hr_set = upsert.glucose_2hr.is_some_and(|g| g > 0.0);
        let medication_set = upsert.insulin_units.is_some();

        self.conn.execute(
            "INSERT INTO glucose_readings (uuid, user_id, date, category, glucose, glucose_2hr,
                is_glucose_exists, is_glucose_exist_2hr, is_meal_exists, is_medication_exists,
                insulin_units, time, unit, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, 0), ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(user_id, date, category) DO UPDATE SET
                glucose = COALESCE(excluded.glucose, glucose_readings.glucose),
                glucose_2hr = COALESCE(excluded.glucose_2hr, glucose_readings.glucose_2hr),
                is_glucose_exists = glucose_readings.is_glucose_exists OR excluded.is_glucose_exists,
                is_glucose_exist_2hr = glucose_readings.is_glucose_exist_2hr OR excluded.is_glucose_exist_2hr,
                is_meal_exists = COALESCE(?9, glucose_readings.is_meal_exists),
                is_medication_exists = glucose_readings.is_medication_exists OR excluded.is_medication_exists,
                insulin_units = COALESCE(excluded.insulin_units, glucose_readings.insulin_units),
                time = COALESCE(?15, glucose_readings.time),
                updated_at = excluded.updated_at",
            params![
                uuid,
                upsert.user_id,
                date_str,
                upsert.category.as_str(),
                upsert.glucose,
                upsert.glucose_2hr,
                glucose_set,
                glucose_2hr_set,
                upsert.is_meal_exists,
                medication_set,
                upsert.insulin_units,
                insert_time,
                GLUCOSE_UNIT,
                now,
                upsert.time,
            ],
        )?;

        self.get_reading(upsert.user_id, upsert.date, upsert.category)?
            .context("Reading not found after upsert")
    }

    fn readings_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<GlucoseReading>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {READING_COLUMNS} FROM glucose_readings
             WHERE user_id = ?1 AND time >= ?2 AND time <= ?3
             ORDER BY time, id"
        ))?;
        let readings = stmt
            .query_map(params![user_id, window.from, window.to], Self::reading_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    fn unfilled_fasting_slots(&self, date: NaiveDate) -> Result<Vec<GlucoseReading>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {READING_COLUMNS} FROM glucose_readings
             WHERE date = ?1 AND category = 'fasting'
               AND (glucose IS NULL OR glucose = 0)
             ORDER BY user_id"
        ))?;
        let readings = stmt
            .query_map(
                params![date.format("%Y-%m-%d").to_string()],
                Self::reading_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    fn existing_slots(&self, date: NaiveDate, user_ids: &[i64]) -> Result<Vec<(i64, MealCategory)>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT user_id, category FROM glucose_readings
             WHERE date = ? AND user_id IN ({placeholders})"
        ))?;
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(user_ids.len() + 1);
        values.push(&date_str);
        for id in user_ids {
            values.push(id);
        }
        let rows = stmt
            .query_map(values.as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(user_id, category)| Some((user_id, category.parse().ok()?)))
            .collect())
    }

    fn insert_placeholders(&self, placeholders: &[Placeholder]) -> Result<usize> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO glucose_readings (uuid, user_id, date, category, glucose, glucose_2hr,
                    is_glucose_exists, is_glucose_exist_2hr, is_meal_exists, is_medication_exists,
                    time, unit, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, 0, 0, 0, 0, ?5, ?6, ?7, ?7)
                 ON CONFLICT(user_id, date, category) DO NOTHING",
            )?;
            for p in placeholders {
                created += stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    p.user_id,
                    p.date.format("%Y-%m-%d").to_string(),
                    p.category.as_str(),
                    day_start_ms(p.date),
                    GLUCOSE_UNIT,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    fn add_device_history(&self, user_id: i64, records: &[DeviceHistoryRecord]) -> Result<usize> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO device_history (user_id, date, time_label, time_in_msec, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, time_in_msec) DO NOTHING",
            )?;
            for record in records {
                for sample in &record.samples {
                    created += stmt.execute(params![
                        user_id,
                        record.date,
                        sample.time,
                        sample.time_in_msec,
                        sample.value,
                        now,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(created)
    }

    fn device_samples_for_date(&self, user_id: i64, date: NaiveDate) -> Result<Vec<DeviceSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT time_label, time_in_msec, value FROM device_history
             WHERE user_id = ?1 AND date = ?2
             ORDER BY time_in_msec",
        )?;
        let samples = stmt
            .query_map(
                params![user_id, date.format(DEVICE_DATE_FORMAT).to_string()],
                Self::sample_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    fn device_samples_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<DeviceSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT time_label, time_in_msec, value FROM device_history
             WHERE user_id = ?1 AND time_in_msec >= ?2 AND time_in_msec <= ?3
             ORDER BY time_in_msec",
        )?;
        let samples = stmt
            .query_map(params![user_id, window.from, window.to], Self::sample_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    fn set_vendor_credentials(&self, user_id: i64, credentials: &VendorCredentials) -> Result<()> {
        if credentials.vendor == DeviceVendor::None {
            bail!("Credentials need a vendor device (libre or dexcom)");
        }
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO vendor_credentials (user_id, vendor, access_token, account_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                vendor = excluded.vendor,
                access_token = excluded.access_token,
                account_id = excluded.account_id,
                updated_at = excluded.updated_at",
            params![
                user_id,
                credentials.vendor.as_str(),
                credentials.access_token,
                credentials.account_id,
                now
            ],
        )?;
        Ok(())
    }

    fn vendor_accounts(&self) -> Result<Vec<VendorAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.user_id, c.vendor, c.access_token, c.account_id
             FROM user_profiles p
             JOIN vendor_credentials c ON c.user_id = p.user_id AND c.vendor = p.device
             WHERE p.active = 1 AND p.device != 'N/A'
             ORDER BY p.user_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, vendor, access_token, account_id)| {
                Ok(VendorAccount {
                    user_id,
                    credentials: VendorCredentials {
                        vendor: vendor.parse()?,
                        access_token,
                        account_id,
                    },
                })
            })
            .collect()
    }

    fn log_exercise(&self, entry: &ExerciseEntry) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO exercise_entries (user_id, date, duration_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.user_id,
                entry.date.format("%Y-%m-%d").to_string(),
                entry.duration_minutes,
                now
            ],
        )?;
        Ok(())
    }

    fn exercise_in_window(&self, user_id: i64, window: &DateWindow) -> Result<Vec<ExerciseEntry>> {
        let days = window.days();
        let (Some(first), Some(last)) = (days.first(), days.last()) else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            "SELECT user_id, date, duration_minutes FROM exercise_entries
             WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date, id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    first.format("%Y-%m-%d").to_string(),
                    last.format("%Y-%m-%d").to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, date, duration_minutes)| {
                Ok(ExerciseEntry {
                    user_id,
                    date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")?,
                    duration_minutes,
                })
            })
            .collect()
    }
}
