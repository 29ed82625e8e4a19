use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_DEXCOM_URL: &str = "https://api.dexcom.com";
pub const DEFAULT_LIBRE_URL: &str = "https://api.libreview.io";

/// Optional `settings.json` in the data directory. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Users per reconciler chunk.
    pub chunk_size: usize,
    pub sync_lookback_hours: i64,
    pub dexcom_base_url: String,
    pub libre_base_url: String,
    /// Hour of day (0-23) the scheduled jobs fire. From 5 on, the run also
    /// covers the same morning's fasting window.
    pub job_hour: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            sync_lookback_hours: 24,
            dexcom_base_url: DEFAULT_DEXCOM_URL.to_string(),
            libre_base_url: DEFAULT_LIBRE_URL.to_string(),
            job_hour: 5,
        }
    }
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "glyco").context("Could not determine home directory")?;
        let mut config = Self::load_from(proj_dirs.data_dir())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let settings_path = data_dir.join("settings.json");
        let settings = if settings_path.exists() {
            let raw = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid settings file: {}", settings_path.display()))?
        } else {
            Settings::default()
        };

        if settings.job_hour > 23 {
            anyhow::bail!("job_hour must be between 0 and 23 (got {})", settings.job_hour);
        }

        let db_path = data_dir.join("glyco.db");

        Ok(Config {
            db_path,
            data_dir,
            settings,
        })
    }

    /// `GLYCO_DB` overrides the database path, `GLYCO_CHUNK_SIZE` the chunk size.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("GLYCO_DB").filter(|p| !p.is_empty()) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(size) = var("GLYCO_CHUNK_SIZE") {
            let size: usize = size
                .trim()
                .parse()
                .with_context(|| format!("Invalid GLYCO_CHUNK_SIZE '{size}'"))?;
            if size == 0 {
                anyhow::bail!("GLYCO_CHUNK_SIZE must be greater than 0");
            }
            self.settings.chunk_size = size;
        }
        Ok(())
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.db_path, dir.path().join("glyco.db"));
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"chunk_size": 10, "job_hour": 2}"#,
        )
        .unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.settings.chunk_size, 10);
        assert_eq!(config.settings.job_hour, 2);
        assert_eq!(config.settings.sync_lookback_hours, 24);
        assert_eq!(config.settings.dexcom_base_url, DEFAULT_DEXCOM_URL);
    }

    #[test]
    fn test_bad_job_hour_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), r#"{"job_hour": 24}"#).unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from(dir.path()).unwrap();
        config
            .apply_env(|key| match key {
                "GLYCO_DB" => Some("/tmp/other.db".to_string()),
                "GLYCO_CHUNK_SIZE" => Some("7".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.settings.chunk_size, 7);

        assert!(
            config
                .apply_env(|key| (key == "GLYCO_CHUNK_SIZE").then(|| "0".to_string()))
                .is_err()
        );
    }

    #[test]
    fn test_api_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
