use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use glyco_core::models::{DateWindow, DeviceVendor, VendorCredentials, VendorReading, ms_to_datetime};
use glyco_core::reconcile::{CgmVendorClient, parse_vendor_timestamp};
use glyco_core::store::BoxFuture;

use crate::config::Settings;

const DEXCOM_EGVS_PATH: &str = "/v3/users/self/egvs";
const DEXCOM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!(
            "glyco/{} (glucose sync)",
            env!("CARGO_PKG_VERSION")
        ))
        .timeout(Duration::from_secs(20))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")
}

fn window_bounds(window: DateWindow) -> Result<(String, String)> {
    let from = ms_to_datetime(window.from).context("Window start out of range")?;
    let to = ms_to_datetime(window.to).context("Window end out of range")?;
    Ok((
        from.format(DEXCOM_TIME_FORMAT).to_string(),
        to.format(DEXCOM_TIME_FORMAT).to_string(),
    ))
}

// --- Dexcom ---

#[derive(Deserialize)]
struct DexcomEgvsResponse {
    #[serde(alias = "egvs", default)]
    records: Vec<DexcomEgv>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexcomEgv {
    display_time: Option<String>,
    system_time: Option<String>,
    value: Option<f64>,
}

fn dexcom_readings(body: &str) -> Result<Vec<VendorReading>> {
    let data: DexcomEgvsResponse =
        serde_json::from_str(body).context("Failed to parse Dexcom EGV response")?;
    Ok(data
        .records
        .into_iter()
        .filter_map(|egv| {
            Some(VendorReading {
                timestamp: egv.display_time.or(egv.system_time)?,
                value: egv.value?,
            })
        })
        .collect())
}

pub struct DexcomClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexcomClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn egvs(&self, access_token: &str, window: DateWindow) -> Result<Vec<VendorReading>> {
        let (start, end) = window_bounds(window)?;
        let url = format!("{}{DEXCOM_EGVS_PATH}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("startDate", start.as_str()), ("endDate", end.as_str())])
            .send()
            .await
            .context("Failed to reach Dexcom API")?
            .error_for_status()
            .context("Dexcom API rejected the request")?;
        let body = resp.text().await.context("Failed to read Dexcom response")?;
        dexcom_readings(&body)
    }
}

// --- LibreLinkUp ---

#[derive(Deserialize)]
struct LibreGraphResponse {
    data: Option<LibreGraphData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibreGraphData {
    #[serde(default)]
    graph_data: Vec<LibreMeasurement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LibreMeasurement {
    timestamp: Option<String>,
    value_in_mg_per_dl: Option<f64>,
}

/// Graph points inside `window`. Points with an unreadable timestamp are kept
/// so the reconciler can report and drop them.
fn libre_readings(body: &str, window: DateWindow) -> Result<Vec<VendorReading>> {
    let data: LibreGraphResponse =
        serde_json::from_str(body).context("Failed to parse LibreLinkUp graph response")?;
    let points = data.data.map(|d| d.graph_data).unwrap_or_default();
    Ok(points
        .into_iter()
        .filter_map(|m| {
            Some(VendorReading {
                timestamp: m.timestamp?,
                value: m.value_in_mg_per_dl?,
            })
        })
        .filter(|r| {
            parse_vendor_timestamp(&r.timestamp)
                .is_none_or(|ts| window.contains(ts.and_utc().timestamp_millis()))
        })
        .collect())
}

pub struct LibreClient {
    client: reqwest::Client,
    base_url: String,
}

impl LibreClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn graph(
        &self,
        access_token: &str,
        connection_id: &str,
        window: DateWindow,
    ) -> Result<Vec<VendorReading>> {
        let url = format!("{}/llu/connections/{connection_id}/graph", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .header("product", "llu.android")
            .header("version", "4.12.0")
            .send()
            .await
            .context("Failed to reach LibreLinkUp API")?
            .error_for_status()
            .context("LibreLinkUp API rejected the request")?;
        let body = resp.text().await.context("Failed to read LibreLinkUp response")?;
        libre_readings(&body, window)
    }
}

// --- Routing ---

/// Dispatches each account to the client for its device.
pub struct VendorRouter {
    dexcom: DexcomClient,
    libre: LibreClient,
}

impl VendorRouter {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            dexcom: DexcomClient::new(&settings.dexcom_base_url)?,
            libre: LibreClient::new(&settings.libre_base_url)?,
        })
    }
}

impl CgmVendorClient for VendorRouter {
    fn fetch_readings<'a>(
        &'a self,
        credentials: &'a VendorCredentials,
        window: DateWindow,
    ) -> BoxFuture<'a, Result<Vec<VendorReading>>> {
        Box::pin(async move {
            match credentials.vendor {
                DeviceVendor::Dexcom => self.dexcom.egvs(&credentials.access_token, window).await,
                DeviceVendor::Libre => {
                    let connection = credentials
                        .account_id
                        .as_deref()
                        .context("LibreLinkUp credentials need an account id")?;
                    self.libre
                        .graph(&credentials.access_token, connection, window)
                        .await
                }
                DeviceVendor::None => bail!("No vendor device configured"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn june_15() -> DateWindow {
        let day = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        DateWindow::for_days(day, day)
    }

    #[test]
    fn test_dexcom_parse() {
        let body = r#"{
            "recordType": "egv",
            "records": [
                {"systemTime": "2024-06-15T11:02:00Z", "displayTime": "2024-06-15T04:02:00", "value": 92},
                {"systemTime": "2024-06-15T11:07:00Z", "displayTime": "2024-06-15T04:07:00", "value": null},
                {"systemTime": "2024-06-15T11:12:00Z", "value": 101}
            ]
        }"#;
        let readings = dexcom_readings(body).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp, "2024-06-15T04:02:00");
        assert!((readings[0].value - 92.0).abs() < f64::EPSILON);
        assert_eq!(readings[1].timestamp, "2024-06-15T11:12:00Z");
    }

    #[test]
    fn test_dexcom_parse_v2_shape() {
        let body = r#"{"egvs": [{"displayTime": "2024-06-15T04:02:00", "value": 92}]}"#;
        assert_eq!(dexcom_readings(body).unwrap().len(), 1);
    }

    #[test]
    fn test_dexcom_parse_rejects_garbage() {
        assert!(dexcom_readings("<html>").is_err());
    }

    #[test]
    fn test_libre_parse_filters_window() {
        let body = r#"{
            "status": 0,
            "data": {
                "graphData": [
                    {"Timestamp": "6/15/2024 4:02:00 AM", "ValueInMgPerDl": 92},
                    {"Timestamp": "6/14/2024 11:50:00 PM", "ValueInMgPerDl": 110},
                    {"Timestamp": "??", "ValueInMgPerDl": 100},
                    {"Timestamp": "6/15/2024 5:00:00 AM"}
                ]
            }
        }"#;
        let readings = libre_readings(body, june_15()).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp, "6/15/2024 4:02:00 AM");
        assert_eq!(readings[1].timestamp, "??");
    }

    #[test]
    fn test_libre_parse_empty() {
        assert!(libre_readings(r#"{"status": 2}"#, june_15()).unwrap().is_empty());
    }

    #[test]
    fn test_window_bounds_format() {
        let (start, end) = window_bounds(june_15()).unwrap();
        assert_eq!(start, "2024-06-15T00:00:00");
        assert_eq!(end, "2024-06-15T23:59:59");
    }

    #[tokio::test]
    async fn test_router_rejects_manual_device() {
        let router = VendorRouter::new(&Settings::default()).unwrap();
        let creds = VendorCredentials {
            vendor: DeviceVendor::None,
            access_token: "tok".to_string(),
            account_id: None,
        };
        assert!(router.fetch_readings(&creds, june_15()).await.is_err());

        let libre = VendorCredentials {
            vendor: DeviceVendor::Libre,
            access_token: "tok".to_string(),
            account_id: None,
        };
        assert!(router.fetch_readings(&libre, june_15()).await.is_err());
    }

    #[tokio::test]
    #[ignore = "hits the Dexcom sandbox; needs DEXCOM_SANDBOX_TOKEN"]
    async fn test_dexcom_sandbox() {
        let Ok(token) = std::env::var("DEXCOM_SANDBOX_TOKEN") else {
            return;
        };
        let client = DexcomClient::new("https://sandbox-api.dexcom.com").unwrap();
        let readings = client.egvs(&token, june_15()).await.unwrap();
        assert!(readings.iter().all(|r| r.value > 0.0));
    }
}
