use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use glyco_core::models::{DeviceSample, DeviceVendor, VendorCredentials, validate_glucose_value};
use glyco_core::service::GlucoseService;

use super::helpers::{fmt_glucose, parse_datetime, parse_window, print_json};

pub(crate) fn cmd_device_add(
    svc: &GlucoseService,
    user_id: i64,
    value: f64,
    at: &str,
    json: bool,
) -> Result<()> {
    validate_glucose_value(value)?;
    let sample = DeviceSample::at(parse_datetime(at)?, value);
    let label = sample.time.clone();
    let written = svc.add_device_history(user_id, vec![sample])?;

    if json {
        return print_json(&serde_json::json!({ "userId": user_id, "written": written }));
    }
    if written == 0 {
        println!("Sample at {label} already recorded for user {user_id}");
    } else {
        println!("Recorded {} at {label} for user {user_id}", fmt_glucose(Some(value)));
    }
    Ok(())
}

pub(crate) fn cmd_device_show(
    svc: &GlucoseService,
    user_id: i64,
    from: Option<String>,
    to: Option<String>,
    days: u32,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct SampleRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "mg/dL")]
        value: String,
    }

    let window = parse_window(from, to, days)?;
    let graph = svc.device_graph(user_id, &window)?;

    if json {
        return print_json(&graph);
    }

    if graph.is_empty() {
        eprintln!("No device history for user {user_id} in this window");
        process::exit(2);
    }

    let rows: Vec<SampleRow> = graph
        .iter()
        .flat_map(|day| {
            day.samples.iter().map(|s| SampleRow {
                date: day.date.clone(),
                time: s.time.clone(),
                value: fmt_glucose(Some(s.value)),
            })
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_vendor_set(
    svc: &GlucoseService,
    user_id: i64,
    vendor: &str,
    token: String,
    account_id: Option<String>,
    json: bool,
) -> Result<()> {
    let credentials = VendorCredentials {
        vendor: vendor.parse::<DeviceVendor>()?,
        access_token: token,
        account_id,
    };
    svc.set_vendor_credentials(user_id, &credentials)?;

    if json {
        return print_json(&serde_json::json!({
            "userId": user_id,
            "vendor": credentials.vendor,
        }));
    }
    println!(
        "Saved {} credentials for user {user_id}",
        credentials.vendor.as_str()
    );
    Ok(())
}
