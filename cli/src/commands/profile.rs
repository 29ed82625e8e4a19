use anyhow::Result;

use glyco_core::models::{DeviceVendor, GlucoseInterval, UserGlucoseProfile};
use glyco_core::service::GlucoseService;

use super::helpers::print_json;

fn print_profile(profile: &UserGlucoseProfile) {
    let status = if profile.active { "active" } else { "inactive" };
    println!(
        "User {}: interval {}, device {}, {status}",
        profile.user_id,
        profile.glucose_interval,
        profile.device.as_str()
    );
}

pub(crate) fn cmd_profile_set(
    svc: &GlucoseService,
    user_id: i64,
    interval: u8,
    device: &str,
    inactive: bool,
    json: bool,
) -> Result<()> {
    let profile = UserGlucoseProfile {
        user_id,
        glucose_interval: GlucoseInterval::try_from(interval)?,
        device: device.parse::<DeviceVendor>()?,
        active: !inactive,
    };
    let saved = svc.set_profile(&profile)?;

    if json {
        return print_json(&saved);
    }
    print_profile(&saved);
    Ok(())
}

pub(crate) fn cmd_profile_show(svc: &GlucoseService, user_id: i64, json: bool) -> Result<()> {
    let profile = svc.get_profile(user_id)?;
    if json {
        return print_json(&profile);
    }
    print_profile(&profile);
    Ok(())
}
