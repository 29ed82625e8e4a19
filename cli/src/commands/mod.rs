mod device;
mod export;
mod helpers;
mod jobs;
mod log;
mod profile;
mod summary;

pub(crate) use device::{cmd_device_add, cmd_device_show, cmd_vendor_set};
pub(crate) use export::{cmd_export_quick, cmd_export_table, cmd_export_text};
pub(crate) use helpers::WindowArgs;
pub(crate) use jobs::cmd_jobs_run;
pub(crate) use log::{cmd_exercise, cmd_log};
pub(crate) use profile::{cmd_profile_set, cmd_profile_show};
pub(crate) use summary::{cmd_cgm, cmd_overview, cmd_quick, cmd_trend};
