use anyhow::Result;
use chrono::Local;
use std::sync::Arc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use glyco_core::service::GlucoseService;

use crate::config::Settings;
use crate::scheduler::{job_context, run_once, select_jobs};
use crate::vendor::VendorRouter;

use super::helpers::print_json;

pub(crate) async fn cmd_jobs_run(
    svc: &GlucoseService,
    settings: &Settings,
    name: &str,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ReportRow {
        #[tabled(rename = "Job")]
        job: String,
        #[tabled(rename = "Processed")]
        processed: usize,
        #[tabled(rename = "Updated")]
        updated: usize,
        #[tabled(rename = "Failed")]
        failed: usize,
    }

    let client = Arc::new(VendorRouter::new(settings)?);
    let jobs = select_jobs(name, client)?;
    let ctx = job_context(svc.store(), settings, Local::now().naive_local());
    let reports = run_once(&jobs, &ctx).await?;

    if json {
        return print_json(&reports);
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            job: r.job.to_string(),
            processed: r.processed,
            updated: r.updated,
            failed: r.failed,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
