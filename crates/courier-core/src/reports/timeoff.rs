use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redcap::{ExportRequest, KeySpec};
use polars::prelude::*;
use tracing::info;

use super::{audience, deliver, export_frame, link_vars, Report, ReportContext};
use crate::config::{ConfigError, ReportSettings};
use crate::digest::{Cell, ColumnSpec, TableLayout, TableStyle};
use crate::partition::CompletionStrategy;
use crate::pipeline::{Delivery, DigestPipeline};

const PAGE: &str = "ccm_time_off";
const NOTIFY_FIELD: &str = "notify_dr_newhouse";
const APPROVAL_FIELD: &str = "approval";

/// Time-off requests awaiting approval. Decisions made since the last run are
/// sent back to whoever asked.
pub struct TimeoffReport;

fn ready(approver: &str) -> Expr {
    col(NOTIFY_FIELD).eq(lit(format!("Ready to notify {approver}")))
}

#[async_trait]
impl Report for TimeoffReport {
    fn name(&self) -> &'static str {
        "Timeoff"
    }

    fn description(&self) -> &'static str {
        "Time-off approvals"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        if settings.event_id.is_none() {
            return Err(ConfigError::Missing("reports.Timeoff.event_id".to_string()));
        }
        if settings.audiences.len() != 1 {
            return Err(ConfigError::Invalid {
                field: "reports.Timeoff.audiences".to_string(),
                message: format!("expected one approver, found {}", settings.audiences.len()),
            });
        }
        Ok(())
    }

    fn pipeline(&self, settings: &ReportSettings) -> Option<DigestPipeline> {
        let approver = settings.audiences.first()?;

        let layout = TableLayout::new(vec![
            ColumnSpec::new(
                "Record",
                Cell::Template(
                    r#"<a href="{link_base}/index.php?pid={pid}&page={page}&id={record_id}&event_id={event_id}&instance={redcap_repeat_instance}" target="_blank">&nbsp;&nbsp;{record_id} ({redcap_repeat_instance})&nbsp;&nbsp;</a>"#
                        .to_string(),
                ),
            ),
            ColumnSpec::field("Name", "name"),
            ColumnSpec::field("Start Date", "time_off_start_date"),
            ColumnSpec::field("End Date", "time_off_end_date"),
        ]);
        let notice = TableLayout::new(vec![
            ColumnSpec::field("Name", "name"),
            ColumnSpec::field("Start Date", "time_off_start_date"),
            ColumnSpec::field("End Date", "time_off_end_date"),
            ColumnSpec::field("Status", APPROVAL_FIELD),
        ]);

        let ready = ready(&approver.label);
        Some(DigestPipeline {
            name: self.name(),
            snapshot_prefix: "timeoff",
            key: Some(KeySpec::RecordInstance),
            required_columns: vec![
                NOTIFY_FIELD,
                APPROVAL_FIELD,
                "name",
                "time_off_start_date",
                "time_off_end_date",
            ],
            pending: ready.clone().and(col(APPROVAL_FIELD).is_null()),
            completion: Some(CompletionStrategy::JoinWithYesterdayPending {
                decided: ready.and(col(APPROVAL_FIELD).is_not_null()),
            }),
            layout,
            style: TableStyle::Centered,
            subject: "PTO Requests {today}".to_string(),
            vars: link_vars(settings, Some(PAGE)),
            delivery: Delivery::Approval {
                approver: audience(approver),
                empty_subject: "No PTO Requests {today}".to_string(),
                notice,
                requester_column: "name",
                directory: settings.directory.clone(),
            },
        })
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let project = ctx.settings.primary_project()?;
        let pipeline = self
            .pipeline(&ctx.settings)
            .context("time-off report needs one approver audience")?;

        let table = export_frame(ctx, project, &ExportRequest::labels()).await?;
        info!(report = self.name(), rows = table.height(), "exported time-off requests");

        deliver(ctx, &pipeline, &table).await
    }
}
