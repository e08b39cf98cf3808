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

const PAGE: &str = "clinician_signature";

/// Documents waiting for a clinician's signature, one digest per clinician
/// plus a coordinator summary.
pub struct SignoffReport;

pub(crate) fn awaiting_review(extra: Option<&str>) -> Expr {
    let mut pending = col("ready_to_review")
        .eq(lit("Yes"))
        .and(col("ready_for_coordinator").is_null());
    if let Some(extra) = extra {
        pending = pending.and(col(extra).is_null());
    }
    pending
}

pub(crate) fn record_link() -> Cell {
    Cell::Template(
        r#"<a href="{link_base}/index.php?pid={pid}&id={record_id}&page={page}" target="_blank">&nbsp;&nbsp;{record_id}&nbsp;&nbsp;</a>"#
            .to_string(),
    )
}

#[async_trait]
impl Report for SignoffReport {
    fn name(&self) -> &'static str {
        "Signoff"
    }

    fn description(&self) -> &'static str {
        "Pending clinician signatures"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        if settings.audiences.is_empty() {
            return Err(ConfigError::Missing(
                "reports.Signoff.audiences (one per clinician)".to_string(),
            ));
        }
        Ok(())
    }

    fn pipeline(&self, settings: &ReportSettings) -> Option<DigestPipeline> {
        let layout = TableLayout::new(vec![
            ColumnSpec::new("Record", record_link()),
            ColumnSpec::field("Study", "study"),
            ColumnSpec::field("ID", "id"),
            ColumnSpec::field("Coordinator", "c_name"),
            ColumnSpec::new(
                "Type",
                Cell::Conditional {
                    field: "links",
                    present: r#"<a href="{links}" target="_blank">{file_type}</a>"#.to_string(),
                    absent: "{file_type}".to_string(),
                },
            ),
        ]);

        Some(DigestPipeline {
            name: self.name(),
            snapshot_prefix: "signature",
            key: Some(KeySpec::Record),
            required_columns: vec![
                "ready_to_review",
                "ready_for_coordinator",
                "ready_for_coordinator_2",
                "study",
                "id",
                "c_name",
                "file_type",
                "links",
            ],
            pending: awaiting_review(Some("ready_for_coordinator_2")),
            completion: Some(CompletionStrategy::MissingFromToday),
            layout,
            style: TableStyle::Centered,
            subject: "CCM Pending Signature Report".to_string(),
            vars: link_vars(settings, Some(PAGE)),
            delivery: Delivery::Audiences {
                audiences: settings.audiences.iter().map(audience).collect(),
                coordinator_digest: true,
            },
        })
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let project = ctx.settings.primary_project()?;
        let pipeline = self
            .pipeline(&ctx.settings)
            .context("signoff pipeline unavailable")?;

        let table = export_frame(ctx, project, &ExportRequest::labels()).await?;
        info!(report = self.name(), rows = table.height(), "exported signing records");

        deliver(ctx, &pipeline, &table).await
    }
}
