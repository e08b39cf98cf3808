use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redcap::{ExportRequest, KeySpec};
use tracing::info;

use super::signoff::{awaiting_review, record_link};
use super::{audience, deliver, export_frame, link_vars, Report, ReportContext};
use crate::config::{ConfigError, ReportSettings};
use crate::digest::{Cell, ColumnSpec, TableLayout, TableStyle};
use crate::partition::CompletionStrategy;
use crate::pipeline::{Delivery, DigestPipeline};

const PAGE: &str = "mri_reviews";

/// Scans waiting for a clinical read.
pub struct ImageReadReport;

#[async_trait]
impl Report for ImageReadReport {
    fn name(&self) -> &'static str {
        "ImageRead"
    }

    fn description(&self) -> &'static str {
        "Pending MRI reads"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        if settings.audiences.len() != 1 {
            return Err(ConfigError::Invalid {
                field: "reports.ImageRead.audiences".to_string(),
                message: format!("expected one reader, found {}", settings.audiences.len()),
            });
        }
        Ok(())
    }

    fn pipeline(&self, settings: &ReportSettings) -> Option<DigestPipeline> {
        let reader = settings.audiences.first()?;
        let layout = TableLayout::new(vec![
            ColumnSpec::new("Record", record_link()),
            ColumnSpec::field("Study", "study"),
            ColumnSpec::field("ID", "id"),
            ColumnSpec::field("Coordinator", "c_name"),
            ColumnSpec::new(
                "Type",
                Cell::Conditional {
                    field: "links",
                    present: r#"<a href="{links}" target="_blank">SCAN</a>"#.to_string(),
                    absent: String::new(),
                },
            ),
            ColumnSpec::field("Due", "date_mri_report_needed_by"),
        ]);

        Some(DigestPipeline {
            name: self.name(),
            snapshot_prefix: "imageread",
            key: Some(KeySpec::Record),
            required_columns: vec![
                "ready_to_review",
                "ready_for_coordinator",
                "study",
                "id",
                "c_name",
                "links",
                "date_mri_report_needed_by",
            ],
            pending: awaiting_review(None),
            completion: Some(CompletionStrategy::MissingFromToday),
            layout,
            style: TableStyle::Centered,
            subject: "CCM Pending Image Read Report".to_string(),
            vars: link_vars(settings, Some(PAGE)),
            delivery: Delivery::Audiences {
                audiences: vec![audience(reader)],
                coordinator_digest: true,
            },
        })
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let project = ctx.settings.primary_project()?;
        let pipeline = self
            .pipeline(&ctx.settings)
            .context("image read report needs one reader audience")?;

        let table = export_frame(ctx, project, &ExportRequest::labels()).await?;
        info!(report = self.name(), rows = table.height(), "exported scan records");

        deliver(ctx, &pipeline, &table).await
    }
}
