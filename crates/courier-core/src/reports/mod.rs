use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use courier_redcap::{ExportRequest, Record, RecordPlatform};
use once_cell::sync::Lazy;
use polars::prelude::*;

use crate::config::{AudienceSettings, ConfigError, ReportSettings};
use crate::frame::records_to_frame;
use crate::notify::Notifier;
use crate::pipeline::{Audience, DigestPipeline};
use crate::snapshot::SnapshotStore;

pub mod image_read;
pub mod progress;
pub mod registry;
pub mod signoff;
pub mod timeoff;
pub mod tracking;

pub use image_read::ImageReadReport;
pub use progress::ProgressReport;
pub use registry::RegistryReport;
pub use signoff::SignoffReport;
pub use timeoff::TimeoffReport;
pub use tracking::TrackingReport;

/// Everything one report run needs.
pub struct ReportContext {
    pub platform: Arc<dyn RecordPlatform>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: ReportSettings,
    /// Coordinator recipients from the report definition.
    pub recipients: Vec<String>,
    pub outdir: PathBuf,
    /// Previous run's file, when there is one.
    pub previous: Option<PathBuf>,
    pub now: NaiveDateTime,
}

impl ReportContext {
    /// Definition recipients, falling back to the configured list.
    pub fn coordinators(&self) -> Vec<String> {
        if self.recipients.is_empty() {
            self.settings.recipients.clone()
        } else {
            self.recipients.clone()
        }
    }
}

#[async_trait]
pub trait Report: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project().map(|_| ())
    }

    /// The digest pipeline behind this report, for reports that diff
    /// snapshots.
    fn pipeline(&self, _settings: &ReportSettings) -> Option<DigestPipeline> {
        None
    }

    /// Fetches, renders, sends, and returns the file to attach to the report
    /// event.
    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf>;
}

static REPORTS: Lazy<Vec<&'static dyn Report>> = Lazy::new(|| {
    vec![
        &SignoffReport as &dyn Report,
        &ImageReadReport as &dyn Report,
        &TimeoffReport as &dyn Report,
        &TrackingReport as &dyn Report,
        &RegistryReport as &dyn Report,
        &ProgressReport as &dyn Report,
    ]
});

pub fn all_reports() -> &'static [&'static dyn Report] {
    REPORTS.as_slice()
}

pub fn find_report(name: &str) -> Option<&'static dyn Report> {
    all_reports().iter().copied().find(|report| report.name() == name)
}

/// Link variables shared by every report's templates.
pub(crate) fn link_vars(settings: &ReportSettings, page: Option<&str>) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("link_base".to_string(), settings.link_base.trim_end_matches('/').to_string());
    if let Some(project) = settings.projects.first() {
        vars.insert("pid".to_string(), project.clone());
    }
    if let Some(linked) = &settings.linked_project {
        vars.insert("linked_pid".to_string(), linked.clone());
    }
    if let Some(event_id) = &settings.event_id {
        vars.insert("event_id".to_string(), event_id.clone());
    }
    if let Some(page) = page {
        vars.insert("page".to_string(), page.to_string());
    }
    vars
}

pub(crate) fn audience(settings: &AudienceSettings) -> Audience {
    Audience {
        label: settings.label.clone(),
        recipients: settings.emails.clone(),
        field: settings.field.clone(),
    }
}

pub(crate) async fn export(
    ctx: &ReportContext,
    project: &str,
    request: &ExportRequest,
) -> Result<Vec<Record>> {
    ctx.platform
        .export_records(project, request)
        .await
        .with_context(|| format!("failed to export records from project {project}"))
}

pub(crate) async fn export_frame(
    ctx: &ReportContext,
    project: &str,
    request: &ExportRequest,
) -> Result<DataFrame> {
    let records = export(ctx, project, request).await?;
    records_to_frame(&records).context("failed to tabulate exported records")
}

/// Runs `pipeline` over `table` with the context's previous file and
/// recipients, returning the written snapshot.
pub(crate) async fn deliver(
    ctx: &ReportContext,
    pipeline: &DigestPipeline,
    table: &DataFrame,
) -> Result<PathBuf> {
    let store = SnapshotStore::new(&ctx.outdir, pipeline.snapshot_prefix);
    pipeline
        .run(
            table,
            ctx.previous.as_deref(),
            &ctx.coordinators(),
            &store,
            ctx.notifier.as_ref(),
            ctx.now,
        )
        .await
        .with_context(|| format!("{} digest failed", pipeline.name))
}
