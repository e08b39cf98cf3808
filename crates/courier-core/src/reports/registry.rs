use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redcap::{ExportRequest, Record};
use polars::prelude::*;
use tracing::info;

use super::tracking::{first_value, BOARD_NOTE, ELIGIBILITY_COMPLETE, UNVERIFIED};
use super::{deliver, export, link_vars, Report, ReportContext};
use crate::config::{ConfigError, ReportSettings};
use crate::digest::{Cell, ColumnSpec, TableLayout, TableStyle};
use crate::frame::frame_from_rows;
use crate::pipeline::{Delivery, DigestPipeline};

pub const PRESCREENER_EVENT: &str = "Prescreeners";

/// Status fields in precedence order. The misspelled field exists in the
/// second registry project.
const STATUS_FIELDS: [&str; 3] = [
    "status_of_the_screening_vi_3",
    "recruitment_status",
    "recruitetment_status",
];

pub const COLUMNS: [&str; 11] = [
    "ID", "PID", "STUDY", "URG", "STATUS", "INITIALS", "PRID", "EID", "PDATE", "PTYPE", "PPAGE",
];

/// A prescreener instrument: completion field, date field, label and page.
struct PrescreenerForm {
    complete: &'static str,
    date: &'static str,
    label: &'static str,
    page: &'static str,
}

const PRESCREENER_FORMS: [PrescreenerForm; 3] = [
    PrescreenerForm {
        complete: "adni4_complete",
        date: "prescreener_date2_v2",
        label: "ADNI4",
        page: "adni4",
    },
    PrescreenerForm {
        complete: "trcds_complete",
        date: "date3_v2_v2",
        label: "TRC-DS",
        page: "trcds",
    },
    PrescreenerForm {
        complete: "abate_complete",
        date: "prescreener_date_abate",
        label: "ABATE",
        page: "abate",
    },
];

/// Unverified registry records across the registry projects.
pub struct RegistryReport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prescreener {
    pub instance: String,
    pub date: String,
    pub label: String,
    pub page: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub id: String,
    pub project: String,
    pub study: String,
    pub urg: String,
    pub status: String,
    pub initials: String,
    pub prescreener: Option<Prescreener>,
}

impl RegistryRow {
    fn cells(&self, event_id: &str) -> Vec<Option<String>> {
        let text = |value: &str| Some(value.to_string()).filter(|v| !v.is_empty());
        let prescreener = self.prescreener.as_ref();
        vec![
            text(&self.id),
            text(&self.project),
            text(&self.study),
            text(&self.urg),
            text(&self.status),
            text(&self.initials),
            prescreener.and_then(|p| text(&p.instance)),
            prescreener.and_then(|_| text(event_id)),
            prescreener.and_then(|p| text(&p.date)),
            prescreener.and_then(|p| text(&p.label)),
            prescreener.and_then(|p| text(&p.page)),
        ]
    }
}

/// Upper-cased first letters of first and last name; empty when either is
/// missing.
pub fn registry_initials(first: Option<&str>, last: Option<&str>) -> String {
    match (
        first.and_then(|name| name.trim().chars().next()),
        last.and_then(|name| name.trim().chars().next()),
    ) {
        (Some(f), Some(l)) => format!("{f}{l}").to_uppercase(),
        _ => String::new(),
    }
}

/// The most recent prescreener event of `id` whose form was saved.
pub fn latest_prescreener(id: &str, records: &[Record]) -> Option<Prescreener> {
    records
        .iter()
        .filter(|record| record.record == id && record.event.as_deref() == Some(PRESCREENER_EVENT))
        .filter_map(|record| {
            let form = PRESCREENER_FORMS
                .iter()
                .find(|form| record.value(form.complete).is_some())?;
            Some(Prescreener {
                instance: record
                    .repeat_instance
                    .map(|instance| instance.to_string())
                    .unwrap_or_default(),
                date: record.value(form.date).unwrap_or_default().to_string(),
                label: form.label.to_string(),
                page: form.page.to_string(),
            })
        })
        .last()
}

pub fn open_registry_rows(project: &str, records: &[Record]) -> Vec<RegistryRow> {
    records
        .iter()
        .filter(|record| record.value(ELIGIBILITY_COMPLETE) == Some(UNVERIFIED))
        .map(|record| RegistryRow {
            id: record.record.clone(),
            project: project.to_string(),
            study: record.value("study_name3").unwrap_or_default().to_string(),
            urg: record.value("urp_definition").unwrap_or_default().to_string(),
            status: first_value(record, STATUS_FIELDS)
                .unwrap_or("TBD")
                .to_string(),
            initials: registry_initials(record.value("name3_v2"), record.value("last_name_2")),
            prescreener: latest_prescreener(&record.record, records),
        })
        .collect()
}

pub fn registry_frame(rows: &[RegistryRow], event_id: &str) -> PolarsResult<DataFrame> {
    let cells: Vec<Vec<Option<String>>> = rows.iter().map(|row| row.cells(event_id)).collect();
    frame_from_rows(&COLUMNS, &cells)
}

#[async_trait]
impl Report for RegistryReport {
    fn name(&self) -> &'static str {
        "Registry"
    }

    fn description(&self) -> &'static str {
        "Unverified registry records by status"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        if settings.event_id.is_none() {
            return Err(ConfigError::Missing("reports.Registry.event_id".to_string()));
        }
        Ok(())
    }

    fn pipeline(&self, settings: &ReportSettings) -> Option<DigestPipeline> {
        let layout = TableLayout::new(vec![
            ColumnSpec::new(
                "Registry ID",
                Cell::Template(
                    r#"<a href="{link_base}/record_home.php?pid={PID}&arm=1&id={ID}" target="_blank">&nbsp;&nbsp;[{ID}] {INITIALS}&nbsp;&nbsp;</a>"#
                        .to_string(),
                ),
            ),
            ColumnSpec::field("Study", "STUDY"),
            ColumnSpec::field("Status", "STATUS"),
        ])
        .with_highlight("URG", "Yes")
        .with_trailing(Cell::Conditional {
            field: "PDATE",
            present: r#"<td><a href="{link_base}/index.php?pid={PID}&id={ID}&page={PPAGE}&event_id={EID}&instance={PRID}" target="_blank"> Prescreener: {PTYPE} {PDATE}</a></td>"#
                .to_string(),
            absent: String::new(),
        });

        Some(DigestPipeline {
            name: self.name(),
            snapshot_prefix: "registry",
            key: None,
            required_columns: COLUMNS.to_vec(),
            pending: lit(true),
            completion: None,
            layout,
            style: TableStyle::Left,
            subject: "CCM Registry {today}".to_string(),
            vars: link_vars(settings, None),
            delivery: Delivery::Board {
                title: "CCM Registry".to_string(),
                group_by: "STATUS",
                note: Some(BOARD_NOTE.to_string()),
            },
        })
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let pipeline = self
            .pipeline(&ctx.settings)
            .context("registry pipeline unavailable")?;
        let event_id = ctx.settings.event_id.clone().unwrap_or_default();

        let mut rows = Vec::new();
        for project in &ctx.settings.projects {
            let records = export(ctx, project, &ExportRequest::labels_with_form_status()).await?;
            let open = open_registry_rows(project, &records);
            info!(report = self.name(), project = %project, open = open.len(), "loaded registry records");
            rows.extend(open);
        }
        let table = registry_frame(&rows, &event_id)?;

        deliver(ctx, &pipeline, &table).await
    }
}
