use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use courier_redcap::{ExportRequest, Record, RecordId, RECORD_ID_COLUMN};
use polars::prelude::*;
use tracing::{debug, info, warn};

use super::{deliver, export, link_vars, Report, ReportContext};
use crate::config::{ConfigError, ReportSettings};
use crate::digest::{Cell, ColumnSpec, TableLayout, TableStyle};
use crate::frame::frame_from_rows;
use crate::pipeline::{Delivery, DigestPipeline};

pub const ELIGIBILITY_COMPLETE: &str = "study_eligibility_information_complete";
pub const UNVERIFIED: &str = "Unverified";
pub const BOARD_NOTE: &str = "This report includes all records where Study Eligibility is Unverified.";
/// Prescreener dates older than this are flagged.
pub const STALE_AFTER_DAYS: i64 = 75;

const TRACKING_NAME_FIELDS: [&str; 4] = ["name", "name2", "name3", "participant_name"];

pub const COLUMNS: [&str; 10] = [
    "ID",
    "STUDY",
    "PRESCREEN",
    "URG",
    "STATUS",
    "NOTES",
    "COMPLETE",
    "INITIALS",
    "PRESCREENERSID",
    "PRESCREENERSDATE",
];

/// Open recruitment records, grouped by status and linked to their
/// prescreener.
pub struct TrackingReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRow {
    pub id: String,
    pub study: String,
    pub prescreen: String,
    pub urg: String,
    pub status: String,
    pub notes: String,
    pub initials: String,
    pub prescreener_id: String,
    pub prescreener_date: String,
}

impl TrackingRow {
    fn new(id: String) -> Self {
        Self {
            id,
            study: String::new(),
            prescreen: String::new(),
            urg: String::new(),
            status: "UNKNOWN".to_string(),
            notes: String::new(),
            initials: String::new(),
            prescreener_id: String::new(),
            prescreener_date: String::new(),
        }
    }

    fn cells(&self) -> Vec<Option<String>> {
        [
            &self.id,
            &self.study,
            &self.prescreen,
            &self.urg,
            &self.status,
            &self.notes,
            &String::new(),
            &self.initials,
            &self.prescreener_id,
            &self.prescreener_date,
        ]
        .into_iter()
        .map(|value| Some(value.clone()).filter(|v| !v.is_empty()))
        .collect()
    }
}

/// First non-blank value among `fields`, trimmed.
pub(crate) fn first_value<'a, I>(record: &'a Record, fields: I) -> Option<&'a str>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fields
        .into_iter()
        .filter_map(|field| record.value(field.as_ref()))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// First letter of the first two words.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .collect()
}

/// Ids whose eligibility form is unverified on any row, or was never saved on
/// any row, in numeric order.
pub fn open_record_ids(records: &[Record]) -> Vec<String> {
    let mut all = BTreeSet::new();
    let mut saved = BTreeSet::new();
    let mut unverified = BTreeSet::new();
    for record in records {
        let Some(id) = record.record_id() else {
            warn!(record = %record.record, "skipping tracking row with non-integer id");
            continue;
        };
        all.insert(id);
        match record.value(ELIGIBILITY_COMPLETE) {
            Some(UNVERIFIED) => {
                saved.insert(id);
                unverified.insert(id);
            }
            Some(_) => {
                saved.insert(id);
            }
            None => {}
        }
    }
    all.into_iter()
        .filter(|id| unverified.contains(id) || !saved.contains(id))
        .map(|id: RecordId| id.to_string())
        .collect()
}

/// Folds every row of one record (repeat instances included) into a single
/// board row; later rows win.
fn consolidate(id: &str, records: &[Record]) -> TrackingRow {
    let mut row = TrackingRow::new(id.to_string());
    for record in records
        .iter()
        .filter(|record| record.record_id().map(|rid| rid.to_string()).as_deref() == Some(id))
    {
        for (field, value) in &record.fields {
            if value.trim().is_empty() {
                continue;
            }
            let slot = match field.as_str() {
                "which_study" => &mut row.study,
                "are_they_eligbile_for_that" => &mut row.prescreen,
                "urp_definition" => &mut row.urg,
                "enrollment_status1" => &mut row.status,
                "coordinator_notes" => &mut row.notes,
                _ => continue,
            };
            *slot = value.clone();
        }
    }
    row
}

/// Participant name per tracking id; the last row naming a record wins.
pub fn tracking_names(records: &[Record]) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for record in records {
        let (Some(id), Some(name)) = (record.record_id(), first_value(record, TRACKING_NAME_FIELDS)) else {
            continue;
        };
        if let Some(previous) = names.insert(id.to_string(), name.to_string()) {
            if previous != name {
                debug!(record = %id, "tracking record names differ, using latest");
            }
        }
    }
    names
}

fn is_name_field(field: &str) -> bool {
    field.starts_with("name_v2") || field.starts_with("name9")
}

fn is_date_field(field: &str) -> bool {
    field.starts_with("prescreener_date") || field.starts_with("date3_v2")
}

/// Prescreener id by participant name, and prescreening date by prescreener
/// id. Later records win.
pub fn prescreener_index(
    records: &[Record],
    field_names: &[String],
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let name_fields: Vec<&str> = field_names
        .iter()
        .map(String::as_str)
        .filter(|field| is_name_field(field))
        .collect();
    let date_fields: Vec<&str> = field_names
        .iter()
        .map(String::as_str)
        .filter(|field| is_date_field(field))
        .collect();

    let mut by_name = BTreeMap::new();
    let mut dates = BTreeMap::new();
    for record in records {
        let id = record.record.trim().to_string();
        if let Some(name) = first_value(record, &name_fields) {
            by_name.insert(name.to_string(), id.clone());
        }
        if let Some(date) = first_value(record, &date_fields) {
            dates.insert(id, date.to_string());
        }
    }
    (by_name, dates)
}

/// Dates older than the stale threshold are wrapped in red.
pub fn flag_stale(date: &str, today: NaiveDate) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) if (today - parsed).num_days() > STALE_AFTER_DAYS => {
            format!(r#"<span style="color:red">{date}</span>"#)
        }
        _ => date.to_string(),
    }
}

/// The board table: one row per open tracking record, linked to the
/// prescreener with the same participant name.
pub fn open_tracking_rows(
    tracking: &[Record],
    prescreeners: &[Record],
    prescreener_fields: &[String],
    today: NaiveDate,
) -> Vec<TrackingRow> {
    let names = tracking_names(tracking);
    let (by_name, dates) = prescreener_index(prescreeners, prescreener_fields);

    open_record_ids(tracking)
        .iter()
        .map(|id| {
            let mut row = consolidate(id, tracking);
            if let Some(name) = names.get(id) {
                row.initials = initials(name);
                row.prescreener_id = by_name
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| "NotFound".to_string());
                row.prescreener_date = dates
                    .get(&row.prescreener_id)
                    .map(|date| flag_stale(date, today))
                    .unwrap_or_default();
            }
            row
        })
        .collect()
}

pub fn tracking_frame(rows: &[TrackingRow]) -> PolarsResult<DataFrame> {
    let cells: Vec<Vec<Option<String>>> = rows.iter().map(TrackingRow::cells).collect();
    frame_from_rows(&COLUMNS, &cells)
}

#[async_trait]
impl Report for TrackingReport {
    fn name(&self) -> &'static str {
        "Tracking"
    }

    fn description(&self) -> &'static str {
        "Unverified recruitment records by status"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        settings.linked_project()?;
        Ok(())
    }

    fn pipeline(&self, settings: &ReportSettings) -> Option<DigestPipeline> {
        let layout = TableLayout::new(vec![
            ColumnSpec::new(
                "Tracking ID",
                Cell::Template(
                    r#"<a href="{link_base}/record_home.php?pid={pid}&arm=1&id={ID}" target="_blank">&nbsp;&nbsp;[{ID}] {INITIALS}&nbsp;&nbsp;</a>"#
                        .to_string(),
                ),
            ),
            ColumnSpec::field("Study", "STUDY"),
            ColumnSpec::field("Status", "STATUS"),
            ColumnSpec::new(
                "Prescreeners ID",
                Cell::Template(
                    r#"<a href="{link_base}/record_home.php?pid={linked_pid}&arm=2&id={PRESCREENERSID}" target="_blank">&nbsp;&nbsp;[{PRESCREENERSID}]&nbsp;&nbsp;{PRESCREENERSDATE}</a>"#
                        .to_string(),
                ),
            ),
        ])
        .with_highlight("URG", "Yes");

        Some(DigestPipeline {
            name: self.name(),
            snapshot_prefix: "tracking",
            key: None,
            required_columns: COLUMNS.to_vec(),
            pending: lit(true),
            completion: None,
            layout,
            style: TableStyle::Left,
            subject: "CCM Tracking {today}".to_string(),
            vars: link_vars(settings, None),
            delivery: Delivery::Board {
                title: "CCM Tracking".to_string(),
                group_by: "STATUS",
                note: Some(BOARD_NOTE.to_string()),
            },
        })
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let project = ctx.settings.primary_project()?;
        let linked = ctx.settings.linked_project()?;
        let pipeline = self
            .pipeline(&ctx.settings)
            .context("tracking pipeline unavailable")?;

        let tracking = export(ctx, project, &ExportRequest::labels_with_form_status()).await?;
        let prescreener_fields = ctx
            .platform
            .field_names(linked)
            .await
            .with_context(|| format!("failed to list fields of project {linked}"))?;
        let request = ExportRequest::raw().fields(
            std::iter::once(RECORD_ID_COLUMN.to_string()).chain(
                prescreener_fields
                    .iter()
                    .filter(|field| is_name_field(field) || is_date_field(field))
                    .cloned(),
            ),
        );
        let prescreeners = export(ctx, linked, &request).await?;

        let rows = open_tracking_rows(&tracking, &prescreeners, &prescreener_fields, ctx.now.date());
        info!(report = self.name(), open = rows.len(), "consolidated tracking records");
        let table = tracking_frame(&rows)?;

        deliver(ctx, &pipeline, &table).await
    }
}
