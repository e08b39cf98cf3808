use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use courier_redcap::{ExportRequest, Record, RecordId, RECORD_ID_COLUMN};
use tracing::{info, warn};

use super::tracking::first_value;
use super::{export, Report, ReportContext};
use crate::classify::{impairment_label, standardize_study, urg_label, EnrollmentStatus};
use crate::config::{ConfigError, ReportSettings};
use crate::notify::{Attachment, Email};
use crate::pdf::SummaryDocument;

pub const PDF_FILE_NAME: &str = "CCM_tracking_monthly.pdf";
pub const TITLE: &str = "CCM Tracking Monthly Report";
const SUBJECT: &str = "CCM Tracking Progress Report";
const URG: &str = "URG";

const STUDY_FIELD: &str = "name_of_the_study_v2_v2";
const ALT_STUDY_FIELDS: [&str; 4] = [
    "which_study",
    "if_yes_what_study_are_they",
    "what_study_are_they_inters",
    "if_yes_what_study",
];
const DATE_FIELDS: [&str; 2] = ["date_given", "when_is_the_memory_screeni_v2"];
const ASSESSMENT_FIELDS: [&str; 3] = [
    "what_memory_assessment_did_v2___1",
    "what_memory_assessment_did_v2___2",
    "what_memory_assessment_did_v2___3",
];

const DESCRIPTION: &str = "This report summarizes CCM Tracking as a set of tables.\n\
Data are pulled and merged from multiple CCM Tracking projects.";
const OUTLINE: &str = "-Counts by study and status\n    *all\n    *last month\n\
-Memory screenings\n    *all\n    *last month\n-Project inventory";
const STATUSES: &str = "Randomized\nLost to followup\nScreen Fail\nall others = In Progress";
const URG_FOOTNOTE: &str = "Total count includes URG count, Total Count(URG Count)";

/// Monthly recruitment summary rendered to PDF and mailed as an attachment.
pub struct ProgressReport;

/// One tracking record after consolidation and remapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub id: String,
    pub study: String,
    pub status: EnrollmentStatus,
    pub urg: String,
    /// Latest `%Y-%m-%d` date seen on the record; empty when none.
    pub date: String,
}

/// One memory assessment; a screening with several assessments yields
/// several rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub id: String,
    pub date: String,
    pub assessment: String,
    pub impairment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCount {
    pub project: String,
    pub title: String,
    pub records: usize,
}

/// First and last day of the calendar month before `today`.
pub fn previous_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = today - Days::new(u64::from(today.day0()));
    let end = first_of_month - Days::new(1);
    let start = end - Days::new(u64::from(end.day0()));
    (start, end)
}

fn within(date: &str, (start, end): (NaiveDate, NaiveDate)) -> bool {
    let start = start.format("%Y-%m-%d").to_string();
    let end = end.format("%Y-%m-%d").to_string();
    !date.is_empty() && date >= start.as_str() && date <= end.as_str()
}

/// Consolidates every row of each record into one `ProgressRow`, in numeric
/// record order. Rows without an integer id are dropped.
pub fn progress_rows(records: &[Record]) -> Vec<ProgressRow> {
    let mut grouped: BTreeMap<RecordId, Vec<&Record>> = BTreeMap::new();
    for record in records {
        let Some(id) = RecordId::parse(&record.record) else {
            continue;
        };
        grouped.entry(id).or_default().push(record);
    }

    grouped
        .into_iter()
        .map(|(id, rows)| {
            let mut study = None;
            let mut alt_study = None;
            let mut status = None;
            let mut urg = None;
            let mut date = String::new();
            for row in rows {
                if let Some(value) = row.value(STUDY_FIELD) {
                    study = Some(value);
                }
                if alt_study.is_none() {
                    alt_study = first_value(row, ALT_STUDY_FIELDS);
                }
                if let Some(value) = row.value("enrollment_status1") {
                    status = Some(value);
                }
                if let Some(value) = row.value("urp_definition") {
                    urg = Some(value);
                }
                for field in DATE_FIELDS {
                    if let Some(value) = row.value(field) {
                        if value > date.as_str() {
                            date = value.to_string();
                        }
                    }
                }
            }
            ProgressRow {
                id: id.to_string(),
                study: standardize_study(study.or(alt_study).unwrap_or_default()),
                status: EnrollmentStatus::classify(status),
                urg: urg_label(urg),
                date,
            }
        })
        .collect()
}

pub fn memory_rows(records: &[Record]) -> Vec<MemoryRow> {
    let mut rows = Vec::new();
    for record in records {
        if record.value("memory_assessment_score_v2").is_none() {
            continue;
        }
        for field in ASSESSMENT_FIELDS {
            let Some(assessment) = record.value(field) else {
                continue;
            };
            rows.push(MemoryRow {
                id: record.record.clone(),
                date: record
                    .value("when_is_the_memory_screeni_v2")
                    .unwrap_or_default()
                    .to_string(),
                assessment: assessment.to_string(),
                impairment: impairment_label(record.value("impaired_v2")),
            });
        }
    }
    rows
}

fn study_label(study: &str) -> &str {
    if study.is_empty() {
        "blank"
    } else {
        study
    }
}

/// Study-by-status grid. Cells read `count(urg)` when any of the count is
/// URG. Columns come from `statuses` so the all-time and monthly tables line
/// up; studies with no rows in range are left out.
pub fn count_grid(rows: &[&ProgressRow], statuses: &[EnrollmentStatus]) -> Vec<Vec<String>> {
    let mut grid = Vec::new();
    let mut header = vec![String::new()];
    header.extend(statuses.iter().map(|status| status.label().to_string()));
    header.push("TOTAL".to_string());
    grid.push(header);

    let studies: BTreeSet<&str> = rows.iter().map(|row| row.study.as_str()).collect();
    for study in studies {
        let members: Vec<&&ProgressRow> = rows.iter().filter(|row| row.study == study).collect();
        let mut line = vec![study_label(study).to_string()];
        for status in statuses {
            let count = members.iter().filter(|row| row.status == *status).count();
            let urg = members
                .iter()
                .filter(|row| row.status == *status && row.urg == URG)
                .count();
            line.push(if urg > 0 {
                format!("{count}({urg})")
            } else {
                count.to_string()
            });
        }
        line.push(members.len().to_string());
        grid.push(line);
    }

    let mut totals = vec!["TOTAL".to_string()];
    for status in statuses {
        totals.push(rows.iter().filter(|row| row.status == *status).count().to_string());
    }
    totals.push(rows.len().to_string());
    grid.push(totals);
    grid
}

/// Assessment-by-impairment grid.
pub fn memory_grid(rows: &[&MemoryRow]) -> Vec<Vec<String>> {
    let impairments: BTreeSet<&str> = rows.iter().map(|row| row.impairment.as_str()).collect();
    let assessments: BTreeSet<&str> = rows.iter().map(|row| row.assessment.as_str()).collect();

    let mut grid = Vec::new();
    let mut header = vec![String::new()];
    header.extend(impairments.iter().map(|label| label.to_string()));
    header.push("TOTAL".to_string());
    grid.push(header);

    for assessment in &assessments {
        let members: Vec<&&MemoryRow> = rows
            .iter()
            .filter(|row| row.assessment == *assessment)
            .collect();
        let mut line = vec![assessment.to_string()];
        for impairment in &impairments {
            line.push(
                members
                    .iter()
                    .filter(|row| row.impairment == *impairment)
                    .count()
                    .to_string(),
            );
        }
        line.push(members.len().to_string());
        grid.push(line);
    }

    let mut totals = vec!["TOTAL".to_string()];
    for impairment in &impairments {
        totals.push(
            rows.iter()
                .filter(|row| row.impairment == *impairment)
                .count()
                .to_string(),
        );
    }
    totals.push(rows.len().to_string());
    grid.push(totals);
    grid
}

/// Lays out the whole summary: title page, status counts, memory screenings
/// and the project inventory.
pub fn summary_document(
    tracking: &[ProgressRow],
    memory: &[MemoryRow],
    inventory: &[ProjectCount],
    now: NaiveDateTime,
) -> SummaryDocument {
    let today = now.date();
    let range = previous_month(today);
    let month = range.0.format("%B").to_string();

    let mut doc = SummaryDocument::new(TITLE);
    doc.page()
        .heading(TITLE)
        .text(now.format("%B %Y").to_string())
        .blank()
        .text(DESCRIPTION)
        .blank()
        .heading("Outline")
        .text(OUTLINE)
        .blank()
        .heading("Statuses")
        .text(STATUSES);

    let mut statuses: Vec<EnrollmentStatus> = tracking
        .iter()
        .map(|row| row.status)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    statuses.sort_by_key(|status| status.label());

    let all: Vec<&ProgressRow> = tracking.iter().collect();
    let recent: Vec<&ProgressRow> = tracking.iter().filter(|row| within(&row.date, range)).collect();
    doc.page()
        .heading("All Counts (URG)")
        .grid(&count_grid(&all, &statuses))
        .text(URG_FOOTNOTE)
        .blank()
        .heading(format!("{month} Counts (URG)"))
        .grid(&count_grid(&recent, &statuses))
        .text(URG_FOOTNOTE);

    let all_memory: Vec<&MemoryRow> = memory.iter().collect();
    let recent_memory: Vec<&MemoryRow> = memory.iter().filter(|row| within(&row.date, range)).collect();
    doc.page()
        .heading("All Memory Screenings")
        .grid(&memory_grid(&all_memory))
        .blank()
        .heading(format!("{month} Memory Screenings"))
        .grid(&memory_grid(&recent_memory));

    let inventory_page = doc.page();
    inventory_page.text(format!("{today} Created by courier")).blank();
    let mut total = 0;
    for entry in inventory {
        total += entry.records;
        inventory_page.text(format!(
            "{:>6}  {:<10} {}",
            entry.records, entry.project, entry.title
        ));
    }
    inventory_page.blank().text(format!("Total={total}"));

    doc
}

#[async_trait]
impl Report for ProgressReport {
    fn name(&self) -> &'static str {
        "Progress"
    }

    fn description(&self) -> &'static str {
        "Monthly recruitment summary (PDF)"
    }

    fn check_settings(&self, settings: &ReportSettings) -> Result<(), ConfigError> {
        settings.primary_project()?;
        Ok(())
    }

    async fn generate(&self, ctx: &ReportContext) -> Result<PathBuf> {
        let primary = ctx.settings.primary_project()?;

        let mut tracking = Vec::new();
        let mut memory = Vec::new();
        for project in &ctx.settings.projects {
            let records = export(ctx, project, &ExportRequest::labels_with_form_status()).await?;
            tracking.extend(progress_rows(&records));
            if project == primary {
                memory = memory_rows(&records);
            }
        }
        info!(
            report = self.name(),
            tracking = tracking.len(),
            memory = memory.len(),
            "consolidated progress records"
        );

        let mut inventory = Vec::new();
        for project in ctx.settings.inventory() {
            let ids = export(ctx, project, &ExportRequest::raw().fields([RECORD_ID_COLUMN])).await?;
            let records = ids
                .iter()
                .map(|record| record.record.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            let title = ctx
                .platform
                .project_title(project)
                .await
                .with_context(|| format!("failed to read title of project {project}"))?
                .unwrap_or_default();
            inventory.push(ProjectCount {
                project: project.clone(),
                title,
                records,
            });
        }

        let bytes = summary_document(&tracking, &memory, &inventory, ctx.now)
            .render()
            .context("failed to render progress summary")?;
        let path = ctx.outdir.join(PDF_FILE_NAME);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let recipients = ctx.coordinators();
        if recipients.is_empty() {
            warn!(report = self.name(), "no recipients, summary not sent");
            return Ok(path);
        }
        let month = ctx.now.format("%B %Y");
        let email = Email {
            to: recipients,
            subject: SUBJECT.to_string(),
            html: format!("<!DOCTYPE html>\n<html><body>\n<p>{TITLE}, {month}. The summary is attached.\n</body></html>\n"),
            text: format!("{TITLE}, {month}. The summary is attached."),
            attachment: Some(Attachment::from_path(&path)?),
        };
        ctx.notifier
            .send(&email)
            .await
            .context("failed to send progress summary")?;

        Ok(path)
    }
}
