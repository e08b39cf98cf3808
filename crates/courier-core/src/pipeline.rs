use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use courier_redcap::KeySpec;
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::digest::{DigestDocument, TableLayout, TableStyle};
use crate::frame::{ensure_columns, filter, rows};
use crate::notify::{Email, Notifier, NotifyError};
use crate::partition::{partition, CompletionStrategy};
use crate::snapshot::{load_pending, load_snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("pipeline {0} has no diff key")]
    MissingKey(&'static str),
    #[error("{failed} of {total} emails failed for {pipeline}")]
    Delivery {
        pipeline: &'static str,
        failed: usize,
        total: usize,
    },
}

/// Checkbox value meaning "selected" in label exports.
pub const CHECKED: &str = "Checked";

/// A named set of readers for part of the pending table.
#[derive(Debug, Clone)]
pub struct Audience {
    pub label: String,
    pub recipients: Vec<String>,
    /// Checkbox column selecting this audience's rows; all pending rows when
    /// absent.
    pub field: Option<String>,
}

impl Audience {
    fn filter(&self) -> Option<Expr> {
        self.field
            .as_deref()
            .map(|field| col(field).eq(lit(CHECKED)).fill_null(lit(false)))
    }
}

#[derive(Debug, Clone)]
pub enum Delivery {
    /// One pending digest per audience. The coordinator digest repeats every
    /// audience section after the recently-completed section.
    Audiences {
        audiences: Vec<Audience>,
        coordinator_digest: bool,
    },
    /// One digest for the approver, then a notice per recent decision sent to
    /// the requester named in `requester_column`.
    Approval {
        approver: Audience,
        empty_subject: String,
        notice: TableLayout,
        requester_column: &'static str,
        directory: BTreeMap<String, String>,
    },
    /// Pending rows grouped by `group_by`, sent to the coordinators.
    Board {
        title: String,
        group_by: &'static str,
        note: Option<String>,
    },
}

/// Fetch-independent part of a digest report: partition, diff, render,
/// persist, notify.
#[derive(Debug, Clone)]
pub struct DigestPipeline {
    pub name: &'static str,
    pub snapshot_prefix: &'static str,
    /// Diff and uniqueness key; boards have none.
    pub key: Option<KeySpec>,
    pub required_columns: Vec<&'static str>,
    pub pending: Expr,
    pub completion: Option<CompletionStrategy>,
    pub layout: TableLayout,
    pub style: TableStyle,
    /// `{today}` is replaced by the run date.
    pub subject: String,
    pub vars: BTreeMap<String, String>,
    pub delivery: Delivery,
}

#[derive(Debug, Clone)]
pub struct DigestPlan {
    pub table: DataFrame,
    pub pending: DataFrame,
    pub completed: Option<DataFrame>,
    pub emails: Vec<Email>,
}

impl DigestPipeline {
    fn subject_for(&self, template: &str, now: NaiveDateTime) -> String {
        template.replace("{today}", &now.format("%Y-%m-%d").to_string())
    }

    fn email(&self, to: Vec<String>, subject: String, doc: &DigestDocument) -> Email {
        Email {
            to,
            subject,
            html: doc.render(self.style),
            text: doc.plain_text(),
            attachment: None,
        }
    }

    /// Required columns plus every audience's checkbox column, so an empty
    /// export still filters cleanly.
    fn columns(&self) -> Vec<&str> {
        let audiences: Vec<&Audience> = match &self.delivery {
            Delivery::Audiences { audiences, .. } => audiences.iter().collect(),
            Delivery::Approval { approver, .. } => vec![approver],
            Delivery::Board { .. } => Vec::new(),
        };
        let mut columns: Vec<&str> = self.required_columns.clone();
        for field in audiences.into_iter().filter_map(|a| a.field.as_deref()) {
            if !columns.contains(&field) {
                columns.push(field);
            }
        }
        columns
    }

    fn audience_rows(&self, pending: &DataFrame, audience: &Audience) -> PolarsResult<DataFrame> {
        match audience.filter() {
            Some(expr) => filter(pending, expr),
            None => Ok(pending.clone()),
        }
    }

    /// Everything short of side effects: which rows are pending, which were
    /// completed since `previous`, and the emails that would go out.
    pub fn plan(
        &self,
        today: &DataFrame,
        previous: Option<&Path>,
        coordinators: &[String],
        now: NaiveDateTime,
    ) -> Result<DigestPlan, PipelineError> {
        let table = ensure_columns(today, &self.columns())?;
        let split = partition(&table, self.pending.clone())?;
        let pending = split.pending;

        let completed = match (&self.completion, self.key) {
            (Some(strategy), Some(key)) => {
                let yesterday =
                    load_pending(previous, key, &self.required_columns, self.pending.clone())?;
                let completed =
                    strategy.completions(&table, &pending, yesterday.as_ref(), key)?;
                debug!(
                    pipeline = self.name,
                    strategy = strategy.name(),
                    completed = ?completed.as_ref().map(DataFrame::height),
                    "diffed against previous snapshot"
                );
                completed
            }
            _ => None,
        };

        let subject = self.subject_for(&self.subject, now);
        let mut emails = Vec::new();

        match &self.delivery {
            Delivery::Audiences {
                audiences,
                coordinator_digest,
            } => {
                let mut sections = Vec::with_capacity(audiences.len());
                for audience in audiences {
                    let assigned = self.audience_rows(&pending, audience)?;
                    let mut doc = DigestDocument::new(self.vars.clone());
                    doc.pending_section(&audience.label, &self.layout, &assigned);
                    if audience.recipients.is_empty() {
                        warn!(pipeline = self.name, audience = %audience.label, "audience has no recipients");
                    } else {
                        emails.push(self.email(audience.recipients.clone(), subject.clone(), &doc));
                    }
                    sections.push((audience.label.clone(), assigned));
                }

                if *coordinator_digest {
                    let mut doc = DigestDocument::new(self.vars.clone());
                    doc.completed_section(&self.layout, completed.as_ref());
                    for (label, assigned) in &sections {
                        doc.pending_section(label, &self.layout, assigned);
                    }
                    push_coordinator_email(self, &mut emails, coordinators, subject, &doc);
                }
            }
            Delivery::Approval {
                approver,
                empty_subject,
                notice,
                requester_column,
                directory,
            } => {
                let assigned = self.audience_rows(&pending, approver)?;
                let mut doc = DigestDocument::new(self.vars.clone());
                doc.pending_section(&approver.label, &self.layout, &assigned);
                let approver_subject = if assigned.height() == 0 {
                    self.subject_for(empty_subject, now)
                } else {
                    subject.clone()
                };
                if approver.recipients.is_empty() {
                    warn!(pipeline = self.name, approver = %approver.label, "approver has no address");
                } else {
                    emails.push(self.email(approver.recipients.clone(), approver_subject, &doc));
                }

                if let Some(decided) = completed.as_ref() {
                    for row in rows(decided) {
                        let requester = row.get(requester_column).unwrap_or_default();
                        let Some(address) = directory.get(&requester) else {
                            warn!(pipeline = self.name, requester = %requester, "no address for requester, skipping notice");
                            continue;
                        };
                        let mut doc = DigestDocument::new(self.vars.clone());
                        doc.notice(notice, row);
                        emails.push(self.email(vec![address.clone()], subject.clone(), &doc));
                    }
                }
            }
            Delivery::Board {
                title,
                group_by,
                note,
            } => {
                let mut doc = DigestDocument::new(self.vars.clone());
                doc.board(title, group_by, &self.layout, &pending);
                if let Some(note) = note {
                    doc.note(note);
                }
                push_coordinator_email(self, &mut emails, coordinators, subject, &doc);
            }
        }

        Ok(DigestPlan {
            table,
            pending,
            completed,
            emails,
        })
    }

    /// Persists today's full table, then sends every planned email. A failed
    /// send does not stop the others; the run is reported failed afterwards.
    pub async fn run(
        &self,
        today: &DataFrame,
        previous: Option<&Path>,
        coordinators: &[String],
        store: &SnapshotStore,
        notifier: &dyn Notifier,
        now: NaiveDateTime,
    ) -> Result<PathBuf, PipelineError> {
        let plan = self.plan(today, previous, coordinators, now)?;
        let snapshot = store.write(&plan.table, self.key, now)?;

        let total = plan.emails.len();
        let mut failed = 0;
        for email in &plan.emails {
            if let Err(err) = notifier.send(email).await {
                failed += 1;
                error!(pipeline = self.name, subject = %email.subject, error = %err, "failed to send digest");
            }
        }
        if failed > 0 {
            return Err(PipelineError::Delivery {
                pipeline: self.name,
                failed,
                total,
            });
        }

        info!(
            pipeline = self.name,
            pending = plan.pending.height(),
            completed = ?plan.completed.as_ref().map(DataFrame::height),
            emails = total,
            "digest delivered"
        );
        Ok(snapshot)
    }

    /// Completions between two stored snapshots, treating `current` as today.
    pub fn completions_between(
        &self,
        previous: &Path,
        current: &Path,
    ) -> Result<Option<DataFrame>, PipelineError> {
        let key = self.key.ok_or(PipelineError::MissingKey(self.name))?;
        let Some(strategy) = &self.completion else {
            return Ok(None);
        };
        let Some(today) = load_snapshot(current, key, &self.required_columns)? else {
            return Ok(None);
        };
        let pending_today = filter(&today, self.pending.clone().fill_null(lit(false)))?;
        let yesterday = load_pending(
            Some(previous),
            key,
            &self.required_columns,
            self.pending.clone(),
        )?;
        Ok(strategy.completions(&today, &pending_today, yesterday.as_ref(), key)?)
    }
}

fn push_coordinator_email(
    pipeline: &DigestPipeline,
    emails: &mut Vec<Email>,
    coordinators: &[String],
    subject: String,
    doc: &DigestDocument,
) {
    if coordinators.is_empty() {
        warn!(pipeline = pipeline.name, "no coordinator recipients, digest not sent");
        return;
    }
    emails.push(pipeline.email(coordinators.to_vec(), subject, doc));
}
