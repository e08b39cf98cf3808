use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use courier_redcap::{RecordPlatform, RECORD_ID_COLUMN};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::config::{CourierConfig, ReportSettings};
use crate::ledger::{LedgerError, ReportDefinition, ReportEntry, ReportLedger};
use crate::notify::Notifier;
use crate::reports::{find_report, Report, ReportContext};
use crate::schedule::{Decision, ScheduleGate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// Generated, sent and logged as ledger instance `instance`.
    Recorded { period: String, instance: i64 },
    Skipped(Decision),
    UnknownReport,
    Failed(String),
    /// Sent, but the ledger write failed; the next run will repeat it.
    LedgerFailed(String),
}

impl ReportStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReportStatus::Failed(_) | ReportStatus::LedgerFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub name: String,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub outcomes: Vec<ReportOutcome>,
}

impl BatchSummary {
    fn push(&mut self, name: &str, status: ReportStatus) {
        self.outcomes.push(ReportOutcome {
            name: name.to_string(),
            status,
        });
    }

    pub fn recorded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, ReportStatus::Recorded { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.status.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runs due reports one after another. Each report gets its own temporary
/// working directory, and a failure stays with the report that caused it.
pub struct BatchRunner {
    platform: Arc<dyn RecordPlatform>,
    notifier: Arc<dyn Notifier>,
    ledger: ReportLedger,
    gate: ScheduleGate,
    reports: BTreeMap<String, ReportSettings>,
}

impl BatchRunner {
    pub fn new(
        config: &CourierConfig,
        platform: Arc<dyn RecordPlatform>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let control = &config.platform.control_project;
        let id_field = config
            .platform
            .id_fields
            .get(control)
            .map(String::as_str)
            .unwrap_or(RECORD_ID_COLUMN);
        let ledger = ReportLedger::new(Arc::clone(&platform), control.clone()).with_id_field(id_field);
        Self {
            platform,
            notifier,
            ledger,
            gate: ScheduleGate::new(config.schedule.start_hour),
            reports: config.reports.clone(),
        }
    }

    fn resolve(&self, name: &str) -> Result<(&'static dyn Report, ReportSettings)> {
        let report = find_report(name).ok_or_else(|| anyhow!("unknown report {name}"))?;
        let settings = self
            .reports
            .get(name)
            .cloned()
            .with_context(|| format!("no [reports.{name}] section in the configuration"))?;
        report
            .check_settings(&settings)
            .with_context(|| format!("invalid settings for report {name}"))?;
        Ok((report, settings))
    }

    fn context(
        &self,
        settings: ReportSettings,
        recipients: Vec<String>,
        outdir: &Path,
        previous: Option<PathBuf>,
        now: NaiveDateTime,
    ) -> ReportContext {
        ReportContext {
            platform: Arc::clone(&self.platform),
            notifier: Arc::clone(&self.notifier),
            settings,
            recipients,
            outdir: outdir.to_path_buf(),
            previous,
            now,
        }
    }

    /// A download failure only costs the diff, so it is not fatal.
    async fn previous_file(&self, entries: &[ReportEntry], dir: &Path) -> Option<PathBuf> {
        match self.ledger.download_previous(entries, dir).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(error = %err, "could not download previous report file, continuing without it");
                None
            }
        }
    }

    /// Evaluates every active definition (all of them when `names` is empty)
    /// against the schedule and runs the ones that are due.
    pub async fn update(&self, names: &[String], now: NaiveDateTime) -> Result<BatchSummary, LedgerError> {
        let definitions = self.ledger.definitions(names).await?;
        info!(definitions = definitions.len(), "loaded report definitions");

        let mut summary = BatchSummary::default();
        for definition in &definitions {
            let status = self.update_one(definition, now).await;
            match &status {
                ReportStatus::Recorded { period, instance } => {
                    info!(report = %definition.name, period = %period, instance, "report complete")
                }
                ReportStatus::Skipped(decision) => {
                    debug!(report = %definition.name, decision = ?decision, "report not due")
                }
                ReportStatus::UnknownReport => {
                    warn!(report = %definition.name, "no generator for report, skipping")
                }
                ReportStatus::Failed(message) | ReportStatus::LedgerFailed(message) => {
                    error!(report = %definition.name, error = %message, "report failed")
                }
            }
            summary.push(&definition.name, status);
        }
        Ok(summary)
    }

    async fn update_one(&self, definition: &ReportDefinition, now: NaiveDateTime) -> ReportStatus {
        if find_report(&definition.name).is_none() {
            return ReportStatus::UnknownReport;
        }

        let entries = match self.ledger.entries(&definition.name).await {
            Ok(entries) => entries,
            Err(err) => return ReportStatus::Failed(err.to_string()),
        };
        let period = match self.gate.evaluate(
            now,
            definition.frequency,
            entries.iter().map(|entry| entry.period.as_str()),
        ) {
            Decision::Run { period } => period,
            other => return ReportStatus::Skipped(other),
        };

        let (report, settings) = match self.resolve(&definition.name) {
            Ok(resolved) => resolved,
            Err(err) => return ReportStatus::Failed(format!("{err:#}")),
        };
        let workdir = match TempDir::new() {
            Ok(dir) => dir,
            Err(err) => return ReportStatus::Failed(format!("failed to create working directory: {err}")),
        };

        let previous = self.previous_file(&entries, workdir.path()).await;
        let ctx = self.context(
            settings,
            definition.recipients.clone(),
            workdir.path(),
            previous,
            now,
        );
        let file = match report.generate(&ctx).await {
            Ok(file) => file,
            Err(err) => return ReportStatus::Failed(format!("{err:#}")),
        };

        match self
            .ledger
            .record_report(&definition.name, &period, now, &file)
            .await
        {
            Ok(instance) => ReportStatus::Recorded { period, instance },
            Err(err) => ReportStatus::LedgerFailed(err.to_string()),
        }
    }

    /// Runs one report immediately, ignoring the schedule and the ledger.
    /// Output stays in `outdir`; the newest ledger file, when there is one,
    /// is downloaded to a scratch directory and used as the previous snapshot.
    pub async fn run_report(&self, name: &str, outdir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
        let (report, settings) = self.resolve(name)?;
        std::fs::create_dir_all(outdir)
            .with_context(|| format!("failed to create {}", outdir.display()))?;

        let entries = match self.ledger.entries(name).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(report = name, error = %err, "could not list ledger entries");
                Vec::new()
            }
        };
        let downloads = TempDir::new().context("failed to create download directory")?;
        let previous = self.previous_file(&entries, downloads.path()).await;

        let ctx = self.context(settings, Vec::new(), outdir, previous, now);
        let file = report
            .generate(&ctx)
            .await
            .with_context(|| format!("report {name} failed"))?;
        info!(report = name, file = %file.display(), "forced report complete");
        Ok(file)
    }
}
