use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use courier_redcap::{
    ExportRequest, FileTarget, ImportRecord, Record, RecordPlatform, RedcapError,
    REPEAT_INSTANCE_FIELD, REPEAT_INSTRUMENT_FIELD,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::schedule::Frequency;

pub const MAIN_FORM: &str = "main";
pub const REPORTS_INSTRUMENT: &str = "reports";
pub const REPORT_FILE_FIELD: &str = "reports_file";
pub const LEDGER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const COMPLETE: &str = "2";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Platform(#[from] RedcapError),
    #[error("import of report {name} was not acknowledged")]
    Unacknowledged { name: String },
    #[error("created report {name} at {datetime} could not be located")]
    NotLocated { name: String, datetime: String },
    #[error("created report {name} at {datetime} matched {count} entries")]
    Ambiguous {
        name: String,
        datetime: String,
        count: usize,
    },
    #[error("ledger I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An active report definition from the control project's main form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDefinition {
    pub name: String,
    pub frequency: Frequency,
    pub recipients: Vec<String>,
}

impl ReportDefinition {
    fn from_record(record: &Record) -> Option<Self> {
        if record.value("main_complete") != Some(COMPLETE) {
            return None;
        }
        let frequency = Frequency::parse(record.value("report_freq").unwrap_or_default());
        let recipients = record
            .value("report_emailto")
            .unwrap_or_default()
            .split('\n')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self {
            name: record.record.clone(),
            frequency,
            recipients,
        })
    }
}

/// A completed report event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub name: String,
    pub instance: i64,
    pub period: String,
    pub datetime: String,
}

impl ReportEntry {
    fn from_record(record: &Record) -> Option<Self> {
        if record.repeat_instrument.as_deref() != Some(REPORTS_INSTRUMENT) {
            return None;
        }
        if record.value("reports_complete") != Some(COMPLETE) {
            return None;
        }
        Some(Self {
            name: record.record.clone(),
            instance: record.repeat_instance?,
            period: record.value("reports_name").unwrap_or_default().to_string(),
            datetime: record.value("reports_datetime").unwrap_or_default().to_string(),
        })
    }
}

/// Report definitions and the record of what has been sent, both kept in the
/// control project.
#[derive(Clone)]
pub struct ReportLedger {
    platform: Arc<dyn RecordPlatform>,
    project: String,
    id_field: String,
}

impl ReportLedger {
    pub fn new(platform: Arc<dyn RecordPlatform>, project: impl Into<String>) -> Self {
        Self {
            platform,
            project: project.into(),
            id_field: courier_redcap::RECORD_ID_COLUMN.to_string(),
        }
    }

    /// Name of the control project's identifier field.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub async fn definitions(&self, names: &[String]) -> Result<Vec<ReportDefinition>, LedgerError> {
        let request = ExportRequest::raw().forms([MAIN_FORM]);
        let records = self.platform.export_records(&self.project, &request).await?;
        Ok(records
            .iter()
            .filter(|record| names.is_empty() || names.contains(&record.record))
            .filter_map(ReportDefinition::from_record)
            .collect())
    }

    /// Entries for `name`, oldest first.
    pub async fn entries(&self, name: &str) -> Result<Vec<ReportEntry>, LedgerError> {
        let request = ExportRequest::raw()
            .forms([REPORTS_INSTRUMENT])
            .records([name]);
        let records = self.platform.export_records(&self.project, &request).await?;
        let mut entries: Vec<ReportEntry> = records
            .iter()
            .filter(|record| record.record == name)
            .filter_map(ReportEntry::from_record)
            .collect();
        entries.sort_by_key(|entry| entry.instance);
        Ok(entries)
    }

    /// Downloads the newest entry's file into `dir`.
    pub async fn download_previous(
        &self,
        entries: &[ReportEntry],
        dir: &Path,
    ) -> Result<Option<PathBuf>, LedgerError> {
        let Some(previous) = entries.last() else {
            return Ok(None);
        };
        let target = FileTarget {
            record: previous.name.clone(),
            field: REPORT_FILE_FIELD.to_string(),
            repeat_instance: Some(previous.instance),
        };
        let file = self.platform.download_file(&self.project, &target).await?;
        let file_name = Path::new(&file.file_name)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "previous_report".into());
        let path = dir.join(file_name);
        std::fs::write(&path, &file.contents).map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), instance = previous.instance, "downloaded previous report");
        Ok(Some(path))
    }

    /// Appends a report event, locates it by its datetime and attaches
    /// `file`. Zero or several matches abandon the event.
    pub async fn record_report(
        &self,
        name: &str,
        period: &str,
        at: NaiveDateTime,
        file: &Path,
    ) -> Result<i64, LedgerError> {
        let datetime = at.format(LEDGER_DATETIME_FORMAT).to_string();

        let mut record = ImportRecord::new();
        record.insert(self.id_field.clone(), name.to_string());
        record.insert(REPEAT_INSTRUMENT_FIELD.to_string(), REPORTS_INSTRUMENT.to_string());
        record.insert(REPEAT_INSTANCE_FIELD.to_string(), "new".to_string());
        record.insert("reports_datetime".to_string(), datetime.clone());
        record.insert("reports_name".to_string(), period.to_string());
        record.insert("reports_complete".to_string(), COMPLETE.to_string());

        let ack = self.platform.import_records(&self.project, &[record]).await?;
        if ack.count.is_none() {
            return Err(LedgerError::Unacknowledged {
                name: name.to_string(),
            });
        }

        let instances: Vec<i64> = self
            .entries(name)
            .await?
            .into_iter()
            .filter(|entry| entry.datetime == datetime)
            .map(|entry| entry.instance)
            .collect();
        let instance = match instances.as_slice() {
            [instance] => *instance,
            [] => {
                return Err(LedgerError::NotLocated {
                    name: name.to_string(),
                    datetime,
                })
            }
            many => {
                return Err(LedgerError::Ambiguous {
                    name: name.to_string(),
                    datetime,
                    count: many.len(),
                })
            }
        };

        let contents = std::fs::read(file).map_err(|source| LedgerError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "report".to_string());
        let target = FileTarget {
            record: name.to_string(),
            field: REPORT_FILE_FIELD.to_string(),
            repeat_instance: Some(instance),
        };
        self.platform
            .upload_file(&self.project, &target, &file_name, contents)
            .await?;

        info!(report = name, period, instance, "recorded report event");
        Ok(instance)
    }
}
