#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use courier_core::notify::{Email, Notifier, NotifyError};
use courier_redcap::{
    DownloadedFile, ExportRequest, FileTarget, ImportAck, ImportRecord, Record, RecordPlatform,
    RedcapError, RECORD_ID_COLUMN, REPEAT_INSTANCE_FIELD, REPEAT_INSTRUMENT_FIELD,
};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

pub fn record(id: &str, fields: &[(&str, &str)]) -> Record {
    Record {
        record: id.to_string(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Record::default()
    }
}

pub fn repeat(id: &str, instrument: &str, instance: i64, fields: &[(&str, &str)]) -> Record {
    Record {
        repeat_instrument: Some(instrument.to_string()),
        repeat_instance: Some(instance),
        ..record(id, fields)
    }
}

pub fn in_event(event: &str, mut record: Record) -> Record {
    record.event = Some(event.to_string());
    record
}

/// In-memory platform. Imports append rows, so a ledger write can be read
/// back; uploads become downloadable.
#[derive(Default)]
pub struct FakePlatform {
    pub projects: Mutex<BTreeMap<String, Vec<Record>>>,
    pub field_names: BTreeMap<String, Vec<String>>,
    pub titles: BTreeMap<String, String>,
    pub uploads: Mutex<Vec<(String, FileTarget, String, Vec<u8>)>>,
    pub exports: Mutex<Vec<(String, ExportRequest)>>,
    /// Imports are accepted but the acknowledgement carries no count.
    pub silent_imports: bool,
}

impl FakePlatform {
    pub fn with_project(self, project: &str, records: Vec<Record>) -> Self {
        self.projects
            .lock()
            .unwrap()
            .insert(project.to_string(), records);
        self
    }

    pub fn with_fields(mut self, project: &str, fields: &[&str]) -> Self {
        self.field_names.insert(
            project.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn with_title(mut self, project: &str, title: &str) -> Self {
        self.titles.insert(project.to_string(), title.to_string());
        self
    }

    pub fn rows(&self, project: &str) -> Vec<Record> {
        self.projects
            .lock()
            .unwrap()
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

fn form_matches(request: &ExportRequest, record: &Record) -> bool {
    if request.forms.is_empty() {
        return true;
    }
    match &record.repeat_instrument {
        Some(instrument) => request.forms.contains(instrument),
        None => request.forms.iter().any(|form| form == "main"),
    }
}

#[async_trait]
impl RecordPlatform for FakePlatform {
    async fn export_records(
        &self,
        project: &str,
        request: &ExportRequest,
    ) -> Result<Vec<Record>, RedcapError> {
        self.exports
            .lock()
            .unwrap()
            .push((project.to_string(), request.clone()));
        Ok(self
            .rows(project)
            .into_iter()
            .filter(|record| request.records.is_empty() || request.records.contains(&record.record))
            .filter(|record| form_matches(request, record))
            .collect())
    }

    async fn import_records(
        &self,
        project: &str,
        records: &[ImportRecord],
    ) -> Result<ImportAck, RedcapError> {
        let mut projects = self.projects.lock().unwrap();
        let rows = projects.entry(project.to_string()).or_default();
        for import in records {
            let mut fields = import.clone();
            let id = fields.remove(RECORD_ID_COLUMN).unwrap_or_default();
            let instrument = fields.remove(REPEAT_INSTRUMENT_FIELD);
            let instance = match fields.remove(REPEAT_INSTANCE_FIELD).as_deref() {
                Some("new") => {
                    let next = rows
                        .iter()
                        .filter(|row| row.record == id && row.repeat_instrument == instrument)
                        .filter_map(|row| row.repeat_instance)
                        .max()
                        .unwrap_or(0)
                        + 1;
                    Some(next)
                }
                Some(raw) => raw.parse().ok(),
                None => None,
            };
            rows.push(Record {
                record: id,
                repeat_instrument: instrument,
                repeat_instance: instance,
                event: None,
                fields,
            });
        }
        Ok(ImportAck {
            count: (!self.silent_imports).then_some(records.len() as u64),
        })
    }

    async fn upload_file(
        &self,
        project: &str,
        target: &FileTarget,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<(), RedcapError> {
        self.uploads.lock().unwrap().push((
            project.to_string(),
            target.clone(),
            file_name.to_string(),
            contents,
        ));
        Ok(())
    }

    async fn download_file(
        &self,
        project: &str,
        target: &FileTarget,
    ) -> Result<DownloadedFile, RedcapError> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, t, _, _)| p == project && t == target)
            .map(|(_, _, name, contents)| DownloadedFile {
                file_name: name.clone(),
                contents: contents.clone(),
            })
            .ok_or_else(|| RedcapError::Api {
                action: "export file",
                status: 400,
                message: "There is no file to download for this record".to_string(),
            })
    }

    async fn field_names(&self, project: &str) -> Result<Vec<String>, RedcapError> {
        Ok(self.field_names.get(project).cloned().unwrap_or_default())
    }

    async fn project_title(&self, project: &str) -> Result<Option<String>, RedcapError> {
        Ok(self.titles.get(project).cloned())
    }
}

/// Keeps every email; subjects listed in `failing` are rejected.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Email>>,
    pub failing: Vec<String>,
}

impl RecordingNotifier {
    pub fn emails(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn to(&self, address: &str) -> Vec<Email> {
        self.emails()
            .into_iter()
            .filter(|email| email.to.iter().any(|to| to == address))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        if self.failing.contains(&email.subject) {
            return Err(NotifyError::Build(format!("rejected {}", email.subject)));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
