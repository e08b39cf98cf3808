use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub const RECORD_ID_COLUMN: &str = "record_id";
pub const REPEAT_INSTRUMENT_FIELD: &str = "redcap_repeat_instrument";
pub const REPEAT_INSTANCE_FIELD: &str = "redcap_repeat_instance";
pub const EVENT_FIELD: &str = "redcap_event_name";

/// Typed record identifier. Platform identifiers arrive as text (and come back
/// from spreadsheets as floats), so every ingestion path parses through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Some(Self(value));
        }
        let value = trimmed.parse::<f64>().ok()?;
        if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            Some(Self(value as i64))
        } else {
            None
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diff key for a row: the record, optionally qualified by its repeat instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordKey {
    pub record: RecordId,
    pub instance: Option<i64>,
}

impl RecordKey {
    pub fn record(record: i64) -> Self {
        Self {
            record: RecordId(record),
            instance: None,
        }
    }

    pub fn instance(record: i64, instance: i64) -> Self {
        Self {
            record: RecordId(record),
            instance: Some(instance),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(instance) => write!(f, "{} ({})", self.record, instance),
            None => write!(f, "{}", self.record),
        }
    }
}

/// Which columns identify a row for snapshot diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Record,
    RecordInstance,
}

impl KeySpec {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            KeySpec::Record => &[RECORD_ID_COLUMN],
            KeySpec::RecordInstance => &[RECORD_ID_COLUMN, REPEAT_INSTANCE_FIELD],
        }
    }
}

/// One exported row. `record` keeps the platform's identifier verbatim; the
/// control project uses report names as identifiers, so typing happens later.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub record: String,
    pub repeat_instrument: Option<String>,
    pub repeat_instance: Option<i64>,
    pub event: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Non-empty field value.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        RecordId::parse(&self.record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueMode {
    #[default]
    Raw,
    Label,
}

impl ValueMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueMode::Raw => "raw",
            ValueMode::Label => "label",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRequest {
    pub forms: Vec<String>,
    pub fields: Vec<String>,
    pub records: Vec<String>,
    pub mode: ValueMode,
    pub checkbox_labels: bool,
    pub blank_for_gray_form_status: bool,
}

impl ExportRequest {
    pub fn raw() -> Self {
        Self::default()
    }

    pub fn labels() -> Self {
        Self {
            mode: ValueMode::Label,
            ..Self::default()
        }
    }

    /// Label export with checkbox labels and blanks for never-saved forms,
    /// the shape the recruitment boards read.
    pub fn labels_with_form_status() -> Self {
        Self {
            mode: ValueMode::Label,
            checkbox_labels: true,
            blank_for_gray_form_status: true,
            ..Self::default()
        }
    }

    pub fn forms<I, S>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forms = forms.into_iter().map(Into::into).collect();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn records<I, S>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records = records.into_iter().map(Into::into).collect();
        self
    }
}

pub type ImportRecord = BTreeMap<String, String>;

/// Acknowledgment of an import. The platform answers `{"count": n}` when the
/// write landed; anything else leaves `count` empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportAck {
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub record: String,
    pub field: String,
    pub repeat_instance: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}
