pub mod client;
pub mod errors;
pub mod model;
mod platform;
pub mod wire;

pub use client::{RedcapClient, RedcapSettings};
pub use errors::RedcapError;
pub use model::{
    DownloadedFile, ExportRequest, FileTarget, ImportAck, ImportRecord, KeySpec, Record,
    RecordId, RecordKey, ValueMode, EVENT_FIELD, RECORD_ID_COLUMN, REPEAT_INSTANCE_FIELD,
    REPEAT_INSTRUMENT_FIELD,
};
pub use platform::RecordPlatform;
