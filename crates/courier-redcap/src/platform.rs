use async_trait::async_trait;

use crate::errors::RedcapError;
use crate::model::{DownloadedFile, ExportRequest, FileTarget, ImportAck, ImportRecord, Record};

/// Record-platform operations the digests rely on. `project` is the key the
/// configuration uses for a project (usually its numeric project id).
#[async_trait]
pub trait RecordPlatform: Send + Sync {
    async fn export_records(
        &self,
        project: &str,
        request: &ExportRequest,
    ) -> Result<Vec<Record>, RedcapError>;

    async fn import_records(
        &self,
        project: &str,
        records: &[ImportRecord],
    ) -> Result<ImportAck, RedcapError>;

    async fn upload_file(
        &self,
        project: &str,
        target: &FileTarget,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<(), RedcapError>;

    async fn download_file(
        &self,
        project: &str,
        target: &FileTarget,
    ) -> Result<DownloadedFile, RedcapError>;

    async fn field_names(&self, project: &str) -> Result<Vec<String>, RedcapError>;

    async fn project_title(&self, project: &str) -> Result<Option<String>, RedcapError>;
}
