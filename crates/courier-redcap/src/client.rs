use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, multipart, Client, Url};
use tracing::debug;

use crate::errors::RedcapError;
use crate::model::{
    DownloadedFile, ExportRequest, FileTarget, ImportAck, ImportRecord, Record, RECORD_ID_COLUMN,
};
use crate::platform::RecordPlatform;
use crate::wire::{self, FormParams};

#[derive(Debug, Clone)]
pub struct RedcapSettings {
    pub url: String,
    pub timeout_seconds: f64,
    /// API token per project key.
    pub tokens: BTreeMap<String, String>,
    /// Identifier field per project key; projects not listed use `record_id`.
    pub id_fields: BTreeMap<String, String>,
}

impl RedcapSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_seconds: 60.0,
            tokens: BTreeMap::new(),
            id_fields: BTreeMap::new(),
        }
    }

    pub fn with_token(mut self, project: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(project.into(), token.into());
        self
    }

    pub fn id_field(&self, project: &str) -> &str {
        self.id_fields
            .get(project)
            .map(String::as_str)
            .unwrap_or(RECORD_ID_COLUMN)
    }
}

#[derive(Clone)]
pub struct RedcapClient {
    settings: RedcapSettings,
    url: Url,
    http: Client,
}

impl RedcapClient {
    pub fn new(settings: RedcapSettings) -> Result<Self, RedcapError> {
        let url = Url::parse(&settings.url).map_err(|err| RedcapError::InvalidUrl {
            url: settings.url.clone(),
            message: err.to_string(),
        })?;
        let timeout = Duration::from_secs_f64(settings.timeout_seconds.max(1.0));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RedcapError::Http {
                action: "build client",
                source,
            })?;

        Ok(Self {
            settings,
            url,
            http,
        })
    }

    fn token(&self, project: &str) -> Result<&str, RedcapError> {
        self.settings
            .tokens
            .get(project)
            .map(String::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RedcapError::MissingToken {
                project: project.to_string(),
            })
    }

    async fn post_form(
        &self,
        action: &'static str,
        params: &FormParams,
    ) -> Result<reqwest::Response, RedcapError> {
        let response = self
            .http
            .post(self.url.clone())
            .form(params)
            .send()
            .await
            .map_err(|source| RedcapError::Http { action, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RedcapError::Api {
                action,
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn post_text(
        &self,
        action: &'static str,
        params: &FormParams,
    ) -> Result<String, RedcapError> {
        self.post_form(action, params)
            .await?
            .text()
            .await
            .map_err(|source| RedcapError::Http { action, source })
    }
}

#[async_trait]
impl RecordPlatform for RedcapClient {
    async fn export_records(
        &self,
        project: &str,
        request: &ExportRequest,
    ) -> Result<Vec<Record>, RedcapError> {
        let params = wire::export_params(self.token(project)?, request);
        let body = self.post_text("export records", &params).await?;
        let records = wire::decode_records(&body, self.settings.id_field(project))?;
        debug!(project, rows = records.len(), "exported records");
        Ok(records)
    }

    async fn import_records(
        &self,
        project: &str,
        records: &[ImportRecord],
    ) -> Result<ImportAck, RedcapError> {
        let params = wire::import_params(self.token(project)?, records)?;
        let body = self.post_text("import records", &params).await?;
        let ack = wire::decode_import_ack(&body);
        debug!(project, count = ?ack.count, "imported records");
        Ok(ack)
    }

    async fn upload_file(
        &self,
        project: &str,
        target: &FileTarget,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<(), RedcapError> {
        let params = wire::file_params(
            self.token(project)?,
            "import",
            &target.record,
            &target.field,
            target.repeat_instance,
        );
        let mut form = multipart::Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        form = form.part(
            "file",
            multipart::Part::bytes(contents).file_name(file_name.to_string()),
        );

        let action = "upload file";
        let response = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|source| RedcapError::Http { action, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RedcapError::Api {
                action,
                status: status.as_u16(),
                message,
            });
        }
        debug!(project, record = %target.record, field = %target.field, file_name, "uploaded file");
        Ok(())
    }

    async fn download_file(
        &self,
        project: &str,
        target: &FileTarget,
    ) -> Result<DownloadedFile, RedcapError> {
        let params = wire::file_params(
            self.token(project)?,
            "export",
            &target.record,
            &target.field,
            target.repeat_instance,
        );
        let action = "download file";
        let response = self.post_form(action, &params).await?;
        let file_name = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(wire::file_name_from_content_type)
            .unwrap_or_else(|| format!("{}_{}", target.record, target.field));
        let contents = response
            .bytes()
            .await
            .map_err(|source| RedcapError::Http { action, source })?
            .to_vec();
        Ok(DownloadedFile {
            file_name,
            contents,
        })
    }

    async fn field_names(&self, project: &str) -> Result<Vec<String>, RedcapError> {
        let params = wire::metadata_params(self.token(project)?);
        let body = self.post_text("export metadata", &params).await?;
        wire::decode_field_names(&body)
    }

    async fn project_title(&self, project: &str) -> Result<Option<String>, RedcapError> {
        let params = wire::project_params(self.token(project)?);
        let body = self.post_text("export project info", &params).await?;
        wire::decode_project_title(&body)
    }
}
