use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use courier_redcap::RedcapSettings;
use serde::Deserialize;
use thiserror::Error;

pub const TOKEN_ENV_PREFIX: &str = "COURIER_PLATFORM_TOKEN_";
pub const SMTP_PASSWORD_ENV: &str = "COURIER_SMTP_PASSWORD";
pub const PLATFORM_URL_ENV: &str = "COURIER_PLATFORM_URL";
pub const CONFIG_PATH_ENV: &str = "COURIER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing configuration value: {0}")]
    Missing(String),
    #[error("unknown time zone {0}")]
    UnknownTimezone(String),
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    pub platform: PlatformConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub reports: BTreeMap<String, ReportSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Project holding report definitions and the report ledger.
    pub control_project: String,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub id_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    /// Blind-copied on every delivery.
    #[serde(default)]
    pub operator_copy: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    /// Source projects, primary first.
    #[serde(default)]
    pub projects: Vec<String>,
    /// Secondary project rows are linked against (e.g. prescreeners).
    #[serde(default)]
    pub linked_project: Option<String>,
    /// Projects counted on the summary inventory page; defaults to `projects`.
    #[serde(default)]
    pub inventory_projects: Vec<String>,
    /// Base of the platform's data-entry URLs, without a trailing slash.
    #[serde(default)]
    pub link_base: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub audiences: Vec<AudienceSettings>,
    /// Person name to email address.
    #[serde(default)]
    pub directory: BTreeMap<String, String>,
    /// Used when the ledger supplies no recipients (forced runs).
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudienceSettings {
    pub label: String,
    #[serde(default)]
    pub emails: Vec<String>,
    /// Checkbox column selecting this audience's rows.
    #[serde(default)]
    pub field: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            operator_copy: String::new(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            start_hour: default_start_hour(),
        }
    }
}

fn default_timeout_seconds() -> f64 {
    60.0
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_start_hour() -> u32 {
    6
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }
}

impl ReportSettings {
    pub fn primary_project(&self) -> Result<&str, ConfigError> {
        self.projects
            .first()
            .map(String::as_str)
            .ok_or_else(|| ConfigError::Missing("report source project".to_string()))
    }

    pub fn linked_project(&self) -> Result<&str, ConfigError> {
        self.linked_project
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("report linked project".to_string()))
    }

    pub fn inventory(&self) -> &[String] {
        if self.inventory_projects.is_empty() {
            &self.projects
        } else {
            &self.inventory_projects
        }
    }

    pub fn all_projects(&self) -> impl Iterator<Item = &str> {
        self.projects
            .iter()
            .chain(self.linked_project.iter())
            .chain(self.inventory_projects.iter())
            .map(String::as_str)
    }
}

impl CourierConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    /// Secrets may live in the environment instead of the file:
    /// `COURIER_PLATFORM_TOKEN_<PROJECT>`, `COURIER_SMTP_PASSWORD`,
    /// `COURIER_PLATFORM_URL`.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            if let Some(project) = key.strip_prefix(TOKEN_ENV_PREFIX) {
                if !project.is_empty() {
                    self.platform.tokens.insert(project.to_string(), value);
                }
            } else if key == SMTP_PASSWORD_ENV {
                self.email.password = value;
            } else if key == PLATFORM_URL_ENV {
                self.platform.url = value;
            }
        }
    }

    pub fn report(&self, name: &str) -> Option<&ReportSettings> {
        self.reports.get(name)
    }

    pub fn redcap_settings(&self) -> RedcapSettings {
        RedcapSettings {
            url: self.platform.url.clone(),
            timeout_seconds: self.platform.timeout_seconds,
            tokens: self.platform.tokens.clone(),
            id_fields: self.platform.id_fields.clone(),
        }
    }

    fn has_token(&self, project: &str) -> bool {
        self.platform
            .tokens
            .get(project)
            .is_some_and(|token| !token.trim().is_empty())
    }

    /// Platform URL, control-project token, report project tokens and the
    /// time zone.
    pub fn validate_platform(&self) -> Result<(), ConfigError> {
        if self.platform.url.trim().is_empty() {
            return Err(ConfigError::Missing("platform.url".to_string()));
        }
        if self.platform.control_project.trim().is_empty() {
            return Err(ConfigError::Missing("platform.control_project".to_string()));
        }
        if !self.has_token(&self.platform.control_project) {
            return Err(ConfigError::Missing(format!(
                "token for control project {}",
                self.platform.control_project
            )));
        }
        for (name, report) in &self.reports {
            for project in report.all_projects() {
                if !self.has_token(project) {
                    return Err(ConfigError::Missing(format!(
                        "token for project {project} (report {name})"
                    )));
                }
            }
        }
        if self.schedule.start_hour > 23 {
            return Err(ConfigError::Invalid {
                field: "schedule.start_hour".to_string(),
                message: format!("{} is not an hour of the day", self.schedule.start_hour),
            });
        }
        self.schedule.tz()?;
        Ok(())
    }

    pub fn validate_email(&self) -> Result<(), ConfigError> {
        let required = [
            ("email.host", &self.email.host),
            ("email.username", &self.email.username),
            ("email.password", &self.email.password),
            ("email.from", &self.email.from),
            ("email.operator_copy", &self.email.operator_copy),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field.to_string()));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_platform()?;
        self.validate_email()
    }
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }
    if let Ok(value) = std::env::var(CONFIG_PATH_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from("courier.toml")
}
