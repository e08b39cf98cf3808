use courier_core::config::{ConfigError, CourierConfig};

const SAMPLE: &str = r#"
[platform]
url = "https://redcap.example.org/api/"
control_project = "control"

[platform.tokens]
control = "AAAA"
ccm = "BBBB"

[platform.id_fields]
control = "report_id"

[email]
username = "digest@example.org"
password = "secret"
from = "digest@example.org"
operator_copy = "ops@example.org"

[schedule]
timezone = "America/Chicago"

[reports.signoff]
projects = ["ccm"]
link_base = "https://redcap.example.org/redcap_v14/"

[[reports.signoff.audiences]]
label = "Clinician"
emails = ["dr@example.org"]
field = "clinician___1"
"#;

#[test]
fn parses_with_defaults() -> Result<(), ConfigError> {
    let config = CourierConfig::from_toml_str(SAMPLE)?;

    assert_eq!(config.platform.timeout_seconds, 60.0);
    assert_eq!(config.email.host, "smtp.gmail.com");
    assert_eq!(config.email.port, 465);
    assert_eq!(config.schedule.start_hour, 6);
    assert_eq!(config.schedule.tz()?, chrono_tz::America::Chicago);

    let signoff = config.report("signoff").expect("signoff section");
    assert_eq!(signoff.primary_project()?, "ccm");
    assert_eq!(signoff.audiences[0].field.as_deref(), Some("clinician___1"));
    assert_eq!(signoff.inventory(), ["ccm".to_string()]);
    assert!(config.report("timeoff").is_none());

    let redcap = config.redcap_settings();
    assert_eq!(redcap.id_fields.get("control").map(String::as_str), Some("report_id"));

    config.validate()?;
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() {
    let raw = format!("{SAMPLE}\n[extras]\nfoo = 1\n");
    assert!(matches!(
        CourierConfig::from_toml_str(&raw),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn environment_supplies_secrets() -> Result<(), ConfigError> {
    let mut config = CourierConfig::from_toml_str(SAMPLE)?;
    config.apply_env_overrides(vec![
        ("COURIER_PLATFORM_TOKEN_registry".to_string(), " CCCC ".to_string()),
        ("COURIER_SMTP_PASSWORD".to_string(), "rotated".to_string()),
        ("COURIER_PLATFORM_URL".to_string(), String::new()),
        ("HOME".to_string(), "/root".to_string()),
    ]);

    assert_eq!(config.platform.tokens.get("registry").map(String::as_str), Some("CCCC"));
    assert_eq!(config.email.password, "rotated");
    assert_eq!(config.platform.url, "https://redcap.example.org/api/");
    Ok(())
}

#[test]
fn validation_names_the_missing_piece() -> Result<(), ConfigError> {
    let mut config = CourierConfig::from_toml_str(SAMPLE)?;
    config.platform.tokens.remove("ccm");
    match config.validate_platform() {
        Err(ConfigError::Missing(what)) => assert!(what.contains("ccm"), "{what}"),
        other => panic!("expected missing token, got {other:?}"),
    }

    let mut config = CourierConfig::from_toml_str(SAMPLE)?;
    config.email.operator_copy.clear();
    match config.validate_email() {
        Err(ConfigError::Missing(what)) => assert_eq!(what, "email.operator_copy"),
        other => panic!("expected missing operator copy, got {other:?}"),
    }

    let mut config = CourierConfig::from_toml_str(SAMPLE)?;
    config.schedule.timezone = "Mars/Olympus".to_string();
    assert!(matches!(
        config.validate_platform(),
        Err(ConfigError::UnknownTimezone(_))
    ));

    let mut config = CourierConfig::from_toml_str(SAMPLE)?;
    config.schedule.start_hour = 24;
    assert!(matches!(
        config.validate_platform(),
        Err(ConfigError::Invalid { .. })
    ));
    Ok(())
}
