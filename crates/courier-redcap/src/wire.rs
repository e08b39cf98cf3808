use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::errors::RedcapError;
use crate::model::{
    ExportRequest, ImportAck, ImportRecord, Record, EVENT_FIELD, REPEAT_INSTANCE_FIELD,
    REPEAT_INSTRUMENT_FIELD,
};

pub type FormParams = Vec<(String, String)>;

fn base_params(token: &str, content: &str) -> FormParams {
    vec![
        ("token".to_string(), token.to_string()),
        ("content".to_string(), content.to_string()),
        ("format".to_string(), "json".to_string()),
        ("returnFormat".to_string(), "json".to_string()),
    ]
}

fn push_indexed(params: &mut FormParams, name: &str, values: &[String]) {
    for (idx, value) in values.iter().enumerate() {
        params.push((format!("{name}[{idx}]"), value.clone()));
    }
}

pub fn export_params(token: &str, request: &ExportRequest) -> FormParams {
    let mut params = base_params(token, "record");
    params.push(("type".to_string(), "flat".to_string()));
    params.push(("rawOrLabel".to_string(), request.mode.as_str().to_string()));
    params.push(("rawOrLabelHeaders".to_string(), "raw".to_string()));
    params.push((
        "exportCheckboxLabel".to_string(),
        request.checkbox_labels.to_string(),
    ));
    params.push((
        "exportBlankForGrayFormStatus".to_string(),
        request.blank_for_gray_form_status.to_string(),
    ));
    push_indexed(&mut params, "forms", &request.forms);
    push_indexed(&mut params, "fields", &request.fields);
    push_indexed(&mut params, "records", &request.records);
    params
}

pub fn import_params(token: &str, records: &[ImportRecord]) -> Result<FormParams, RedcapError> {
    let data = serde_json::to_string(records).map_err(|source| RedcapError::Decode {
        action: "import records",
        source,
    })?;
    let mut params = base_params(token, "record");
    params.push(("type".to_string(), "flat".to_string()));
    params.push(("overwriteBehavior".to_string(), "normal".to_string()));
    params.push(("returnContent".to_string(), "count".to_string()));
    params.push(("data".to_string(), data));
    Ok(params)
}

pub fn file_params(token: &str, action: &str, record: &str, field: &str, instance: Option<i64>) -> FormParams {
    let mut params = base_params(token, "file");
    params.push(("action".to_string(), action.to_string()));
    params.push(("record".to_string(), record.to_string()));
    params.push(("field".to_string(), field.to_string()));
    if let Some(instance) = instance {
        params.push(("repeat_instance".to_string(), instance.to_string()));
    }
    params
}

pub fn metadata_params(token: &str) -> FormParams {
    base_params(token, "metadata")
}

pub fn project_params(token: &str) -> FormParams {
    base_params(token, "project")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

fn parse_instance(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|value| value as i64))
}

/// Decodes a flat JSON record export. Rows without the identifier field are
/// skipped with a warning rather than failing the whole export.
pub fn decode_records(body: &str, id_field: &str) -> Result<Vec<Record>, RedcapError> {
    let parsed: Value = serde_json::from_str(body).map_err(|source| RedcapError::Decode {
        action: "export records",
        source,
    })?;

    let rows = match parsed {
        Value::Array(rows) => rows,
        Value::Object(map) if map.contains_key("error") => {
            return Err(RedcapError::Api {
                action: "export records",
                status: 200,
                message: map.get("error").map(value_to_string).unwrap_or_default(),
            })
        }
        other => {
            return Err(RedcapError::UnexpectedShape {
                action: "export records",
                message: format!("expected an array, found {}", shape_name(&other)),
            })
        }
    };

    let mut records = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let Value::Object(map) = row else {
            warn!(row = idx, "skipping non-object row in export");
            continue;
        };

        let fields: BTreeMap<String, String> = map
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();

        let Some(record) = fields.get(id_field).filter(|value| !value.is_empty()).cloned() else {
            warn!(row = idx, field = id_field, "skipping exported row without identifier");
            continue;
        };

        let repeat_instrument = fields
            .get(REPEAT_INSTRUMENT_FIELD)
            .filter(|value| !value.is_empty())
            .cloned();
        let repeat_instance = fields
            .get(REPEAT_INSTANCE_FIELD)
            .and_then(|value| parse_instance(value));
        let event = fields.get(EVENT_FIELD).filter(|value| !value.is_empty()).cloned();

        records.push(Record {
            record,
            repeat_instrument,
            repeat_instance,
            event,
            fields,
        });
    }

    Ok(records)
}

pub fn decode_import_ack(body: &str) -> ImportAck {
    let count = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("count").cloned())
        .and_then(|count| match count {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        });
    ImportAck { count }
}

/// The platform names downloaded files through the content type, e.g.
/// `text/csv; name="report.csv"`.
pub fn file_name_from_content_type(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("name") {
            let name = value.trim().trim_matches('"').to_string();
            (!name.is_empty()).then_some(name)
        } else {
            None
        }
    })
}

pub fn decode_field_names(body: &str) -> Result<Vec<String>, RedcapError> {
    let parsed: Value = serde_json::from_str(body).map_err(|source| RedcapError::Decode {
        action: "export metadata",
        source,
    })?;
    let Value::Array(rows) = &parsed else {
        return Err(RedcapError::UnexpectedShape {
            action: "export metadata",
            message: format!("expected an array, found {}", shape_name(&parsed)),
        });
    };
    Ok(rows
        .iter()
        .filter_map(|row| row.get("field_name").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

pub fn decode_project_title(body: &str) -> Result<Option<String>, RedcapError> {
    let parsed: Value = serde_json::from_str(body).map_err(|source| RedcapError::Decode {
        action: "export project info",
        source,
    })?;
    Ok(parsed
        .get("project_title")
        .map(value_to_string)
        .filter(|title| !title.is_empty()))
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
