//! Validation and coercion of runbook parameters against a tree's declared
//! contract.
//!
//! Validation runs before the first step executes, so a run with a missing
//! required parameter or a malformed value never produces partial results.

use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use gcpdiag_types::{ParameterSpec, ParameterType};
use indexmap::IndexMap;
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::error::RunbookError;

/// Parameter values keyed by lower-cased name, in declaration order.
pub type Parameters = IndexMap<String, Value>;

/// Declared parameter contract keyed by name.
pub type ParameterSpecs = IndexMap<String, ParameterSpec>;

/// Validates `raw` against `specs`, applying defaults and coercing every
/// declared value to its declared type.
///
/// - Names are matched case-insensitively.
/// - A deprecated parameter's value moves to its `new_parameter` unless the
///   new name was supplied too.
/// - Undeclared parameters are kept untouched and logged.
pub fn resolve_parameters(specs: &ParameterSpecs, raw: &Parameters) -> Result<Parameters, RunbookError> {
    let mut supplied: Parameters = raw.iter().map(|(key, value)| (key.trim().to_lowercase(), value.clone())).collect();
    let specs: IndexMap<String, &ParameterSpec> = specs.iter().map(|(key, spec)| (key.to_lowercase(), spec)).collect();

    for (name, spec) in &specs {
        if !spec.deprecated {
            continue;
        }
        let Some(new_name) = spec.new_parameter.as_ref().map(|name| name.to_lowercase()) else {
            continue;
        };
        if let Some(value) = supplied.shift_remove(name) {
            warn!(parameter = %name, replacement = %new_name, "parameter is deprecated");
            supplied.entry(new_name).or_insert(value);
        }
    }

    let mut resolved = Parameters::new();
    for (name, spec) in &specs {
        if spec.deprecated && spec.new_parameter.is_some() {
            continue;
        }
        let candidate = supplied.shift_remove(name).filter(|value| !value.is_null());
        let value = match (candidate, spec.default.as_ref()) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) if spec.required => {
                return Err(RunbookError::MissingParameter {
                    name: name.clone(),
                    help: spec.help.clone(),
                });
            }
            (None, None) => continue,
        };
        resolved.insert(name.clone(), coerce_value(name, spec, &value)?);
    }

    for (name, value) in supplied {
        warn!(parameter = %name, "parameter is not declared by this runbook; passing it through unchanged");
        resolved.insert(name, value);
    }

    debug!(count = resolved.len(), "resolved runbook parameters");
    Ok(resolved)
}

/// Coerces one value to the type declared by `spec`.
pub fn coerce_value(name: &str, spec: &ParameterSpec, value: &Value) -> Result<Value, RunbookError> {
    let invalid = |message: String| RunbookError::InvalidParameter {
        name: name.to_string(),
        expected: spec.kind.to_string(),
        message,
    };

    match spec.kind {
        ParameterType::String => {
            let text = match value {
                Value::String(text) => text.clone(),
                Value::Number(_) | Value::Bool(_) => value.to_string(),
                other => return Err(invalid(format!("cannot use {other} as text"))),
            };
            Ok(Value::String(if spec.ignorecase { text.to_lowercase() } else { text }))
        }
        ParameterType::Integer => match value {
            Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(|number| Value::Number(number.into()))
                .map_err(|error| invalid(format!("'{text}': {error}"))),
            other => Err(invalid(format!("cannot use {other} as an integer"))),
        },
        ParameterType::Float => {
            let number = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("cannot use {value} as a number")))
        }
        ParameterType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(text) => parse_bool(text)
                .map(Value::Bool)
                .ok_or_else(|| invalid(format!("'{text}' is not one of true/false/yes/no/1/0"))),
            Value::Number(number) => match number.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid(format!("{number} is not 0 or 1"))),
            },
            other => Err(invalid(format!("cannot use {other} as a bool"))),
        },
        ParameterType::DateTime => parse_datetime(value)
            .map(|timestamp| Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .ok_or_else(|| invalid(format!("{value} is not RFC 3339, YYYY-MM-DD, or epoch seconds"))),
        ParameterType::IpAddress => match value {
            Value::String(text) => text
                .trim()
                .parse::<IpAddr>()
                .map(|address| Value::String(address.to_string()))
                .map_err(|error| invalid(format!("'{text}': {error}"))),
            other => Err(invalid(format!("cannot use {other} as an IP address"))),
        },
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parses RFC 3339 strings, `YYYY-MM-DD` dates (midnight UTC), or epoch seconds.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number.as_i64().and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
                return Some(timestamp.with_timezone(&Utc));
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
            text.parse::<i64>()
                .ok()
                .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> ParameterSpecs {
        let mut specs = ParameterSpecs::new();
        specs.insert(
            "project_id".into(),
            ParameterSpec::new(ParameterType::String, "The project hosting the VM").required(),
        );
        specs.insert(
            "zone".into(),
            ParameterSpec::new(ParameterType::String, "The zone of the VM")
                .ignorecase()
                .default_value("us-central1-a"),
        );
        specs.insert("retries".into(), ParameterSpec::new(ParameterType::Integer, "Retries"));
        specs.insert("check_os".into(), ParameterSpec::new(ParameterType::Bool, "Inspect the guest OS"));
        specs.insert("start_time".into(), ParameterSpec::new(ParameterType::DateTime, "Window start"));
        specs.insert("src_ip".into(), ParameterSpec::new(ParameterType::IpAddress, "Source address"));
        specs.insert("name".into(), ParameterSpec::new(ParameterType::String, "Old name").deprecated_for("instance_name"));
        specs.insert("instance_name".into(), ParameterSpec::new(ParameterType::String, "Instance name"));
        specs
    }

    fn raw(pairs: &[(&str, &str)]) -> Parameters {
        pairs.iter().map(|(key, value)| (key.to_string(), json!(value))).collect()
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let error = resolve_parameters(&specs(), &raw(&[("zone", "europe-west1-b")])).expect_err("missing project");
        match error {
            RunbookError::MissingParameter { name, help } => {
                assert_eq!(name, "project_id");
                assert!(help.contains("project"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn defaults_and_coercions_are_applied() {
        let resolved = resolve_parameters(
            &specs(),
            &raw(&[
                ("PROJECT_ID", "demo"),
                ("retries", "3"),
                ("check_os", "Yes"),
                ("start_time", "2024-05-01"),
                ("src_ip", "10.0.0.1"),
            ]),
        )
        .expect("resolve");

        assert_eq!(resolved["project_id"], json!("demo"));
        assert_eq!(resolved["zone"], json!("us-central1-a"));
        assert_eq!(resolved["retries"], json!(3));
        assert_eq!(resolved["check_os"], json!(true));
        assert_eq!(resolved["start_time"], json!("2024-05-01T00:00:00Z"));
        assert_eq!(resolved["src_ip"], json!("10.0.0.1"));
    }

    #[test]
    fn ignorecase_lowercases_values() {
        let resolved = resolve_parameters(&specs(), &raw(&[("project_id", "demo"), ("zone", "US-EAST1-B")])).expect("resolve");
        assert_eq!(resolved["zone"], json!("us-east1-b"));
    }

    #[test]
    fn invalid_values_report_the_expected_type() {
        let error = resolve_parameters(&specs(), &raw(&[("project_id", "demo"), ("src_ip", "not-an-ip")])).expect_err("bad ip");
        match error {
            RunbookError::InvalidParameter { name, expected, .. } => {
                assert_eq!(name, "src_ip");
                assert_eq!(expected, "ipaddress");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn deprecated_parameter_moves_to_replacement() {
        let resolved = resolve_parameters(&specs(), &raw(&[("project_id", "demo"), ("name", "vm-1")])).expect("resolve");
        assert_eq!(resolved["instance_name"], json!("vm-1"));
        assert!(!resolved.contains_key("name"));
    }

    #[test]
    fn undeclared_parameters_pass_through() {
        let resolved = resolve_parameters(&specs(), &raw(&[("project_id", "demo"), ("extra", "value")])).expect("resolve");
        assert_eq!(resolved["extra"], json!("value"));
    }

    #[test]
    fn parses_epoch_and_rfc3339_datetimes() {
        let epoch = parse_datetime(&json!(0)).expect("epoch");
        assert_eq!(epoch.to_rfc3339_opts(SecondsFormat::Secs, true), "1970-01-01T00:00:00Z");
        let offset = parse_datetime(&json!("2024-01-01T02:00:00+02:00")).expect("rfc3339");
        assert_eq!(offset.to_rfc3339_opts(SecondsFormat::Secs, true), "2024-01-01T00:00:00Z");
        assert!(parse_datetime(&json!("yesterday")).is_none());
    }
}
