//! Parameter and tag file parsing.
//!
//! Parameter files accept the CloudFormation CLI shape
//! `[{"ParameterKey": k, "ParameterValue": v}]` or a flat map. Tag files
//! accept `[{"Key": k, "Value": v}]`, `{"Tags": {..}}`, or a flat map.
//! JSON files are read with the YAML parser.

use std::collections::HashSet;
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::cloud::Bindings;
use crate::error::{ConfigError, Result};

/// Reads a YAML or JSON file into a generic value.
///
/// # Errors
///
/// Returns an error if the file is missing or cannot be parsed.
pub fn read_value(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content)
        .map_err(|e| ConfigError::parse(format!("YAML parse error: {e}"), path.display().to_string()).into())
}

/// Parses stack parameters.
///
/// # Errors
///
/// Returns an error if the shape is not recognised or a key repeats
/// within a list.
pub fn parameters_from_value(value: &Value, location: &str) -> Result<Bindings> {
    match value {
        Value::Null => Ok(Bindings::new()),
        Value::Sequence(items) => {
            list_bindings(items, location, &["ParameterKey", "Key"], &["ParameterValue", "Value"])
        }
        Value::Mapping(_) => map_bindings(value, location),
        _ => Err(shape_error(location, "parameters")),
    }
}

/// Parses stack tags.
///
/// # Errors
///
/// Returns an error if the shape is not recognised or a key repeats
/// within a list.
pub fn tags_from_value(value: &Value, location: &str) -> Result<Bindings> {
    match value {
        Value::Null => Ok(Bindings::new()),
        Value::Sequence(items) => list_bindings(items, location, &["Key"], &["Value"]),
        Value::Mapping(map) if map.len() == 1 => match map.get("Tags") {
            Some(inner) => tags_from_value(inner, location),
            None => map_bindings(value, location),
        },
        Value::Mapping(_) => map_bindings(value, location),
        _ => Err(shape_error(location, "tags")),
    }
}

/// Loads and merges parameter files in order; later files win.
///
/// # Errors
///
/// Returns the first read or parse error.
pub fn load_parameter_files<P: AsRef<Path>>(paths: &[P]) -> Result<Bindings> {
    let mut merged = Bindings::new();
    for path in paths {
        let path = path.as_ref();
        debug!("Loading parameters from {}", path.display());
        let value = read_value(path)?;
        merged.merge(&parameters_from_value(&value, &path.display().to_string())?);
    }
    Ok(merged)
}

/// Loads and merges tag files in order; later files win.
///
/// # Errors
///
/// Returns the first read or parse error.
pub fn load_tag_files<P: AsRef<Path>>(paths: &[P]) -> Result<Bindings> {
    let mut merged = Bindings::new();
    for path in paths {
        let path = path.as_ref();
        debug!("Loading tags from {}", path.display());
        let value = read_value(path)?;
        merged.merge(&tags_from_value(&value, &path.display().to_string())?);
    }
    Ok(merged)
}

/// Parses `KEY=VALUE` assignments from the command line.
///
/// # Errors
///
/// Returns `InvalidBinding` for an entry without `=` or with an empty key.
pub fn parse_assignments(items: &[String]) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    for item in items {
        let (key, value) = Bindings::parse_assignment(item).ok_or_else(|| {
            ConfigError::InvalidBinding {
                input: item.clone(),
            }
        })?;
        bindings.insert(key, value);
    }
    Ok(bindings)
}

fn list_bindings(
    items: &[Value],
    location: &str,
    key_fields: &[&str],
    value_fields: &[&str],
) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    let mut seen = HashSet::new();
    for item in items {
        let (key, value) = match item {
            Value::Mapping(map) => {
                let key = key_fields
                    .iter()
                    .find_map(|f| map.get(*f))
                    .and_then(scalar);
                let value = value_fields
                    .iter()
                    .find_map(|f| map.get(*f))
                    .and_then(scalar);
                match (key, value) {
                    (Some(key), Some(value)) => (key, value),
                    _ => return Err(shape_error(location, "entry")),
                }
            }
            Value::String(raw) => Bindings::parse_assignment(raw).ok_or_else(|| {
                ConfigError::InvalidBinding { input: raw.clone() }
            })?,
            _ => return Err(shape_error(location, "entry")),
        };
        if !seen.insert(key.clone()) {
            return Err(ConfigError::DuplicateBinding {
                key,
                location: location.to_string(),
            }
            .into());
        }
        bindings.insert(key, value);
    }
    Ok(bindings)
}

fn map_bindings(value: &Value, location: &str) -> Result<Bindings> {
    let Value::Mapping(map) = value else {
        return Err(shape_error(location, "map"));
    };
    let mut bindings = Bindings::new();
    for (key, value) in map {
        match (scalar(key), scalar(value)) {
            (Some(key), Some(value)) => bindings.insert(key, value),
            _ => return Err(shape_error(location, "entry")),
        }
    }
    Ok(bindings)
}

/// Renders a scalar as the string the provider expects.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn shape_error(location: &str, what: &str) -> crate::error::CirrusError {
    ConfigError::parse(format!("unsupported {what} shape"), location).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn pairs(bindings: &Bindings) -> Vec<(&str, &str)> {
        bindings.iter().collect()
    }

    #[test]
    fn test_cli_parameter_shape() {
        let value = yaml(
            r#"[{"ParameterKey": "Env", "ParameterValue": "prod"}, {"ParameterKey": "Size", "ParameterValue": 3}]"#,
        );
        let params = parameters_from_value(&value, "params.json").unwrap();
        assert_eq!(pairs(&params), vec![("Env", "prod"), ("Size", "3")]);
    }

    #[test]
    fn test_flat_map_keeps_file_order() {
        let value = yaml("Zeta: 1\nAlpha: two\nFlag: true\n");
        let params = parameters_from_value(&value, "params.yaml").unwrap();
        assert_eq!(pairs(&params), vec![("Zeta", "1"), ("Alpha", "two"), ("Flag", "true")]);
    }

    #[test]
    fn test_duplicate_key_in_list() {
        let value = yaml(r#"[{"Key": "a", "Value": "1"}, {"Key": "a", "Value": "2"}]"#);
        let err = tags_from_value(&value, "tags.json").unwrap_err();
        assert!(err.to_string().contains("Duplicate key 'a'"));
    }

    #[test]
    fn test_tag_shapes() {
        let wrapped = tags_from_value(&yaml(r#"{"Tags": {"Team": "core"}}"#), "t").unwrap();
        assert_eq!(pairs(&wrapped), vec![("Team", "core")]);

        let listed = tags_from_value(&yaml(r#"[{"Key": "Team", "Value": "core"}]"#), "t").unwrap();
        assert_eq!(pairs(&listed), vec![("Team", "core")]);

        let flat = tags_from_value(&yaml("Owner: ops\n"), "t").unwrap();
        assert_eq!(pairs(&flat), vec![("Owner", "ops")]);
    }

    #[test]
    fn test_scalar_document_rejected() {
        assert!(parameters_from_value(&yaml("just text"), "p").is_err());
    }

    #[test]
    fn test_files_merge_in_order() {
        let mut first = NamedTempFile::new().unwrap();
        writeln!(first, "Env: dev\nSize: '1'").unwrap();
        let mut second = NamedTempFile::new().unwrap();
        writeln!(second, r#"[{{"ParameterKey": "Env", "ParameterValue": "prod"}}, {{"ParameterKey": "Zone", "ParameterValue": "a"}}]"#).unwrap();

        let merged = load_parameter_files(&[first.path(), second.path()]).unwrap();
        assert_eq!(pairs(&merged), vec![("Env", "prod"), ("Size", "1"), ("Zone", "a")]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_tag_files(&[Path::new("/nonexistent/tags.json")]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CirrusError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_assignments() {
        let parsed = parse_assignments(&[String::from("A=1"), String::from("B=x=y")]).unwrap();
        assert_eq!(pairs(&parsed), vec![("A", "1"), ("B", "x=y")]);
        assert!(parse_assignments(&[String::from("broken")]).is_err());
    }
}
