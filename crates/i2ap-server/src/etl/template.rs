//! SQL templates for DbToDb
//!
//! A template is `{sql_dir}/{object}.sql` with `{{DATASET}}` and
//! `{{PARAM}}` placeholders. Parameter keys are matched upper-cased.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{EtlError, EtlResult};

/// One `{"key": .., "value": ..}` pair from a DbToDb request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub key: String,
    #[serde(deserialize_with = "value_as_text")]
    pub value: String,
}

impl QueryParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Callers send numbers and booleans as well as strings
fn value_as_text<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub async fn load_template(sql_dir: &Path, object: &str) -> EtlResult<String> {
    let path = sql_dir.join(format!("{}.sql", object));
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| EtlError::Template { path, source })
}

/// Flatten the template onto one line and substitute every placeholder.
pub fn fill_template(sql: &str, dataset: &str, params: &[QueryParam]) -> EtlResult<String> {
    let mut filled = sql.replace('\n', " ").replace("{{DATASET}}", dataset);
    for param in params {
        filled = filled.replace(&format!("{{{{{}}}}}", param.key.to_uppercase()), &param.value);
    }

    if filled.contains('{') || filled.contains('}') {
        return Err(EtlError::MissingTemplateParameter(filled));
    }
    Ok(filled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template() {
        let sql = "SELECT *\nFROM {{DATASET}}.orders\nWHERE region = '{{REGION}}'";
        let filled = fill_template(sql, "mart", &[QueryParam::new("region", "EMEA")]).unwrap();
        assert_eq!(filled, "SELECT * FROM mart.orders WHERE region = 'EMEA'");
    }

    #[test]
    fn test_unfilled_placeholder_is_an_error() {
        let err = fill_template("SELECT {{COLS}} FROM {{DATASET}}.t", "mart", &[]).unwrap_err();
        assert!(matches!(err, EtlError::MissingTemplateParameter(_)));
    }

    #[test]
    fn test_param_values_accept_scalars() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[{"key":"limit","value":10},{"key":"flag","value":true}]"#).unwrap();
        assert_eq!(params[0].value, "10");
        assert_eq!(params[1].value, "true");
    }

    #[tokio::test]
    async fn test_load_template() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("orders.sql"), "SELECT 1").await.unwrap();
        assert_eq!(load_template(dir.path(), "orders").await.unwrap(), "SELECT 1");

        let err = load_template(dir.path(), "missing").await.unwrap_err();
        assert!(err.to_string().contains("missing.sql"));
    }
}
